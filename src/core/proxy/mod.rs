//! Component E: Proxy Pipeline.
//!
//! Executes one HTTP forward attempt against one endpoint: target URL
//! construction, header preparation, buffered body reuse across attempts,
//! dispatch with a per-attempt deadline, and (once the retry engine has
//! classified the response) streaming the body back to the client.

pub mod classify;
pub mod headers;
pub mod streaming;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core::endpoint::Endpoint;
use crate::core::metrics::{MetricsCore, TokenUsage};
use crate::utils::error::{GatewayError, Result};

/// Request data captured once by the retry engine and replayed verbatim
/// across every candidate attempt.
pub struct ForwardRequest {
    pub method: reqwest::Method,
    pub path_and_query: String,
    pub client_headers: actix_web::http::header::HeaderMap,
    pub body: Bytes,
    pub client_ip: String,
}

/// Result of dispatching one attempt, before any body bytes have been
/// streamed to the client. The retry engine classifies `status` and decides
/// whether to call [`ProxyPipeline::stream_response`] or move to the next
/// candidate.
pub struct DispatchOutcome {
    pub status: u16,
    pub response: reqwest::Response,
}

#[derive(Clone)]
pub struct ProxyPipeline {
    client: Client,
    max_body_bytes: usize,
}

impl ProxyPipeline {
    pub fn new(max_body_bytes: usize) -> Self {
        Self {
            client: Client::builder()
                .build()
                .unwrap_or_else(|_| Client::new()),
            max_body_bytes,
        }
    }

    /// Buffers the incoming request body, enforcing the configured cap.
    /// The returned `Bytes` is reused verbatim for every retry attempt.
    pub fn capture_body(&self, body: Bytes) -> Result<Bytes> {
        if body.len() > self.max_body_bytes {
            return Err(GatewayError::RequestTooLarge);
        }
        Ok(body)
    }

    /// Steps 1-4: builds the target URL, prepares headers, and dispatches
    /// with a deadline equal to the endpoint's configured timeout.
    pub async fn dispatch(
        &self,
        req: &ForwardRequest,
        endpoint: &Arc<Endpoint>,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome> {
        let target = format!(
            "{}{}",
            endpoint.url.trim_end_matches('/'),
            req.path_and_query
        );
        let upstream_headers =
            headers::prepare_request_headers(&req.client_headers, &endpoint.headers, &req.client_ip);

        let request = self
            .client
            .request(req.method.clone(), &target)
            .headers(upstream_headers)
            .body(req.body.clone())
            .timeout(endpoint.timeout);

        let response = tokio::select! {
            result = request.send() => result?,
            _ = cancel.cancelled() => {
                return Err(GatewayError::Internal("request cancelled before dispatch completed".into()));
            }
        };

        Ok(DispatchOutcome {
            status: response.status().as_u16(),
            response,
        })
    }

    /// Step 6-7: streams the response body back to the client via `sink`,
    /// marking the connection streaming and extracting token usage as
    /// frames arrive. `sink` is typically an actix-web streaming body
    /// sender; cancellation aborts the copy without retrying.
    pub async fn stream_response(
        &self,
        outcome: DispatchOutcome,
        conn_id: u64,
        endpoint_name: &str,
        metrics: &MetricsCore,
        cancel: &CancellationToken,
        mut on_chunk: impl FnMut(Bytes),
    ) -> Result<(u64, bool)> {
        let content_type = outcome
            .response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let transfer_encoding = outcome
            .response
            .headers()
            .get(reqwest::header::TRANSFER_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let streaming = streaming::is_streaming_response(
            content_type.as_deref(),
            transfer_encoding.as_deref(),
        );
        if streaming {
            metrics.mark_streaming(conn_id);
        }

        let mut bytes_sent: u64 = 0;
        let mut sse_acc = streaming::SseTokenAccumulator::new();
        let mut body_buf: Vec<u8> = Vec::new();
        let mut byte_stream = outcome.response.bytes_stream();

        loop {
            let next = tokio::select! {
                chunk = byte_stream.next() => chunk,
                _ = cancel.cancelled() => {
                    return Ok((bytes_sent, streaming));
                }
            };
            let chunk = match next {
                Some(Ok(c)) => c,
                Some(Err(err)) => {
                    return Err(GatewayError::Http(err));
                }
                None => break,
            };
            bytes_sent += chunk.len() as u64;

            if streaming {
                body_buf.extend_from_slice(&chunk);
                while let Some(pos) = body_buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = body_buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim_end_matches(['\r', '\n']);
                    if let Some(tokens) = sse_acc.feed_line(line) {
                        metrics.record_tokens(conn_id, endpoint_name, tokens);
                    }
                }
            } else {
                body_buf.extend_from_slice(&chunk);
            }

            on_chunk(chunk);
        }

        if !streaming {
            if let Some(tokens) = streaming::extract_tokens_from_json(&body_buf) {
                metrics.record_tokens(conn_id, endpoint_name, tokens);
            }
        }

        Ok((bytes_sent, streaming))
    }

    /// Convenience accessor used by routes that need to size-check bodies
    /// before reaching the pipeline.
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }
}

/// Exponential backoff with jitter: `delay = min(base * 2^k, cap) * U(0.5, 1.5)`.
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = base
        .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX).max(1))
        .unwrap_or(cap);
    let bounded = exp.min(cap);
    let jitter = rand::random::<f64>() * 1.0 + 0.5; // U(0.5, 1.5)
    Duration::from_secs_f64(bounded.as_secs_f64() * jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_one_point_five_times_the_cap() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_millis(2000);
        for attempt in 0..10 {
            let delay = backoff_delay(base, cap, attempt);
            assert!(delay <= cap.mul_f64(1.5));
        }
    }

    #[test]
    fn body_over_cap_is_rejected() {
        let pipeline = ProxyPipeline::new(16);
        let big = Bytes::from(vec![0u8; 17]);
        assert!(matches!(
            pipeline.capture_body(big),
            Err(GatewayError::RequestTooLarge)
        ));
    }
}
