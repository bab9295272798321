//! Component F: Retry Engine.
//!
//! Drives the Proxy Pipeline across the Router's candidate list with
//! exponential backoff, failure classification, and group-cooldown
//! feedback. See the state machine in §4.F: `Selecting -> Dispatching ->
//! (Responding | Failed); Responding -> Completed | Aborted; Failed ->
//! Selecting (if attempts remain) | Exhausted`.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::endpoint::Endpoint;
use crate::core::group::GroupManager;
use crate::core::metrics::{ConnectionStatus, MetricsCore};
use crate::core::proxy::classify::{classify_status, Classification};
use crate::core::proxy::{backoff_delay, headers, ForwardRequest, ProxyPipeline};
use crate::utils::error::GatewayError;

pub struct RetryEngine {
    pipeline: ProxyPipeline,
    max_attempts: u32,
    base_backoff: Duration,
    cap_backoff: Duration,
    group_cooldown: Duration,
    fail_threshold: u32,
}

impl RetryEngine {
    pub fn new(
        pipeline: ProxyPipeline,
        max_attempts: u32,
        base_backoff: Duration,
        cap_backoff: Duration,
        group_cooldown: Duration,
        fail_threshold: u32,
    ) -> Self {
        Self {
            pipeline,
            max_attempts,
            base_backoff,
            cap_backoff,
            group_cooldown,
            fail_threshold,
        }
    }

    /// Drives one request to completion, writing the result as an
    /// `HttpResponse`. `candidates` is the Router's output for this
    /// request; `groups` receives cooldown notifications.
    pub async fn serve(
        &self,
        req: ForwardRequest,
        candidates: Vec<Arc<Endpoint>>,
        groups: &GroupManager,
        metrics: &Arc<MetricsCore>,
        cancel: CancellationToken,
    ) -> HttpResponse {
        let start = Instant::now();
        let conn_id = metrics.begin_connection(
            req.client_ip.clone(),
            user_agent(&req),
            req.method.to_string(),
            req.path_and_query.clone(),
        );

        if candidates.is_empty() {
            metrics.end_connection(conn_id, ConnectionStatus::Failed, 0, start.elapsed(), "unknown", false);
            return GatewayError::NoEndpoints.error_response();
        }

        if cancel.is_cancelled() {
            metrics.end_connection(conn_id, ConnectionStatus::Failed, 0, start.elapsed(), "unknown", false);
            return HttpResponse::build(StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)).finish();
        }

        let body = match self.pipeline.capture_body(req.body.clone()) {
            Ok(b) => b,
            Err(err) => {
                metrics.end_connection(conn_id, ConnectionStatus::Failed, 0, start.elapsed(), "unknown", false);
                return err.error_response();
            }
        };
        let req = ForwardRequest { body, ..req };

        let mut remaining_in_group: HashMap<String, u32> = HashMap::new();
        for c in &candidates {
            *remaining_in_group.entry(c.group.clone()).or_insert(0) += 1;
        }

        let mut last_endpoint_name = candidates[0].name.clone();
        let mut attempt = 0u32;

        for endpoint in &candidates {
            if attempt >= self.max_attempts {
                break;
            }
            if cancel.is_cancelled() {
                metrics.end_connection(conn_id, ConnectionStatus::Failed, 0, start.elapsed(), &last_endpoint_name, false);
                return HttpResponse::build(StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)).finish();
            }

            attempt += 1;
            last_endpoint_name = endpoint.name.clone();
            metrics.attach_endpoint(conn_id, &endpoint.name);
            metrics.record_attempt(&endpoint.name);
            info!(conn_id, endpoint = %endpoint.name, attempt, "dispatching upstream request");

            let attempt_start = Instant::now();
            let dispatch_result = self.pipeline.dispatch(&req, endpoint, &cancel).await;

            let outcome = match dispatch_result {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(conn_id, endpoint = %endpoint.name, error = %err, "dispatch failed, retriable");
                    endpoint.mark_failure(self.fail_threshold);
                    metrics.record_retry(conn_id, &endpoint.name);
                    self.note_group_exhaustion(&endpoint.group, &mut remaining_in_group, groups);
                    self.sleep_backoff(attempt, &cancel).await;
                    continue;
                }
            };

            match classify_status(outcome.status) {
                Classification::Success => {
                    let response_headers = headers::copy_response_headers(outcome.response.headers());
                    let status = outcome.status;
                    endpoint.mark_success(attempt_start.elapsed());

                    let (tx, rx) = mpsc::channel::<std::result::Result<bytes::Bytes, std::io::Error>>(16);
                    let metrics = Arc::clone(metrics);
                    let pipeline = self.pipeline.clone();
                    let endpoint_name = endpoint.name.clone();
                    let cancel_task = cancel.clone();
                    tokio::spawn(async move {
                        let tx_for_chunks = tx.clone();
                        let cancel_for_chunks = cancel_task.clone();
                        let result = pipeline
                            .stream_response(outcome, conn_id, &endpoint_name, &metrics, &cancel_task, |chunk| {
                                // The client dropped the streaming body (disconnect), so
                                // the receiver is gone; stop pulling from upstream.
                                if tx_for_chunks.try_send(Ok(chunk)).is_err() {
                                    cancel_for_chunks.cancel();
                                }
                            })
                            .await;
                        match result {
                            Ok((bytes_sent, _streaming)) => {
                                let aborted = cancel_task.is_cancelled();
                                metrics.end_connection(
                                    conn_id,
                                    if aborted { ConnectionStatus::Failed } else { ConnectionStatus::Completed },
                                    bytes_sent,
                                    start.elapsed(),
                                    &endpoint_name,
                                    !aborted,
                                );
                            }
                            Err(err) => {
                                error!(conn_id, endpoint = %endpoint_name, error = %err, "stream truncated by upstream error");
                                metrics.end_connection(
                                    conn_id,
                                    ConnectionStatus::Failed,
                                    0,
                                    start.elapsed(),
                                    &endpoint_name,
                                    false,
                                );
                            }
                        }
                    });

                    let mut builder = HttpResponse::build(
                        StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
                    );
                    for (name, value) in response_headers {
                        builder.insert_header((name, value));
                    }
                    return builder.streaming(ReceiverStream::new(rx));
                }
                Classification::Terminal => {
                    let body = outcome
                        .response
                        .bytes()
                        .await
                        .unwrap_or_else(|_| bytes::Bytes::new());
                    metrics.end_connection(
                        conn_id,
                        ConnectionStatus::Failed,
                        body.len() as u64,
                        start.elapsed(),
                        &endpoint.name,
                        false,
                    );
                    return GatewayError::Upstream {
                        status: outcome.status,
                        body: body.to_vec(),
                    }
                    .error_response();
                }
                Classification::Retriable => {
                    warn!(conn_id, endpoint = %endpoint.name, status = outcome.status, "retriable upstream status");
                    endpoint.mark_failure(self.fail_threshold);
                    metrics.record_retry(conn_id, &endpoint.name);
                    self.note_group_exhaustion(&endpoint.group, &mut remaining_in_group, groups);
                    self.sleep_backoff(attempt, &cancel).await;
                }
            }
        }

        metrics.end_connection(conn_id, ConnectionStatus::Failed, 0, start.elapsed(), &last_endpoint_name, false);
        GatewayError::AllEndpointsExhausted {
            last_endpoint: last_endpoint_name,
        }
        .error_response()
    }

    /// Marks one candidate of `group` as spent. When every endpoint the
    /// Router gave us for that group has been tried without success, the
    /// group enters cooldown - not only when it was the active group at
    /// dispatch time: a group can only be walked to exhaustion by the
    /// retry loop if it occupied the front of the candidate list, so in
    /// practice this is always the group that was active when exhaustion
    /// happened, but the check itself does not gate on `is_active`.
    fn note_group_exhaustion(
        &self,
        group: &str,
        remaining: &mut HashMap<String, u32>,
        groups: &GroupManager,
    ) {
        if let Some(count) = remaining.get_mut(group) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                groups.enter_cooldown(group, self.group_cooldown);
            }
        }
    }

    async fn sleep_backoff(&self, attempt: u32, cancel: &CancellationToken) {
        let delay = backoff_delay(self.base_backoff, self.cap_backoff, attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {}
        }
    }
}

fn user_agent(req: &ForwardRequest) -> String {
    req.client_headers
        .get(actix_web::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use actix_web::body::to_bytes;
    use std::collections::HashMap as Map;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(name: &str, base_url: &str, priority: u32, group: &str) -> Arc<Endpoint> {
        Arc::new(Endpoint::from_config(&EndpointConfig {
            name: name.into(),
            url: base_url.into(),
            priority,
            group: group.into(),
            group_priority: priority,
            timeout_secs: 5,
            headers: Map::new(),
        }))
    }

    fn request(path_and_query: &str) -> ForwardRequest {
        ForwardRequest {
            method: reqwest::Method::POST,
            path_and_query: path_and_query.to_string(),
            client_headers: actix_web::http::header::HeaderMap::new(),
            body: bytes::Bytes::from_static(b"{\"a\":1}"),
            client_ip: "127.0.0.1".to_string(),
        }
    }

    fn engine() -> RetryEngine {
        RetryEngine::new(
            ProxyPipeline::new(10 * 1024 * 1024),
            3,
            Duration::from_millis(1),
            Duration::from_millis(10),
            Duration::from_millis(200),
            3,
        )
    }

    /// S1: strict-priority order, first candidate succeeds.
    #[tokio::test(flavor = "multi_thread")]
    async fn happy_path_returns_first_candidates_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let a = endpoint("a", &server.uri(), 1, "Default");
        let endpoints = vec![a];
        let groups = GroupManager::from_endpoints(&endpoints);
        let metrics = Arc::new(MetricsCore::new());

        let resp = engine()
            .serve(
                request("/v1/x"),
                endpoints.clone(),
                &groups,
                &metrics,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body.as_ref(), br#"{"ok":true}"#);
        let snapshot = metrics.snapshot();
        let agg = snapshot.endpoint_aggregates.get("a").unwrap();
        assert_eq!(agg.total, 1);
        assert_eq!(agg.successful, 1);
    }

    /// S2: first candidate returns a retriable 503, second succeeds.
    #[tokio::test(flavor = "multi_thread")]
    async fn retries_onto_next_candidate_after_retriable_failure() {
        let failing = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/x"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&failing)
            .await;
        let healthy = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&healthy)
            .await;

        let a = endpoint("a", &failing.uri(), 1, "Default");
        let b = endpoint("b", &healthy.uri(), 2, "Default");
        let endpoints = vec![a.clone(), b.clone()];
        let groups = GroupManager::from_endpoints(&endpoints);
        let metrics = Arc::new(MetricsCore::new());

        let resp = engine()
            .serve(
                request("/v1/x"),
                endpoints.clone(),
                &groups,
                &metrics,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(a.get_status().consecutive_fails, 1);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.endpoint_aggregates.get("a").unwrap().failed, 1);
        assert_eq!(snapshot.endpoint_aggregates.get("b").unwrap().successful, 1);
    }

    /// S4: every endpoint in the active group fails; a lower-priority
    /// group's endpoint succeeds and the exhausted group enters cooldown.
    #[tokio::test(flavor = "multi_thread")]
    async fn exhausting_a_group_enters_it_into_cooldown() {
        let g1_a = MockServer::start().await;
        Mock::given(method("POST")).and(path("/v1/x")).respond_with(ResponseTemplate::new(500)).mount(&g1_a).await;
        let g1_b = MockServer::start().await;
        Mock::given(method("POST")).and(path("/v1/x")).respond_with(ResponseTemplate::new(500)).mount(&g1_b).await;
        let g2_c = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&g2_c)
            .await;

        let a = endpoint("a", &g1_a.uri(), 1, "g1");
        let b = endpoint("b", &g1_b.uri(), 2, "g1");
        let c = endpoint("c", &g2_c.uri(), 1, "g2");
        let endpoints = vec![a, b, c];
        let groups = GroupManager::from_endpoints(&endpoints);
        let metrics = Arc::new(MetricsCore::new());

        let resp = engine()
            .serve(
                request("/v1/x"),
                endpoints.clone(),
                &groups,
                &metrics,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(groups.is_in_cooldown("g1"));
        assert!(!groups.get_active_groups().iter().any(|g| g.name == "g1"));
    }

    /// S5: every candidate fails; the client gets a synthetic 502 naming
    /// the last endpoint attempted.
    #[tokio::test(flavor = "multi_thread")]
    async fn all_endpoints_exhausted_yields_502_naming_last_endpoint() {
        let down = MockServer::start().await;
        Mock::given(method("POST")).and(path("/v1/x")).respond_with(ResponseTemplate::new(500)).mount(&down).await;

        let a = endpoint("a", &down.uri(), 1, "Default");
        let endpoints = vec![a];
        let groups = GroupManager::from_endpoints(&endpoints);
        let metrics = Arc::new(MetricsCore::new());

        let resp = engine()
            .serve(
                request("/v1/x"),
                endpoints.clone(),
                &groups,
                &metrics,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "ALL_ENDPOINTS_EXHAUSTED");
        assert!(json["error"]["message"].as_str().unwrap().contains('a'));
    }

    /// A pre-cancelled request is not attempted and the connection ends failed.
    #[tokio::test(flavor = "multi_thread")]
    async fn pre_cancelled_request_is_not_attempted() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/v1/x")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let a = endpoint("a", &server.uri(), 1, "Default");
        let endpoints = vec![a];
        let groups = GroupManager::from_endpoints(&endpoints);
        let metrics = Arc::new(MetricsCore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let resp = engine()
            .serve(request("/v1/x"), endpoints.clone(), &groups, &metrics, cancel)
            .await;

        assert_eq!(resp.status().as_u16(), 499);
        let snapshot = metrics.snapshot();
        assert!(snapshot.active_connections.is_empty());
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(snapshot.history[0].status, ConnectionStatus::Failed);
    }
}
