//! Streaming response copy and token-usage extraction, per §4.E steps 6-7.

use crate::core::metrics::TokenUsage;

/// True when the response declares itself as SSE or chunked and therefore
/// must be forwarded byte-for-byte with per-write flushing rather than
/// buffered whole.
pub fn is_streaming_response(content_type: Option<&str>, transfer_encoding: Option<&str>) -> bool {
    let sse = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("text/event-stream"))
        .unwrap_or(false);
    let chunked = transfer_encoding
        .map(|te| te.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    sse || chunked
}

/// Extracts token-usage deltas from one complete JSON response body, per the
/// `usage` block shape in §4.E step 7.
pub fn extract_tokens_from_json(body: &[u8]) -> Option<TokenUsage> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    extract_tokens_from_usage_value(value.get("usage")?)
}

fn extract_tokens_from_usage_value(usage: &serde_json::Value) -> Option<TokenUsage> {
    let get = |field: &str| usage.get(field).and_then(|v| v.as_u64()).unwrap_or(0);
    Some(TokenUsage {
        input_tokens: get("input_tokens"),
        output_tokens: get("output_tokens"),
        cache_creation_tokens: get("cache_creation_input_tokens"),
        cache_read_tokens: get("cache_read_input_tokens"),
    })
}

/// Accumulates token usage across SSE frames as they arrive. Only the
/// terminal `message_delta` event (per §4.E step 7) carries usage, so this
/// only ever needs to look at the most recent one.
#[derive(Default)]
pub struct SseTokenAccumulator {
    pending_event: Option<String>,
}

impl SseTokenAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line of an SSE frame (without the trailing newline).
    /// Returns token usage if this line completed a `message_delta` data
    /// frame carrying a `usage` field.
    pub fn feed_line(&mut self, line: &str) -> Option<TokenUsage> {
        if let Some(event) = line.strip_prefix("event:") {
            self.pending_event = Some(event.trim().to_string());
            return None;
        }
        if let Some(data) = line.strip_prefix("data:") {
            if self.pending_event.as_deref() == Some("message_delta") {
                let value: serde_json::Value = serde_json::from_str(data.trim()).ok()?;
                return extract_tokens_from_usage_value(value.get("usage")?);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sse_content_type() {
        assert!(is_streaming_response(Some("text/event-stream"), None));
        assert!(!is_streaming_response(Some("application/json"), None));
    }

    #[test]
    fn detects_chunked_transfer_encoding() {
        assert!(is_streaming_response(None, Some("chunked")));
    }

    #[test]
    fn extracts_usage_block_from_json_body() {
        let body = br#"{"ok":true,"usage":{"input_tokens":5,"output_tokens":7}}"#;
        let tokens = extract_tokens_from_json(body).unwrap();
        assert_eq!(tokens.input_tokens, 5);
        assert_eq!(tokens.output_tokens, 7);
    }

    #[test]
    fn accumulates_tokens_only_from_message_delta_event() {
        let mut acc = SseTokenAccumulator::new();
        assert!(acc.feed_line("event: content_block_delta").is_none());
        assert!(acc
            .feed_line(r#"data: {"usage":{"output_tokens":999}}"#)
            .is_none());
        assert!(acc.feed_line("event: message_delta").is_none());
        let tokens = acc
            .feed_line(r#"data: {"usage":{"output_tokens":12}}"#)
            .unwrap();
        assert_eq!(tokens.output_tokens, 12);
    }
}
