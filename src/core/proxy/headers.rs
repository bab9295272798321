//! Header rewriting for the forward path: hop-by-hop stripping, bearer
//! overlay and X-Forwarded-For, per §4.E step 2 / §6.

use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;

/// Headers that must never be copied verbatim to the upstream request, nor
/// copied back from the upstream response to the client.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
];

fn is_hop_by_hop(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HOP_BY_HOP.contains(&lower.as_str()) || lower.starts_with("proxy-")
}

/// Builds the header set sent upstream: client headers minus hop-by-hop,
/// endpoint-configured overrides (notably `Authorization`) layered on top,
/// and `X-Forwarded-For` appended with the client IP.
pub fn prepare_request_headers(
    client_headers: &HeaderMap,
    endpoint_headers: &HashMap<String, String>,
    client_ip: &str,
) -> reqwest::header::HeaderMap {
    let mut out = reqwest::header::HeaderMap::new();
    for (name, value) in client_headers.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.insert(n, v);
        }
    }

    for (key, value) in endpoint_headers {
        if let (Ok(n), Ok(v)) = (
            reqwest::header::HeaderName::from_bytes(key.as_bytes()),
            reqwest::header::HeaderValue::from_str(value),
        ) {
            out.insert(n, v);
        }
    }

    let xff_value = match out.get(reqwest::header::HeaderName::from_static("x-forwarded-for")) {
        Some(existing) => format!("{}, {}", existing.to_str().unwrap_or(""), client_ip),
        None => client_ip.to_string(),
    };
    if let Ok(v) = reqwest::header::HeaderValue::from_str(&xff_value) {
        out.insert(reqwest::header::HeaderName::from_static("x-forwarded-for"), v);
    }

    out
}

/// Copies upstream response headers back to the client, dropping
/// hop-by-hop headers and never forwarding `Transfer-Encoding`/`Connection`.
pub fn copy_response_headers(
    upstream: &reqwest::header::HeaderMap,
) -> Vec<(HeaderName, HeaderValue)> {
    let mut out = Vec::new();
    for (name, value) in upstream.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.push((n, v));
        }
    }
    out
}

/// Extracts the client IP per §3: first hop of `X-Forwarded-For`, else
/// `X-Real-IP`, else the remote address with the port stripped.
pub fn extract_client_ip(headers: &HeaderMap, remote_addr: Option<&str>) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.trim().is_empty() {
            return real_ip.trim().to_string();
        }
    }
    remote_addr
        .map(|addr| addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr))
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_token_overrides_incoming_authorization() {
        let mut client_headers = HeaderMap::new();
        client_headers.insert(
            actix_web::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer client-token"),
        );
        let mut endpoint_headers = HashMap::new();
        endpoint_headers.insert("Authorization".to_string(), "Bearer endpoint-token".to_string());

        let prepared = prepare_request_headers(&client_headers, &endpoint_headers, "1.2.3.4");
        assert_eq!(
            prepared.get("authorization").unwrap().to_str().unwrap(),
            "Bearer endpoint-token"
        );
    }

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut client_headers = HeaderMap::new();
        client_headers.insert(
            actix_web::http::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        let prepared = prepare_request_headers(&client_headers, &HashMap::new(), "1.2.3.4");
        assert!(prepared.get("connection").is_none());
    }

    #[test]
    fn client_ip_prefers_x_forwarded_for_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static("9.9.9.9, 1.1.1.1"),
        );
        assert_eq!(extract_client_ip(&headers, Some("2.2.2.2:1234")), "9.9.9.9");
    }

    #[test]
    fn client_ip_falls_back_to_remote_addr_without_port() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers, Some("2.2.2.2:1234")), "2.2.2.2");
    }
}
