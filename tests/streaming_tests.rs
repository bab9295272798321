//! End-to-end SSE streaming through the retry engine + proxy pipeline (S3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actix_web::body::to_bytes;
use bytes::Bytes;
use endpoint_forwarder::config::EndpointConfig;
use endpoint_forwarder::core::endpoint::Endpoint;
use endpoint_forwarder::core::group::GroupManager;
use endpoint_forwarder::core::metrics::MetricsCore;
use endpoint_forwarder::core::proxy::{ForwardRequest, ProxyPipeline};
use endpoint_forwarder::core::retry::RetryEngine;
use tokio_util::sync::CancellationToken;

fn endpoint(url: &str) -> Arc<Endpoint> {
    Arc::new(Endpoint::from_config(&EndpointConfig {
        name: "a".into(),
        url: url.into(),
        priority: 1,
        group: "Default".into(),
        group_priority: 1,
        timeout_secs: 5,
        headers: HashMap::new(),
    }))
}

#[tokio::test(flavor = "multi_thread")]
async fn sse_response_streams_through_and_terminal_usage_is_recorded() {
    let server = wiremock::MockServer::start().await;
    let sse_body = concat!(
        "event: content_block_delta\n",
        "data: {\"text\":\"hel\"}\n\n",
        "event: content_block_delta\n",
        "data: {\"text\":\"lo\"}\n\n",
        "event: message_delta\n",
        "data: {\"usage\":{\"output_tokens\":7}}\n\n",
        "event: message_stop\n",
        "data: {}\n\n",
    );
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("/v1/messages"))
        .respond_with(
            wiremock::ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_raw(sse_body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let ep = endpoint(&server.uri());
    let endpoints = vec![ep.clone()];
    let groups = GroupManager::from_endpoints(&endpoints);
    let metrics = Arc::new(MetricsCore::new());

    let engine = RetryEngine::new(
        ProxyPipeline::new(10 * 1024 * 1024),
        3,
        Duration::from_millis(1),
        Duration::from_millis(10),
        Duration::from_millis(200),
        3,
    );

    let req = ForwardRequest {
        method: reqwest::Method::POST,
        path_and_query: "/v1/messages".to_string(),
        client_headers: actix_web::http::header::HeaderMap::new(),
        body: Bytes::from_static(b"{}"),
        client_ip: "127.0.0.1".to_string(),
    };

    let resp = engine
        .serve(req, endpoints, &groups, &metrics, CancellationToken::new())
        .await;
    assert_eq!(resp.status(), actix_web::http::StatusCode::OK);

    let body = to_bytes(resp.into_body()).await.unwrap();
    assert_eq!(body.as_ref(), sse_body.as_bytes());

    // give the background streaming task a moment to call end_connection
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = metrics.snapshot();
    let completed = snapshot
        .history
        .iter()
        .find(|c| c.endpoint == "a")
        .expect("connection should have moved to history");
    assert!(completed.is_streaming);
    assert_eq!(completed.tokens.output_tokens, 7);
}
