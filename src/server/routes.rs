//! Route handlers: the observability endpoints from §6 and the wildcard
//! proxy route that hands everything else to the core.

use actix_web::{web, HttpRequest, HttpResponse};
use bytes::Bytes;
use serde::Serialize;
use std::fmt::Write as _;
use tokio_util::sync::CancellationToken;

use crate::core::proxy::headers::extract_client_ip;
use crate::core::proxy::ForwardRequest;
use crate::server::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/health/detailed", web::get().to(health_detailed))
        .route("/metrics", web::get().to(metrics))
        .default_service(web::route().to(proxy));
}

#[derive(Serialize)]
struct HealthSummary {
    status: &'static str,
    healthy_endpoints: usize,
    total_endpoints: usize,
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    let (healthy, total) = state.core.healthy_endpoint_count();
    let status = if healthy == 0 {
        "unhealthy"
    } else if healthy < total {
        "degraded"
    } else {
        "healthy"
    };
    let body = HealthSummary {
        status,
        healthy_endpoints: healthy,
        total_endpoints: total,
    };
    if healthy == 0 {
        HttpResponse::ServiceUnavailable().json(body)
    } else {
        HttpResponse::Ok().json(body)
    }
}

#[derive(Serialize)]
struct EndpointHealthRecord {
    name: String,
    url: String,
    healthy: bool,
    response_time_ms: u64,
    last_check_time: Option<i64>,
    consecutive_fails: u32,
    priority: u32,
}

async fn health_detailed(state: web::Data<AppState>) -> HttpResponse {
    let records: Vec<EndpointHealthRecord> = state
        .core
        .endpoints()
        .iter()
        .map(|ep| {
            let status = ep.get_status();
            EndpointHealthRecord {
                name: ep.name.clone(),
                url: ep.url.clone(),
                healthy: status.healthy,
                response_time_ms: status.response_time.as_millis() as u64,
                last_check_time: status
                    .last_check
                    .map(|_| chrono::Utc::now().timestamp()),
                consecutive_fails: status.consecutive_fails,
                priority: ep.priority,
            }
        })
        .collect();
    HttpResponse::Ok().json(records)
}

async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    let endpoints = state.core.endpoints();
    let (healthy, total) = state.core.healthy_endpoint_count();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "# HELP endpoint_forwarder_endpoints_total Total configured endpoints\n\
         # TYPE endpoint_forwarder_endpoints_total gauge\n\
         endpoint_forwarder_endpoints_total {total}"
    );
    let _ = writeln!(
        out,
        "# HELP endpoint_forwarder_endpoints_healthy Currently healthy endpoints\n\
         # TYPE endpoint_forwarder_endpoints_healthy gauge\n\
         endpoint_forwarder_endpoints_healthy {healthy}"
    );

    let _ = writeln!(
        out,
        "# HELP endpoint_forwarder_endpoint_healthy Per-endpoint health (1=healthy)\n\
         # TYPE endpoint_forwarder_endpoint_healthy gauge"
    );
    for ep in &endpoints {
        let status = ep.get_status();
        let _ = writeln!(
            out,
            "endpoint_forwarder_endpoint_healthy{{name=\"{}\",url=\"{}\",priority=\"{}\"}} {}",
            ep.name,
            ep.url,
            ep.priority,
            if status.healthy { 1 } else { 0 }
        );
    }

    let _ = writeln!(
        out,
        "# HELP endpoint_forwarder_endpoint_response_time_ms Last observed response time\n\
         # TYPE endpoint_forwarder_endpoint_response_time_ms gauge"
    );
    for ep in &endpoints {
        let status = ep.get_status();
        let _ = writeln!(
            out,
            "endpoint_forwarder_endpoint_response_time_ms{{name=\"{}\",url=\"{}\"}} {}",
            ep.name,
            ep.url,
            status.response_time.as_millis()
        );
    }

    let _ = writeln!(
        out,
        "# HELP endpoint_forwarder_endpoint_consecutive_fails Current consecutive failure streak\n\
         # TYPE endpoint_forwarder_endpoint_consecutive_fails gauge"
    );
    for ep in &endpoints {
        let status = ep.get_status();
        let _ = writeln!(
            out,
            "endpoint_forwarder_endpoint_consecutive_fails{{name=\"{}\",url=\"{}\"}} {}",
            ep.name, ep.url, status.consecutive_fails
        );
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(out)
}

async fn proxy(
    req: HttpRequest,
    body: Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let client_ip = extract_client_ip(req.headers(), req.peer_addr().map(|a| a.to_string()).as_deref());
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.path().to_string());

    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);

    let forward_req = ForwardRequest {
        method,
        path_and_query,
        client_headers: req.headers().clone(),
        body,
        client_ip,
    };

    // No separate disconnect signal is available before the response starts
    // streaming; once it does, a dropped client is detected downstream when
    // the streaming channel's receiver goes away, which cancels this token.
    let cancel = CancellationToken::new();
    state.core.forward(forward_req, cancel).await
}
