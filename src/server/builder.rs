//! Builds the actix-web application and runs the HTTP server.
//!
//! Configuration is loaded once at startup (a bad config is fatal if it
//! fails validation), then an `App` is assembled with the auth middleware,
//! the access logger, and the observability + proxy routes. Shutdown stops
//! accepting new connections, drains in-flight ones for a bounded window,
//! then cancels the rest.
use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware::Logger, web, App, HttpServer as ActixHttpServer};
use tracing::info;

use crate::config::GatewayConfig;
use crate::core::GatewayCore;
use crate::server::middleware::AuthMiddleware;
use crate::server::routes;
use crate::server::state::AppState;
use crate::utils::error::Result;

/// Overrides the binary's CLI flags may apply on top of the loaded config
/// file.
#[derive(Debug, Default, Clone)]
pub struct ServerOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Loads configuration from `config_path`, builds the core, spawns the
/// health-probe and config-watcher background tasks, and blocks serving
/// HTTP until shutdown.
pub async fn run_server(config_path: &str, overrides: ServerOverrides) -> Result<()> {
    info!(path = config_path, "loading configuration");
    let mut config = GatewayConfig::from_file(config_path)?;
    if let Some(host) = overrides.host {
        config.server.host = host;
    }
    if let Some(port) = overrides.port {
        config.server.port = port;
    }

    let core = Arc::new(GatewayCore::new(&config));
    core.spawn_health_loops();

    crate::config::watcher::spawn(
        std::path::PathBuf::from(config_path),
        Arc::clone(&core),
        Duration::from_secs(5),
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let drain_secs = config.server.shutdown_drain_secs;
    info!(addr = %bind_addr, endpoints = config.endpoints.len(), "starting endpoint-forwarder");

    let max_body_bytes = 10 * 1024 * 1024;
    let workers = config.server.workers.unwrap_or_else(num_cpus::get);
    let state = AppState {
        core,
        config: Arc::new(config),
    };

    let server = ActixHttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::PayloadConfig::new(max_body_bytes))
            .wrap(AuthMiddleware)
            .wrap(Logger::default())
            .configure(routes::configure)
    })
    .workers(workers)
    .shutdown_timeout(drain_secs)
    .bind(&bind_addr)?
    .run();

    let handle = server.handle();
    let mut server_task = tokio::spawn(server);

    tokio::select! {
        res = &mut server_task => {
            res.map_err(|e| crate::utils::error::GatewayError::Internal(e.to_string()))??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!(drain_secs, "shutdown signal received, draining in-flight requests");
            handle.stop(true).await;
            server_task
                .await
                .map_err(|e| crate::utils::error::GatewayError::Internal(e.to_string()))??;
        }
    }

    Ok(())
}
