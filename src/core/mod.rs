//! The core: endpoint state, group manager, health checker, router, proxy
//! pipeline, retry engine and metrics core, wired together behind
//! `GatewayCore`. This is the only part of the crate the external
//! collaborators in §6 (auth middleware, YAML loader, dashboards, Prometheus
//! renderer) talk to.

pub mod endpoint;
pub mod group;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod retry;
pub mod router;

use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::core::endpoint::Endpoint;
use crate::core::group::GroupManager;
use crate::core::health::HealthChecker;
use crate::core::metrics::MetricsCore;
use crate::core::proxy::{ForwardRequest, ProxyPipeline};
use crate::core::retry::RetryEngine;
use crate::core::router::Router;

/// The endpoint set plus its derived group map, swapped atomically on
/// reload so in-flight requests keep a consistent view.
struct Snapshot {
    endpoints: Vec<Arc<Endpoint>>,
    groups: Arc<GroupManager>,
}

pub struct GatewayCore {
    snapshot: ArcSwap<Snapshot>,
    health_checker: Arc<HealthChecker>,
    router: ArcSwap<Router>,
    retry_engine: RetryEngine,
    metrics: Arc<MetricsCore>,
    health_interval: Duration,
    fast_test_enabled: bool,
    fast_test_interval: Duration,
}

impl GatewayCore {
    pub fn new(config: &GatewayConfig) -> Self {
        let endpoints = build_endpoints(config);
        let groups = Arc::new(GroupManager::from_endpoints(&endpoints));

        let health_checker = Arc::new(HealthChecker::new(
            Duration::from_secs(config.health.timeout_secs),
            config.health.fail_threshold,
            config.health.path.clone(),
        ));

        let pipeline = ProxyPipeline::new(10 * 1024 * 1024);
        let retry_engine = RetryEngine::new(
            pipeline,
            config.retry.max_attempts,
            Duration::from_millis(config.retry.base_backoff_ms),
            Duration::from_millis(config.retry.cap_backoff_ms),
            Duration::from_secs(config.group_cooldown_secs),
            config.health.fail_threshold,
        );

        Self {
            snapshot: ArcSwap::from_pointee(Snapshot { endpoints, groups }),
            health_checker,
            router: ArcSwap::from_pointee(Router::new(config.strategy.strategy_type)),
            retry_engine,
            metrics: Arc::new(MetricsCore::new()),
            health_interval: Duration::from_secs(config.health.interval_secs),
            fast_test_enabled: config.strategy.fast_test_enabled,
            fast_test_interval: Duration::from_secs(config.strategy.fast_test_interval_secs),
        }
    }

    /// Spawns the background health-probe loops. Call once at startup.
    pub fn spawn_health_loops(self: &Arc<Self>) {
        self.health_checker
            .spawn_liveness_loop(Arc::clone(self), self.health_interval);
        if self.fast_test_enabled {
            self.health_checker
                .spawn_fast_test_loop(Arc::clone(self), self.fast_test_interval);
        }
    }

    /// Atomically swaps the endpoint set and derived group map. In-flight
    /// requests holding the previous `Arc<Snapshot>` are unaffected.
    pub fn reload(&self, config: GatewayConfig) {
        let endpoints = build_endpoints(&config);
        let groups = Arc::new(GroupManager::from_endpoints(&endpoints));
        self.snapshot.store(Arc::new(Snapshot { endpoints, groups }));
        self.router
            .store(Arc::new(Router::new(config.strategy.strategy_type)));
    }

    pub fn metrics(&self) -> &Arc<MetricsCore> {
        &self.metrics
    }

    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.snapshot.load().endpoints.clone()
    }

    pub fn groups(&self) -> Arc<GroupManager> {
        Arc::clone(&self.snapshot.load().groups)
    }

    /// Entry point for the proxy route: produces candidates via the Router
    /// and drives them through the Retry Engine.
    pub async fn forward(
        &self,
        req: ForwardRequest,
        cancel: tokio_util::sync::CancellationToken,
    ) -> actix_web::HttpResponse {
        let snap = self.snapshot.load_full();
        let router = self.router.load_full();
        let candidates = router.candidates(&snap.endpoints, &snap.groups);
        self.retry_engine
            .serve(req, candidates, &snap.groups, &self.metrics, cancel)
            .await
    }

    pub fn healthy_endpoint_count(&self) -> (usize, usize) {
        let snap = self.snapshot.load();
        let total = snap.endpoints.len();
        let healthy = snap.endpoints.iter().filter(|e| e.is_healthy()).count();
        (healthy, total)
    }
}

fn build_endpoints(config: &GatewayConfig) -> Vec<Arc<Endpoint>> {
    config
        .endpoints
        .iter()
        .map(|cfg| Arc::new(Endpoint::from_config(cfg)))
        .collect()
}
