//! Component C: Health Checker.
//!
//! Runs two cooperating periodic background tasks: a liveness probe on a
//! configured interval, and an optional fast-test probe on a shorter
//! interval used to refresh response times for the fastest-response policy.
//! A per-endpoint `DashMap` of locks ensures a given endpoint never has two
//! probes in flight concurrently.

use dashmap::DashMap;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::core::endpoint::Endpoint;
use crate::core::GatewayCore;

/// Background prober for every configured endpoint.
pub struct HealthChecker {
    client: Client,
    fail_threshold: u32,
    timeout: Duration,
    path: String,
    probe_in_flight: DashMap<String, ()>,
    running: AtomicBool,
}

impl HealthChecker {
    pub fn new(timeout: Duration, fail_threshold: u32, path: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            fail_threshold,
            timeout,
            path,
            probe_in_flight: DashMap::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Spawns the liveness-probe loop. Always reads the gateway's *current*
    /// endpoint set on each tick, so a config reload is picked up on the
    /// very next probe without restarting the loop.
    pub fn spawn_liveness_loop(self: &Arc<Self>, core: Arc<GatewayCore>, interval: Duration) {
        let checker = Arc::clone(self);
        self.running.store(true, Ordering::Release);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !checker.running.load(Ordering::Acquire) {
                    break;
                }
                let snapshot = core.endpoints();
                checker.probe_all(&snapshot).await;
                core.groups().recompute_active(&snapshot);
            }
        });
    }

    /// Spawns the optional fast-test loop that only refreshes response time.
    pub fn spawn_fast_test_loop(self: &Arc<Self>, core: Arc<GatewayCore>, interval: Duration) {
        let checker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let snapshot = core.endpoints();
                checker.probe_all(&snapshot).await;
                core.groups().recompute_active(&snapshot);
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    async fn probe_all(&self, endpoints: &[Arc<Endpoint>]) {
        let mut handles = Vec::with_capacity(endpoints.len());
        for ep in endpoints {
            if self.probe_in_flight.contains_key(&ep.name) {
                continue;
            }
            self.probe_in_flight.insert(ep.name.clone(), ());
            let ep = Arc::clone(ep);
            let client = self.client.clone();
            let fail_threshold = self.fail_threshold;
            let path = self.path.clone();
            let timeout = self.timeout;
            handles.push(tokio::spawn(async move {
                probe_one(&client, &ep, &path, timeout, fail_threshold).await;
            }));
        }
        for h in handles {
            let _ = h.await;
        }
        for ep in endpoints {
            self.probe_in_flight.remove(&ep.name);
        }
    }

    /// Triggers a single manual probe of one endpoint, for diagnostics.
    pub async fn check_endpoint(&self, endpoint: &Arc<Endpoint>) {
        probe_one(
            &self.client,
            endpoint,
            &self.path,
            self.timeout,
            self.fail_threshold,
        )
        .await;
    }
}

async fn probe_one(
    client: &Client,
    endpoint: &Arc<Endpoint>,
    path: &str,
    timeout: Duration,
    fail_threshold: u32,
) {
    let url = format!("{}{}", endpoint.url.trim_end_matches('/'), path);
    let start = Instant::now();
    let result = client.get(&url).timeout(timeout).send().await;
    match result {
        Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => {
            let flipped = endpoint.mark_success(start.elapsed());
            if flipped {
                debug!(endpoint = %endpoint.name, "endpoint recovered");
            }
        }
        Ok(resp) => {
            let flipped = endpoint.mark_failure(fail_threshold);
            if flipped {
                warn!(endpoint = %endpoint.name, status = %resp.status(), "endpoint marked unhealthy");
            }
        }
        Err(err) => {
            let flipped = endpoint.mark_failure(fail_threshold);
            if flipped {
                warn!(endpoint = %endpoint.name, error = %err, "endpoint marked unhealthy");
            }
        }
    }
}
