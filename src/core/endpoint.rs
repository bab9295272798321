//! Component A: Endpoint State.
//!
//! Per-endpoint liveness, response time and consecutive-failure tracking.
//! Mutators and readers each take the endpoint's own lock, so a reader never
//! observes a torn combination of fields.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::EndpointConfig;

/// Immutable identity plus the current liveness snapshot of one endpoint.
#[derive(Debug)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    pub priority: u32,
    pub group: String,
    pub group_priority: u32,
    pub timeout: Duration,
    pub headers: HashMap<String, String>,
    state: RwLock<EndpointState>,
}

/// A coherent, cloneable snapshot of an endpoint's mutable runtime state.
#[derive(Debug, Clone)]
pub struct EndpointStatus {
    pub healthy: bool,
    pub response_time: Duration,
    pub last_check: Option<Instant>,
    pub consecutive_fails: u32,
}

#[derive(Debug, Clone)]
struct EndpointState {
    healthy: bool,
    response_time: Duration,
    last_check: Option<Instant>,
    consecutive_fails: u32,
}

impl Default for EndpointState {
    fn default() -> Self {
        Self {
            healthy: true,
            response_time: Duration::ZERO,
            last_check: None,
            consecutive_fails: 0,
        }
    }
}

impl Endpoint {
    pub fn from_config(cfg: &EndpointConfig) -> Self {
        let group = if cfg.group.trim().is_empty() {
            "Default".to_string()
        } else {
            cfg.group.clone()
        };
        Self {
            name: cfg.name.clone(),
            url: cfg.url.clone(),
            priority: cfg.priority,
            group,
            group_priority: cfg.group_priority,
            timeout: Duration::from_secs(cfg.timeout_secs),
            headers: cfg.headers.clone(),
            state: RwLock::new(EndpointState::default()),
        }
    }

    /// Returns a coherent snapshot of the endpoint's current state.
    pub fn get_status(&self) -> EndpointStatus {
        let s = self.state.read();
        EndpointStatus {
            healthy: s.healthy,
            response_time: s.response_time,
            last_check: s.last_check,
            consecutive_fails: s.consecutive_fails,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.state.read().healthy
    }

    pub fn response_time(&self) -> Duration {
        self.state.read().response_time
    }

    /// Records a successful probe or request: clears the failure streak and
    /// updates the response time used by the fastest-response policy.
    /// Returns `true` if this call flipped the endpoint unhealthy -> healthy.
    pub fn mark_success(&self, response_time: Duration) -> bool {
        let mut s = self.state.write();
        let was_unhealthy = !s.healthy;
        s.consecutive_fails = 0;
        s.response_time = response_time;
        s.last_check = Some(Instant::now());
        s.healthy = true;
        was_unhealthy
    }

    /// Records a failed probe or request. `fail_threshold` is the configured
    /// `F_threshold` from §3/§4.A. Returns `true` if this call flipped the
    /// endpoint healthy -> unhealthy.
    pub fn mark_failure(&self, fail_threshold: u32) -> bool {
        let mut s = self.state.write();
        let was_healthy = s.healthy;
        s.consecutive_fails += 1;
        s.last_check = Some(Instant::now());
        if s.consecutive_fails >= fail_threshold {
            s.healthy = false;
        }
        was_healthy && !s.healthy
    }
}
