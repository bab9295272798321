//! Configuration data model.
//!
//! Mirrors the schema in the operator-facing YAML file: `server`, `auth`,
//! `strategy`, `retry`, `health`, `group_cooldown_secs` and `endpoints[]`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default = "default_group_cooldown_secs")]
    pub group_cooldown_secs: u64,
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            strategy: StrategyConfig::default(),
            retry: RetryConfig::default(),
            health: HealthConfig::default(),
            group_cooldown_secs: default_group_cooldown_secs(),
            endpoints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bounded drain window for graceful shutdown: in-flight requests get
    /// this long to finish before being cancelled.
    #[serde(default = "default_shutdown_drain_secs")]
    pub shutdown_drain_secs: u64,
    /// Number of actix-web worker threads. Defaults to the host's core
    /// count at startup when unset.
    #[serde(default)]
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_drain_secs: default_shutdown_drain_secs(),
            workers: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    pub token: Option<String>,
}

/// Routing policy selector. Corresponds to §4.D of the requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyType {
    Priority,
    Fastest,
}

impl Default for StrategyType {
    fn default() -> Self {
        StrategyType::Priority
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(rename = "type", default)]
    pub strategy_type: StrategyType,
    #[serde(default)]
    pub fast_test_enabled: bool,
    #[serde(default = "default_fast_test_interval_secs")]
    pub fast_test_interval_secs: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            strategy_type: StrategyType::default(),
            fast_test_enabled: false,
            fast_test_interval_secs: default_fast_test_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_cap_backoff_ms")]
    pub cap_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            cap_backoff_ms: default_cap_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,
    #[serde(default = "default_health_path")]
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            timeout_secs: default_health_timeout_secs(),
            fail_threshold: default_fail_threshold(),
            path: default_health_path(),
        }
    }
}

/// One upstream endpoint. `group_priority` doubles as the derived group's
/// priority: a group's priority is the minimum `group_priority` across its
/// members (see DESIGN.md §Open Questions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_group_name")]
    pub group: String,
    #[serde(default = "default_priority")]
    pub group_priority: u32,
    #[serde(default = "default_endpoint_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

pub fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub fn default_port() -> u16 {
    8080
}

pub fn default_shutdown_drain_secs() -> u64 {
    30
}

pub fn default_group_cooldown_secs() -> u64 {
    30
}

pub fn default_fast_test_interval_secs() -> u64 {
    10
}

pub fn default_max_attempts() -> u32 {
    3
}

pub fn default_base_backoff_ms() -> u64 {
    100
}

pub fn default_cap_backoff_ms() -> u64 {
    2_000
}

pub fn default_health_interval_secs() -> u64 {
    30
}

pub fn default_health_timeout_secs() -> u64 {
    5
}

pub fn default_fail_threshold() -> u32 {
    3
}

pub fn default_health_path() -> String {
    "/health".to_string()
}

pub fn default_priority() -> u32 {
    1
}

pub fn default_group_name() -> String {
    "Default".to_string()
}

pub fn default_endpoint_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_group_name_is_not_normalized_at_parse_time() {
        // Normalization to "Default" happens in the group manager, not here.
        let cfg: EndpointConfig = serde_yaml::from_str(
            "name: a\nurl: http://localhost:1\ngroup: \"\"\n",
        )
        .unwrap();
        assert_eq!(cfg.group, "");
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: EndpointConfig =
            serde_yaml::from_str("name: a\nurl: http://localhost:1\n").unwrap();
        assert_eq!(cfg.priority, 1);
        assert_eq!(cfg.group, "Default");
        assert_eq!(cfg.timeout_secs, 30);
    }
}
