//! Configuration loading, validation and the data model consumed by the core.

pub mod models;
pub mod validation;
pub mod watcher;

use crate::utils::error::{GatewayError, Result};
use std::path::Path;

pub use models::*;
pub use validation::Validate;

impl GatewayConfig {
    /// Load configuration from a YAML file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: GatewayConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from an in-memory YAML document and validate it.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }
}

impl Validate for GatewayConfig {
    fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.endpoints.is_empty() {
            errors.push("at least one endpoint must be configured".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                errors.push("endpoint name must not be empty".to_string());
            }
            if !seen.insert(endpoint.name.clone()) {
                errors.push(format!("duplicate endpoint name: {}", endpoint.name));
            }
            if endpoint.url.trim().is_empty() {
                errors.push(format!("endpoint {} has an empty url", endpoint.name));
            }
            if url::Url::parse(&endpoint.url).is_err() {
                errors.push(format!(
                    "endpoint {} has an invalid url: {}",
                    endpoint.name, endpoint.url
                ));
            }
        }

        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.base_backoff_ms > self.retry.cap_backoff_ms {
            errors.push("retry.base_backoff_ms must not exceed retry.cap_backoff_ms".to_string());
        }
        if self.health.fail_threshold == 0 {
            errors.push("health.fail_threshold must be at least 1".to_string());
        }
        if self.auth.enabled && self.auth.token.as_deref().unwrap_or("").is_empty() {
            errors.push("auth.token must be set when auth.enabled is true".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::Config(errors.join("; ")))
        }
    }
}
