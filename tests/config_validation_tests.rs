//! Exercises `GatewayConfig` parsing/validation end to end, the way an
//! operator's YAML file would be loaded at startup.

use endpoint_forwarder::config::{GatewayConfig, StrategyType};

const VALID: &str = r#"
server:
  host: 127.0.0.1
  port: 9000
auth:
  enabled: true
  token: "secret"
strategy:
  type: fastest
retry:
  max_attempts: 5
  base_backoff_ms: 50
  cap_backoff_ms: 1000
health:
  interval_secs: 15
  timeout_secs: 3
  fail_threshold: 2
group_cooldown_secs: 20
endpoints:
  - name: a
    url: "https://a.example.com"
    priority: 1
    group: primary
    group_priority: 1
  - name: b
    url: "https://b.example.com"
    priority: 2
    group: primary
    group_priority: 1
"#;

#[test]
fn valid_document_parses_and_validates() {
    let config = GatewayConfig::from_yaml_str(VALID).expect("valid config should parse");
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.strategy.strategy_type, StrategyType::Fastest);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.endpoints.len(), 2);
}

#[test]
fn missing_endpoints_fails_validation() {
    let doc = r#"
endpoints: []
"#;
    let err = GatewayConfig::from_yaml_str(doc).unwrap_err();
    assert!(err.to_string().contains("at least one endpoint"));
}

#[test]
fn duplicate_endpoint_names_are_rejected() {
    let doc = r#"
endpoints:
  - name: a
    url: "https://a.example.com"
  - name: a
    url: "https://b.example.com"
"#;
    let err = GatewayConfig::from_yaml_str(doc).unwrap_err();
    assert!(err.to_string().contains("duplicate endpoint name"));
}

#[test]
fn invalid_url_is_rejected() {
    let doc = r#"
endpoints:
  - name: a
    url: "not a url"
"#;
    let err = GatewayConfig::from_yaml_str(doc).unwrap_err();
    assert!(err.to_string().contains("invalid url"));
}

#[test]
fn auth_enabled_without_token_is_rejected() {
    let doc = r#"
auth:
  enabled: true
endpoints:
  - name: a
    url: "https://a.example.com"
"#;
    let err = GatewayConfig::from_yaml_str(doc).unwrap_err();
    assert!(err.to_string().contains("auth.token"));
}

#[test]
fn backoff_base_greater_than_cap_is_rejected() {
    let doc = r#"
retry:
  base_backoff_ms: 5000
  cap_backoff_ms: 1000
endpoints:
  - name: a
    url: "https://a.example.com"
"#;
    let err = GatewayConfig::from_yaml_str(doc).unwrap_err();
    assert!(err.to_string().contains("base_backoff_ms"));
}

#[test]
fn empty_group_name_defaults_to_default_group() {
    let doc = r#"
endpoints:
  - name: a
    url: "https://a.example.com"
"#;
    let config = GatewayConfig::from_yaml_str(doc).unwrap();
    assert_eq!(config.endpoints[0].group, "Default");
}
