//! Unit tests for environment-driven configuration

use serial_test::serial;
use std::collections::HashMap;
use std::time::Duration;

use workbench_api::config::{AppConfig, ConfigError};

const VARS: &[&str] = &[
    "AUTH_SERVICE_ADDR",
    "BETTERAUTH_URL",
    "JWKS_URL",
    "AUTH_ADAPTER_SECRET",
    "AUTH_ADAPTER_DB",
    "HTTP_CLIENT_TIMEOUT_SECS",
    "FLOW_TIMEOUT_SECS",
    "FLOW_MAX_PARALLEL",
    "EVENT_BUFFER",
    "DEPENDENCY_MIN_TOKEN_LEN",
    "RATE_LIMIT_PER_MINUTE",
    "SHUTDOWN_DRAIN_SECS",
    "CORS_ALLOWED_ORIGINS",
    "OTEL_SERVICE_NAME",
    "OTEL_EXPORTER_OTLP_ENDPOINT",
];

fn clear_env() {
    for name in VARS {
        // SAFETY: every test touching the process environment runs under #[serial].
        unsafe { std::env::remove_var(name) };
    }
}

fn set_env(name: &str, value: &str) {
    // SAFETY: see clear_env.
    unsafe { std::env::set_var(name, value) };
}

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name: &str| map.get(name).cloned()
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_env();
    let config = AppConfig::from_env().unwrap();
    assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8081");
    assert_eq!(config.adapter_secret, None);
    assert_eq!(config.flow_timeout, Duration::from_secs(300));
    assert!(config.cors_origins.is_empty());
}

#[test]
#[serial]
fn test_from_env_reads_process_environment() {
    clear_env();
    set_env("AUTH_SERVICE_ADDR", "127.0.0.1:7000");
    set_env("BETTERAUTH_URL", "http://auth.internal:3001/api/auth");
    set_env("JWKS_URL", "http://auth.internal:3001/api/auth/jwks");
    set_env("AUTH_ADAPTER_SECRET", "s3cret");
    set_env("AUTH_ADAPTER_DB", "/tmp/adapter.db");
    set_env("SHUTDOWN_DRAIN_SECS", "0");
    set_env("CORS_ALLOWED_ORIGINS", "http://a.test, ,http://b.test");

    let config = AppConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.bind_addr.port(), 7000);
    assert_eq!(config.betterauth_url, "http://auth.internal:3001/api/auth");
    assert_eq!(config.jwks_url, "http://auth.internal:3001/api/auth/jwks");
    assert_eq!(config.adapter_secret.as_deref(), Some("s3cret"));
    assert_eq!(
        config.adapter_db.as_deref(),
        Some(std::path::Path::new("/tmp/adapter.db"))
    );
    assert_eq!(config.shutdown_drain, Duration::ZERO);
    assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
}

#[test]
#[serial]
fn test_from_env_rejects_bad_url() {
    clear_env();
    set_env("JWKS_URL", "not a url");
    let err = AppConfig::from_env().unwrap_err();
    clear_env();
    assert!(matches!(err, ConfigError::Invalid { name: "JWKS_URL", .. }));
}

#[test]
fn test_numeric_settings() {
    let config = AppConfig::from_lookup(lookup(&[
        ("HTTP_CLIENT_TIMEOUT_SECS", "5"),
        ("FLOW_TIMEOUT_SECS", " 60 "),
        ("EVENT_BUFFER", "32"),
        ("DEPENDENCY_MIN_TOKEN_LEN", "12"),
        ("RATE_LIMIT_PER_MINUTE", "10"),
    ]))
    .unwrap();
    assert_eq!(config.http_client_timeout, Duration::from_secs(5));
    assert_eq!(config.flow_timeout, Duration::from_secs(60));
    assert_eq!(config.event_buffer, 32);
    assert_eq!(config.dependency_min_token_len, 12);
    assert_eq!(config.rate_limit_per_minute, 10);
}

#[test]
fn test_invalid_values_name_the_variable() {
    for (name, value) in [
        ("AUTH_SERVICE_ADDR", "localhost"),
        ("EVENT_BUFFER", "0"),
        ("DEPENDENCY_MIN_TOKEN_LEN", "-1"),
        ("RATE_LIMIT_PER_MINUTE", "99999999999"),
        ("BETTERAUTH_URL", "::"),
    ] {
        let err = AppConfig::from_lookup(lookup(&[(name, value)])).unwrap_err();
        let ConfigError::Invalid { name: got, .. } = &err;
        assert_eq!(*got, name, "{}", err);
        assert!(err.to_string().contains(name));
    }
}

#[test]
fn test_observability_settings() {
    let config = AppConfig::from_lookup(lookup(&[
        ("OTEL_SERVICE_NAME", "workbench-staging"),
        ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
    ]))
    .unwrap();
    assert_eq!(config.service_name, "workbench-staging");
    assert_eq!(config.otlp_endpoint.as_deref(), Some("http://collector:4317"));
}
