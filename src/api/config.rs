//! Process configuration read from environment variables.

use crate::services::dependency_inference::DEFAULT_MIN_TOKEN_LEN;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub betterauth_url: String,
    pub jwks_url: String,
    /// Shared secret the auth backend presents to the adapter. The adapter is not
    /// mounted without one.
    pub adapter_secret: Option<String>,
    /// SQLite file for the adapter; in-memory when unset.
    pub adapter_db: Option<PathBuf>,
    pub http_client_timeout: Duration,
    pub flow_timeout: Duration,
    pub flow_max_parallel: usize,
    pub event_buffer: usize,
    pub dependency_min_token_len: usize,
    pub rate_limit_per_minute: u32,
    pub shutdown_drain: Duration,
    /// Origins allowed by CORS; every origin when empty.
    pub cors_origins: Vec<String>,
    pub service_name: String,
    pub otlp_endpoint: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            betterauth_url: "http://localhost:3001/api/auth".to_string(),
            jwks_url: "http://localhost:3001/api/auth/jwks".to_string(),
            adapter_secret: None,
            adapter_db: None,
            http_client_timeout: Duration::from_secs(30),
            flow_timeout: Duration::from_secs(300),
            flow_max_parallel: 8,
            event_buffer: 256,
            dependency_min_token_len: DEFAULT_MIN_TOKEN_LEN,
            rate_limit_per_minute: 100,
            shutdown_drain: Duration::from_secs(10),
            cors_origins: Vec::new(),
            service_name: "workbench-api".to_string(),
            otlp_endpoint: None,
        }
    }
}

fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
        value,
    })
}

fn positive(name: &'static str, value: String) -> Result<u64, ConfigError> {
    let n: u64 = parse(name, value.clone())?;
    if n == 0 {
        return Err(ConfigError::Invalid {
            name,
            value,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(n)
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset or empty variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("AUTH_SERVICE_ADDR") {
            config.bind_addr = parse("AUTH_SERVICE_ADDR", v)?;
        }
        if let Some(v) = get("BETTERAUTH_URL") {
            url::Url::parse(&v).map_err(|e| ConfigError::Invalid {
                name: "BETTERAUTH_URL",
                value: v.clone(),
                reason: e.to_string(),
            })?;
            config.betterauth_url = v;
        }
        if let Some(v) = get("JWKS_URL") {
            url::Url::parse(&v).map_err(|e| ConfigError::Invalid {
                name: "JWKS_URL",
                value: v.clone(),
                reason: e.to_string(),
            })?;
            config.jwks_url = v;
        }
        config.adapter_secret = get("AUTH_ADAPTER_SECRET");
        config.adapter_db = get("AUTH_ADAPTER_DB").map(PathBuf::from);
        if let Some(v) = get("HTTP_CLIENT_TIMEOUT_SECS") {
            config.http_client_timeout = Duration::from_secs(positive("HTTP_CLIENT_TIMEOUT_SECS", v)?);
        }
        if let Some(v) = get("FLOW_TIMEOUT_SECS") {
            config.flow_timeout = Duration::from_secs(positive("FLOW_TIMEOUT_SECS", v)?);
        }
        if let Some(v) = get("FLOW_MAX_PARALLEL") {
            config.flow_max_parallel = positive("FLOW_MAX_PARALLEL", v)? as usize;
        }
        if let Some(v) = get("EVENT_BUFFER") {
            config.event_buffer = positive("EVENT_BUFFER", v)? as usize;
        }
        if let Some(v) = get("DEPENDENCY_MIN_TOKEN_LEN") {
            config.dependency_min_token_len = positive("DEPENDENCY_MIN_TOKEN_LEN", v)? as usize;
        }
        if let Some(v) = get("RATE_LIMIT_PER_MINUTE") {
            let n = positive("RATE_LIMIT_PER_MINUTE", v.clone())?;
            config.rate_limit_per_minute = u32::try_from(n).map_err(|e| ConfigError::Invalid {
                name: "RATE_LIMIT_PER_MINUTE",
                value: v,
                reason: e.to_string(),
            })?;
        }
        if let Some(v) = get("SHUTDOWN_DRAIN_SECS") {
            config.shutdown_drain = Duration::from_secs(parse("SHUTDOWN_DRAIN_SECS", v)?);
        }
        if let Some(v) = get("CORS_ALLOWED_ORIGINS") {
            config.cors_origins = v
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(v) = get("OTEL_SERVICE_NAME") {
            config.service_name = v;
        }
        config.otlp_endpoint = get("OTEL_EXPORTER_OTLP_ENDPOINT");
        Ok(config)
    }
}
