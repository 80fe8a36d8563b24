//! Observability middleware.

use crate::api::config::AppConfig;
use tracing::info;

/// Log the observability settings the process started with.
///
/// Spans and events go through the `tracing` subscriber installed by the binary; an
/// OTLP endpoint is reported but exporting is left to a collector sidecar.
pub fn init_observability(config: &AppConfig) {
    match &config.otlp_endpoint {
        Some(endpoint) => info!(
            "Observability initialized with service_name={}, endpoint={}",
            config.service_name, endpoint
        ),
        None => info!(
            "Observability initialized with service_name={} (set OTEL_EXPORTER_OTLP_ENDPOINT to export)",
            config.service_name
        ),
    }
}
