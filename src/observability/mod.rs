// src/observability/mod.rs
//! Logging and metrics setup shared by both binaries
//!
//! `RUST_LOG` overrides `logging.level`. Metrics are exported in Prometheus
//! text format on `metrics.listen` when `metrics.enabled` is set; otherwise
//! the `metrics` macros are no-ops.

use crate::utils::config::{LogFormat, LoggingConfig, MetricsConfig};
use crate::utils::errors::{FleetError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| FleetError::ConfigError(format!("invalid log level '{}': {}", config.level, e)))?;

    let (json, pretty) = match config.format {
        LogFormat::Json => (
            Some(tracing_subscriber::fmt::layer().json().flatten_event(true)),
            None,
        ),
        LogFormat::Pretty => (None, Some(tracing_subscriber::fmt::layer().with_target(true))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()
        .map_err(|e| FleetError::RuntimeError(format!("tracing already initialized: {}", e)))
}

/// Start the Prometheus exporter when enabled
///
/// Must run inside a tokio runtime; the exporter serves from a spawned task.
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr = config.listen_addr()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| FleetError::RuntimeError(format!("failed to start metrics exporter: {}", e)))?;

    info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}
