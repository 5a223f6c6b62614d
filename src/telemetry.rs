//! Telemetry setup for sherpa-dns.
//!
//! Installs the tracing subscriber from the configured log level and a
//! Prometheus recorder whose rendered registry the health endpoint serves.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize tracing and metrics. Returns the handle `/metrics` renders
/// from.
pub fn init(log_level: &str) -> Result<PrometheusHandle, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}
