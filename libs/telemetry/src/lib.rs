//! Logging bootstrap for agent assist bridge binaries.

use anyhow::Result;

mod config;
mod tracing_init;

pub use config::{DEFAULT_FILTER, TelemetryConfig};
pub use tracing_init::init_telemetry;

/// Installs the subscriber configured from `RUST_LOG`, `LOG_FORMAT` and `SERVICE_NAME`.
pub fn install(service_name: &str, service_version: &str) -> Result<()> {
    init_telemetry(&TelemetryConfig::from_env(service_name, service_version))
}
