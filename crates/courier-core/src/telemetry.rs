//! Tracing initialization for the client harnesses.

use crate::CourierResult;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Service name reported in log output.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Whether to emit human-readable console output.
    #[serde(default = "default_console_output")]
    pub console_output: bool,

    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_service_name() -> String {
    "courier".to_string()
}

fn default_console_output() -> bool {
    true
}

fn default_filter() -> String {
    "info,courier=debug".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            console_output: default_console_output(),
            filter: default_filter(),
        }
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Safe to call
/// with console output disabled, in which case nothing is installed.
pub fn init_telemetry(config: &TelemetryConfig) -> CourierResult<()> {
    if !config.console_output {
        return Ok(());
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    tracing::info!(service_name = %config.service_name, "Telemetry initialized");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "courier");
        assert!(config.console_output);
        assert!(config.filter.contains("courier=debug"));
    }
}
