//! Logging and metrics bootstrap for the Inboxflow engine.

use serde::{Deserialize, Serialize};
use tracing::info;

pub mod logging;
pub mod metrics;

/// Configuration for initializing the monitoring system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log level filter used when `RUST_LOG` is unset (e.g., "info,inboxflow_core=debug")
    pub log_filter: String,
    /// JSON log lines instead of the pretty developer format
    pub enable_json_logging: bool,
    /// Install the Prometheus recorder
    pub enable_metrics: bool,
    /// Environment (dev, staging, prod)
    pub environment: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "inboxflow".to_string(),
            log_filter: "info".to_string(),
            enable_json_logging: false,
            enable_metrics: true,
            environment: "dev".to_string(),
        }
    }
}

/// Initialize logging and, when enabled, the metrics recorder
pub fn init(config: &MonitoringConfig) -> anyhow::Result<()> {
    logging::init_logging(config)?;

    if config.enable_metrics {
        metrics::install_recorder()?;
    }

    info!(
        service_name = %config.service_name,
        environment = %config.environment,
        metrics = config.enable_metrics,
        "Monitoring initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = MonitoringConfig::default();
        assert_eq!(config.service_name, "inboxflow");
        assert_eq!(config.log_filter, "info");
        assert!(!config.enable_json_logging);
        assert!(config.enable_metrics);
    }
}
