//! Configuration for the Inboxflow Server
//!
//! This module contains the configuration types and loading functionality.

use inboxflow_core::{EngineConfig, MAX_DELAY_SECONDS};
use inboxflow_monitoring::MonitoringConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ServerError, ServerResult};

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub bind_address: String,

    /// Time budget for outbound webhook calls
    #[serde(default = "default_webhook_timeout_ms")]
    pub webhook_timeout_ms: u64,

    /// Finished executions kept in memory before the oldest are evicted
    #[serde(default = "default_execution_retention")]
    pub execution_retention: usize,

    /// Execution engine limits
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_webhook_timeout_ms() -> u64 {
    10_000
}

fn default_execution_retention() -> usize {
    10_000
}

fn override_from<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(name) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!("Invalid {} value: {}", name, raw),
        }
    }
}

fn flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn load() -> ServerResult<Self> {
        Self::load_from(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> ServerResult<Self> {
        // Start with defaults
        let mut config = Self::default();

        override_from(&lookup, "SERVER_PORT", &mut config.port);

        if let Some(host) = lookup("SERVER_HOST") {
            config.bind_address = host;
        }

        override_from(&lookup, "WEBHOOK_TIMEOUT_MS", &mut config.webhook_timeout_ms);
        override_from(&lookup, "EXECUTION_RETENTION", &mut config.execution_retention);

        let engine = &mut config.engine;
        override_from(&lookup, "ENGINE_MAX_CONCURRENT", &mut engine.max_concurrent_executions);
        override_from(&lookup, "ENGINE_MAX_STEPS", &mut engine.max_steps_per_run);
        override_from(&lookup, "ENGINE_NODE_TIMEOUT_MS", &mut engine.node_timeout_ms);
        override_from(&lookup, "ENGINE_MAX_RETRIES", &mut engine.max_retries);
        override_from(&lookup, "ENGINE_RETRY_BACKOFF_MS", &mut engine.retry_backoff_ms);
        override_from(&lookup, "SCHEDULER_INTERVAL_MS", &mut engine.scheduler_interval_ms);
        override_from(&lookup, "EVENT_BUFFER_SIZE", &mut engine.event_buffer);

        if let Some(raw) = lookup("ENGINE_WAIT_TIMEOUT_SECS") {
            if raw.trim().eq_ignore_ascii_case("none") {
                engine.default_wait_timeout_secs = None;
            } else if let Ok(secs) = raw.trim().parse::<u64>() {
                engine.default_wait_timeout_secs = Some(secs);
            } else {
                warn!("Invalid ENGINE_WAIT_TIMEOUT_SECS value: {}", raw);
            }
        }

        config.validate()?;

        info!(
            port = config.port,
            bind_address = %config.bind_address,
            max_concurrent_executions = config.engine.max_concurrent_executions,
            "Loaded server configuration"
        );
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> ServerResult<()> {
        if self.engine.max_concurrent_executions == 0 {
            return Err(ServerError::ConfigError(
                "ENGINE_MAX_CONCURRENT must be at least 1".to_string(),
            ));
        }
        if self.engine.max_steps_per_run == 0 {
            return Err(ServerError::ConfigError(
                "ENGINE_MAX_STEPS must be at least 1".to_string(),
            ));
        }
        if self.engine.event_buffer == 0 {
            return Err(ServerError::ConfigError(
                "EVENT_BUFFER_SIZE must be at least 1".to_string(),
            ));
        }
        if self.engine.scheduler_interval_ms == 0 {
            return Err(ServerError::ConfigError(
                "SCHEDULER_INTERVAL_MS must be at least 1".to_string(),
            ));
        }
        if let Some(secs) = self.engine.default_wait_timeout_secs {
            if secs > MAX_DELAY_SECONDS {
                return Err(ServerError::ConfigError(format!(
                    "ENGINE_WAIT_TIMEOUT_SECS must be at most {}",
                    MAX_DELAY_SECONDS
                )));
            }
        }
        Ok(())
    }

    /// Outbound webhook time budget
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_host(),
            webhook_timeout_ms: default_webhook_timeout_ms(),
            execution_retention: default_execution_retention(),
            engine: EngineConfig::default(),
        }
    }
}

/// Monitoring settings from `LOG_LEVEL`, `LOG_JSON`, `METRICS_ENABLED` and `ENVIRONMENT`.
///
/// Read before logging is up, so invalid values silently keep their defaults.
pub fn monitoring_config_from_env() -> MonitoringConfig {
    monitoring_config_from(|name| env::var(name).ok())
}

/// Monitoring settings from an arbitrary variable source
pub fn monitoring_config_from(lookup: impl Fn(&str) -> Option<String>) -> MonitoringConfig {
    let defaults = MonitoringConfig::default();
    MonitoringConfig {
        service_name: "inboxflow-server".to_string(),
        log_filter: lookup("LOG_LEVEL").unwrap_or(defaults.log_filter),
        enable_json_logging: lookup("LOG_JSON").map_or(defaults.enable_json_logging, |v| flag(&v)),
        enable_metrics: lookup("METRICS_ENABLED").map_or(defaults.enable_metrics, |v| flag(&v)),
        environment: lookup("ENVIRONMENT").unwrap_or(defaults.environment),
    }
}
