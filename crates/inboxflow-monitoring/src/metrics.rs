//! Engine and HTTP metrics recorded through the `metrics` facade.
//!
//! Without an installed recorder every call is a no-op.

#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "prometheus")]
use once_cell::sync::OnceCell;
use std::time::Duration;

/// Lifecycle events by type and flow
pub const EXECUTION_EVENTS: &str = "inboxflow_execution_events_total";
/// Wall time of finished executions
pub const EXECUTION_DURATION: &str = "inboxflow_execution_duration_ms";
/// HTTP requests by route, method and status
pub const HTTP_REQUESTS: &str = "inboxflow_http_requests_total";
/// HTTP request latency
pub const HTTP_DURATION: &str = "inboxflow_http_request_duration_ms";
/// Live WebSocket subscribers
pub const WS_SUBSCRIBERS: &str = "inboxflow_ws_subscribers";

#[cfg(feature = "prometheus")]
static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the process-wide Prometheus recorder. Calling it again is a no-op.
pub fn install_recorder() -> anyhow::Result<()> {
    #[cfg(feature = "prometheus")]
    PROMETHEUS.get_or_try_init(|| PrometheusBuilder::new().install_recorder())?;

    Ok(())
}

/// Current metrics in the Prometheus text format, if a recorder is installed
pub fn render() -> Option<String> {
    #[cfg(feature = "prometheus")]
    {
        PROMETHEUS.get().map(|handle| handle.render())
    }
    #[cfg(not(feature = "prometheus"))]
    {
        None
    }
}

/// Flow engine metrics
pub struct EngineMetrics;

impl EngineMetrics {
    /// Count a lifecycle event. Terminal events also carry the execution duration.
    pub fn record_execution_event(event_type: &str, flow_id: &str, duration_ms: Option<i64>) {
        metrics::counter!(
            EXECUTION_EVENTS,
            1,
            "event" => event_type.to_string(),
            "flow_id" => flow_id.to_string()
        );
        if let Some(duration_ms) = duration_ms {
            metrics::histogram!(
                EXECUTION_DURATION,
                duration_ms.max(0) as f64,
                "outcome" => event_type.to_string()
            );
        }
    }

    /// Track the number of live WebSocket subscribers
    pub fn set_ws_subscribers(count: usize) {
        metrics::gauge!(WS_SUBSCRIBERS, count as f64);
    }
}

/// HTTP surface metrics
pub struct ServerMetrics;

impl ServerMetrics {
    /// Record HTTP request
    pub fn record_http_request(path: &str, method: &str, status_code: u16, duration: Duration) {
        metrics::counter!(
            HTTP_REQUESTS,
            1,
            "path" => path.to_string(),
            "method" => method.to_string(),
            "status" => status_code.to_string()
        );
        metrics::histogram!(
            HTTP_DURATION,
            duration.as_secs_f64() * 1000.0,
            "path" => path.to_string()
        );
    }
}
