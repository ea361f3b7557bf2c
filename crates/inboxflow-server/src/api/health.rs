//! Health check and metrics endpoints

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::server::AppState;

/// Health check handler
///
/// Reports the build version and how many live event subscribers exist.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    tracing::debug!("Health check requested");

    Json(json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION"),
        "subscribers": state.broadcaster.subscriber_count(),
    }))
}

/// Prometheus exposition, or 404 when no recorder is installed
pub async fn metrics() -> impl IntoResponse {
    match inboxflow_monitoring::metrics::render() {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}
