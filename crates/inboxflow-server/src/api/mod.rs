//! API module for the Inboxflow Server
//!
//! This module contains the API routes and handlers.

use axum::{
    extract::{MatchedPath, Request},
    middleware::{self as axum_middleware, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use inboxflow_monitoring::metrics::ServerMetrics;
use std::time::Instant;
use tower_http::trace::TraceLayer;

pub mod errors;
pub mod executions;
pub mod flows;
pub mod health;
pub mod inbound;
pub mod ws;

use crate::server::AppState;

/// Build the router for API endpoints
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Flow management
        .route("/v1/flows", get(flows::list_flows).post(flows::create_flow))
        .route(
            "/v1/flows/:flow_id",
            get(flows::get_flow).delete(flows::delete_flow),
        )
        .route("/v1/flows/:flow_id/start", post(flows::start_flow))
        // Triggers
        .route("/v1/inbound/messages", post(inbound::receive_message))
        .route("/v1/webhooks/:flow_id", post(inbound::receive_webhook))
        // Executions
        .route("/v1/executions", get(executions::list_executions))
        .route("/v1/executions/:execution_id", get(executions::get_execution))
        .route(
            "/v1/executions/:execution_id/cancel",
            post(executions::cancel_execution),
        )
        // Live events
        .route("/v1/ws", get(ws::ws_handler))
        // Health check
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .route_layer(axum_middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        // Shared state
        .with_state(state)
}

/// Record count and latency of every routed request
async fn track_metrics(request: Request, next: Next) -> Response {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let method = request.method().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    ServerMetrics::record_http_request(&path, &method, response.status().as_u16(), start.elapsed());
    response
}
