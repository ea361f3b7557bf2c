//! Execution inspection and cancellation endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use inboxflow_core::{ExecutionFilter, ExecutionId, FlowExecutionState};
use serde::Deserialize;

use crate::error::ServerResult;
use crate::server::AppState;

const DEFAULT_CANCEL_REASON: &str = "cancelled";

/// Body of a cancel request
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    /// Recorded as the execution error
    #[serde(default)]
    pub reason: Option<String>,
}

/// List executions matching the query
pub async fn list_executions(
    State(state): State<AppState>,
    Query(filter): Query<ExecutionFilter>,
) -> ServerResult<Json<Vec<FlowExecutionState>>> {
    Ok(Json(state.engine.list_executions(&filter).await?))
}

/// Fetch one execution
pub async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<ExecutionId>,
) -> ServerResult<Json<FlowExecutionState>> {
    Ok(Json(state.engine.get_execution(&execution_id).await?))
}

/// Fail a running or waiting execution
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<ExecutionId>,
    request: Option<Json<CancelRequest>>,
) -> ServerResult<Json<FlowExecutionState>> {
    let reason = request
        .and_then(|Json(body)| body.reason)
        .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
    Ok(Json(state.engine.cancel(&execution_id, &reason).await?))
}
