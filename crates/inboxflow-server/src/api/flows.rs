//! Flow definition endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use inboxflow_core::{ContactId, ConversationId, FlowDefinition, FlowId, TriggerEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::ServerResult;
use crate::server::AppState;

/// Result of deleting a flow
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndeployResponse {
    /// Deleted flow
    pub flow_id: FlowId,
    /// Unfinished executions that were failed
    pub failed_executions: usize,
}

/// Body of a manual flow start
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartFlowRequest {
    /// Conversation to run the flow in
    pub conversation_id: ConversationId,
    /// Contact to advance
    pub contact_id: ContactId,
    /// Channel the conversation lives on
    #[serde(default)]
    pub channel: Option<String>,
    /// Contact attributes
    #[serde(default)]
    pub contact: Option<Value>,
    /// Extra data exposed to expressions as `message.payload`
    #[serde(default)]
    pub payload: Option<Value>,
}

/// List all flows
pub async fn list_flows(State(state): State<AppState>) -> ServerResult<Json<Vec<FlowDefinition>>> {
    Ok(Json(state.definitions.list_definitions().await?))
}

/// Validate and store a flow, replacing any flow with the same id
pub async fn create_flow(
    State(state): State<AppState>,
    Json(definition): Json<FlowDefinition>,
) -> ServerResult<impl IntoResponse> {
    state.definitions.deploy_definition(definition.clone()).await?;
    Ok((StatusCode::CREATED, Json(definition)))
}

/// Fetch one flow
pub async fn get_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<FlowId>,
) -> ServerResult<Json<FlowDefinition>> {
    Ok(Json(state.definitions.get_definition(&flow_id).await?))
}

/// Delete a flow and fail its unfinished executions
pub async fn delete_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<FlowId>,
) -> ServerResult<Json<UndeployResponse>> {
    let failed_executions = state.definitions.undeploy_definition(&flow_id).await?;
    Ok(Json(UndeployResponse {
        flow_id,
        failed_executions,
    }))
}

/// Start a flow for one contact regardless of its trigger
pub async fn start_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<FlowId>,
    Json(request): Json<StartFlowRequest>,
) -> ServerResult<impl IntoResponse> {
    let mut event = TriggerEvent::schedule(
        flow_id.clone(),
        request.conversation_id,
        request.contact_id,
    );
    if let Some(channel) = request.channel {
        event = event.with_channel(channel);
    }
    if let Some(contact) = request.contact {
        event = event.with_contact(contact);
    }
    if let Some(payload) = request.payload {
        event.payload = payload;
    }

    let execution_id = state.engine.start_execution(&flow_id, event).await?;
    let execution = state.engine.get_execution(&execution_id).await?;
    info!(flow_id = %flow_id, execution_id = %execution_id, "Flow started manually");

    Ok((StatusCode::CREATED, Json(execution)))
}
