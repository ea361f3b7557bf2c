//! Inbound trigger endpoints: chat messages and flow webhooks

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use inboxflow_core::{ContactId, ConversationId, FlowId, TriggerEvent, TriggerOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ServerError, ServerResult};
use crate::server::AppState;

/// Inbound chat message
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Conversation the message arrived in
    pub conversation_id: ConversationId,
    /// Sender
    pub contact_id: ContactId,
    /// Channel name
    #[serde(default)]
    pub channel: Option<String>,
    /// Message text
    pub text: String,
    /// Contact attributes
    #[serde(default)]
    pub contact: Option<Value>,
}

/// What a trigger did
#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    /// One entry per execution started or resumed
    pub outcomes: Vec<TriggerOutcome>,
}

/// Conversation and contact of a webhook call, when given in the query string
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookParams {
    /// Conversation id
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Contact id
    #[serde(default)]
    pub contact_id: Option<String>,
}

/// Route an inbound message to a waiting execution or to matching flows
pub async fn receive_message(
    State(state): State<AppState>,
    Json(message): Json<InboundMessage>,
) -> ServerResult<Json<TriggerResponse>> {
    if message.text.trim().is_empty() {
        return Err(ServerError::ValidationError(
            "Message text must not be empty".to_string(),
        ));
    }

    let mut event = TriggerEvent::message(message.conversation_id, message.contact_id, message.text);
    if let Some(channel) = message.channel {
        event = event.with_channel(channel);
    }
    if let Some(contact) = message.contact {
        event = event.with_contact(contact);
    }

    let outcomes = state.engine.handle_trigger(event).await?;
    Ok(Json(TriggerResponse { outcomes }))
}

fn id_from(query: Option<String>, body: &Value, field: &str) -> ServerResult<String> {
    query
        .or_else(|| body.get(field).and_then(Value::as_str).map(str::to_string))
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ServerError::ValidationError(format!("Missing {}", field)))
}

/// Fire the webhook trigger of one flow
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(flow_id): Path<FlowId>,
    Query(params): Query<WebhookParams>,
    Json(payload): Json<Value>,
) -> ServerResult<impl IntoResponse> {
    let conversation_id = id_from(params.conversation_id, &payload, "conversationId")?;
    let contact_id = id_from(params.contact_id, &payload, "contactId")?;

    let flow = state.definitions.get_definition(&flow_id).await?;
    if !flow.active {
        return Err(ServerError::Conflict(format!("Flow {} is not active", flow_id)));
    }

    let event = TriggerEvent::webhook(flow_id, conversation_id, contact_id, payload);
    let outcomes = state.engine.handle_trigger(event).await?;
    Ok((StatusCode::ACCEPTED, Json(TriggerResponse { outcomes })))
}
