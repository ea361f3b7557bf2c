//! Live execution events over WebSocket

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use inboxflow_core::{ConversationId, EventBroadcaster, EventSubscription};
use inboxflow_monitoring::metrics::EngineMetrics;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::server::AppState;

/// Subscription scope
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    /// Only stream this conversation's events
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
}

/// Upgrade and stream `FlowExecutionEvent` JSON frames
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    // Subscribe before the upgrade so nothing published in between is missed
    let subscription = match params.conversation_id {
        Some(conversation_id) => state.broadcaster.subscribe_conversation(conversation_id),
        None => state.broadcaster.subscribe_all(),
    };
    let broadcaster = state.broadcaster.clone();
    ws.on_upgrade(move |socket| stream_events(socket, subscription, broadcaster))
}

async fn stream_events(
    socket: WebSocket,
    mut subscription: EventSubscription,
    broadcaster: EventBroadcaster,
) {
    EngineMetrics::set_ws_subscribers(broadcaster.subscriber_count());
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let frame = match serde_json::to_string(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode execution event");
                        continue;
                    }
                };
                if sender.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    drop(subscription);
    debug!("WebSocket subscriber disconnected");
    EngineMetrics::set_ws_subscribers(broadcaster.subscriber_count());
}
