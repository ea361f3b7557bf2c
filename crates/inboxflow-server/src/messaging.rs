//! Outbound message delivery and engine telemetry adapters

use async_trait::async_trait;
use inboxflow_core::{
    ContactId, ConversationId, CoreError, ExecutionEventHandler, ExecutionEventKind,
    FlowExecutionEvent, MessageSender,
};
use inboxflow_monitoring::metrics::EngineMetrics;

/// Message sender that only logs.
///
/// Delivery to a real channel gateway happens outside this service.
#[derive(Debug, Default, Clone)]
pub struct LoggingMessageSender;

#[async_trait]
impl MessageSender for LoggingMessageSender {
    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        contact_id: &ContactId,
        text: &str,
    ) -> Result<(), CoreError> {
        tracing::info!(
            conversation_id = %conversation_id,
            contact_id = %contact_id,
            length = text.len(),
            "Outbound message"
        );
        Ok(())
    }
}

/// Feeds lifecycle events into the metrics registry
#[derive(Debug, Default, Clone)]
pub struct MetricsEventHandler;

#[async_trait]
impl ExecutionEventHandler for MetricsEventHandler {
    async fn handle_event(&self, event: FlowExecutionEvent) -> Result<(), CoreError> {
        let duration_ms = match &event.kind {
            ExecutionEventKind::Completed { duration_ms, .. }
            | ExecutionEventKind::Failed { duration_ms, .. } => Some(*duration_ms),
            _ => None,
        };
        EngineMetrics::record_execution_event(
            event.event_type(),
            event.flow_id.as_str(),
            duration_ms,
        );
        Ok(())
    }
}
