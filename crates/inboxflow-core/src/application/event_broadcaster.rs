use crate::{domain::events::FlowExecutionEvent, types::ConversationId, CoreError};
use async_trait::async_trait;
use futures::Stream;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Handler for execution lifecycle events
#[async_trait]
pub trait ExecutionEventHandler: Send + Sync {
    /// Handle a lifecycle event
    async fn handle_event(&self, event: FlowExecutionEvent) -> Result<(), CoreError>;
}

/// Fan-out of lifecycle events to live subscribers
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<FlowExecutionEvent>,
}

impl EventBroadcaster {
    /// Create a broadcaster buffering up to `buffer_size` events per subscriber
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size.max(1));
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: FlowExecutionEvent) {
        let _ = self.sender.send(event);
    }

    /// Receive every event
    pub fn subscribe(&self) -> broadcast::Receiver<FlowExecutionEvent> {
        self.sender.subscribe()
    }

    /// Receive the events of one conversation
    pub fn subscribe_conversation(&self, conversation_id: ConversationId) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            conversation_id: Some(conversation_id),
        }
    }

    /// Receive every event through a lag-tolerant subscription
    pub fn subscribe_all(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            conversation_id: None,
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(128)
    }
}

#[async_trait]
impl ExecutionEventHandler for EventBroadcaster {
    async fn handle_event(&self, event: FlowExecutionEvent) -> Result<(), CoreError> {
        self.publish(event);
        Ok(())
    }
}

/// A subscription that skips over lost events instead of failing
pub struct EventSubscription {
    receiver: broadcast::Receiver<FlowExecutionEvent>,
    conversation_id: Option<ConversationId>,
}

impl EventSubscription {
    /// Next matching event, or `None` once the broadcaster is gone
    pub async fn recv(&mut self) -> Option<FlowExecutionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    let wanted = self
                        .conversation_id
                        .as_ref()
                        .map_or(true, |id| &event.conversation_id == id);
                    if wanted {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        skipped,
                        conversation_id = ?self.conversation_id,
                        "Execution event subscriber lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Turn the subscription into a stream
    pub fn into_stream(self) -> impl Stream<Item = FlowExecutionEvent> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|event| (event, subscription))
        })
    }
}

/// Logs lifecycle events through `tracing`
pub struct LoggingEventHandler;

#[async_trait]
impl ExecutionEventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: FlowExecutionEvent) -> Result<(), CoreError> {
        tracing::info!(
            event_type = event.event_type(),
            execution_id = %event.execution_id,
            flow_id = %event.flow_id,
            conversation_id = %event.conversation_id,
            "Execution event"
        );
        Ok(())
    }
}

/// Forwards each event to several handlers in order
#[derive(Clone, Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Arc<dyn ExecutionEventHandler>>,
}

impl CompositeEventHandler {
    /// Create an empty composite
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler
    pub fn with_handler(mut self, handler: Arc<dyn ExecutionEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }
}

#[async_trait]
impl ExecutionEventHandler for CompositeEventHandler {
    async fn handle_event(&self, event: FlowExecutionEvent) -> Result<(), CoreError> {
        for handler in &self.handlers {
            if let Err(e) = handler.handle_event(event.clone()).await {
                tracing::warn!(
                    execution_id = %event.execution_id,
                    error = %e,
                    "Execution event handler failed"
                );
            }
        }
        Ok(())
    }
}
