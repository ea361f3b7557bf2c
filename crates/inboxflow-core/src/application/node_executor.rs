use crate::{
    domain::execution_state::FlowExecutionState,
    domain::expression::build_evaluation_context,
    domain::flow_definition::{FlowDefinition, FlowNode, NodeKind},
    domain::node_result::NodeExecutionResult,
    types::{ContactId, ConversationId},
    CoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::handlers;

/// Read-only view of an execution handed to a node handler
pub struct NodeContext<'a> {
    /// Execution snapshot
    pub state: &'a FlowExecutionState,

    /// Flow being executed
    pub flow: &'a FlowDefinition,

    /// Reply being delivered to the node, if the execution was resumed by one
    pub user_input: Option<&'a str>,

    /// Clock reading for this step
    pub now: DateTime<Utc>,
}

impl<'a> NodeContext<'a> {
    /// Create a context for one step
    pub fn new(
        state: &'a FlowExecutionState,
        flow: &'a FlowDefinition,
        user_input: Option<&'a str>,
    ) -> Self {
        Self {
            state,
            flow,
            user_input,
            now: Utc::now(),
        }
    }

    /// JSON document conditions and templates see
    pub fn evaluation_context(&self) -> Value {
        build_evaluation_context(self.state, self.flow, self.user_input)
    }
}

/// Executes one kind of node
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Run `node` and report where the execution goes next
    async fn execute(
        &self,
        node: &FlowNode,
        ctx: &NodeContext<'_>,
    ) -> Result<NodeExecutionResult, CoreError>;
}

/// Outbound channel for messages to contacts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Deliver `text` to the contact on the conversation's channel
    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        contact_id: &ContactId,
        text: &str,
    ) -> Result<(), CoreError>;
}

/// Outbound HTTP request made by a webhook node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRequest {
    /// Target URL
    pub url: String,

    /// HTTP method
    pub method: String,

    /// Request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// JSON body
    #[serde(default)]
    pub body: Option<Value>,
}

/// Response to a webhook request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookResponse {
    /// HTTP status code
    pub status: u16,

    /// Body, parsed as JSON when possible, otherwise a JSON string
    pub body: Value,
}

impl WebhookResponse {
    /// 2xx status
    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client used by webhook nodes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebhookClient: Send + Sync {
    /// Perform the request. Transport failures are errors; any HTTP status is a response.
    async fn call(&self, request: WebhookRequest) -> Result<WebhookResponse, CoreError>;
}

/// Dispatches nodes to the handler registered for their kind
#[derive(Clone, Default)]
pub struct NodeExecutor {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl NodeExecutor {
    /// Create an executor with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an executor with every built-in handler registered
    pub fn with_builtin_handlers(
        sender: Arc<dyn MessageSender>,
        webhook_client: Arc<dyn WebhookClient>,
    ) -> Self {
        let mut executor = Self::new();
        executor.register(NodeKind::Trigger, Arc::new(handlers::TriggerHandler));
        executor.register(NodeKind::Condition, Arc::new(handlers::ConditionHandler));
        executor.register(
            NodeKind::Message,
            Arc::new(handlers::MessageHandler::new(sender.clone())),
        );
        executor.register(
            NodeKind::Webhook,
            Arc::new(handlers::WebhookHandler::new(webhook_client)),
        );
        executor.register(NodeKind::CaptureInput, Arc::new(handlers::CaptureInputHandler));
        executor.register(NodeKind::Delay, Arc::new(handlers::DelayHandler));
        executor.register(
            NodeKind::WaitForInput,
            Arc::new(handlers::WaitForInputHandler::new(sender)),
        );
        executor.register(NodeKind::End, Arc::new(handlers::EndHandler));
        executor
    }

    /// Register or replace the handler for `kind`
    pub fn register(&mut self, kind: NodeKind, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Whether a handler exists for `kind`
    pub fn has_handler(&self, kind: NodeKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Execute `node` with the handler registered for its kind
    pub async fn execute(
        &self,
        node: &FlowNode,
        ctx: &NodeContext<'_>,
    ) -> Result<NodeExecutionResult, CoreError> {
        let handler = self
            .handlers
            .get(&node.kind)
            .ok_or_else(|| CoreError::NodeHandlerNotFound(node.kind.as_str().to_string()))?;

        tracing::debug!(
            execution_id = %ctx.state.id,
            node_id = %node.id,
            node_kind = node.kind.as_str(),
            "Executing node"
        );

        handler.execute(node, ctx).await
    }
}
