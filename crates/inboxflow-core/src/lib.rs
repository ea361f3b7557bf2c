//!
//! Inboxflow Core - Conversational flow execution engine
//!
//! This crate defines the domain model, storage contracts, node executor,
//! execution engine and lifecycle event broadcaster that advance contacts
//! through automation flows in response to inbound messages, webhooks and
//! schedules.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - flow graphs, execution state and storage contracts
pub mod domain;

/// Application services - node execution, the step loop and event fan-out
pub mod application;

/// Engine configuration
pub mod config;

/// Core types
pub mod types;

/// Error types
pub mod error;

/// In-memory collaborators
#[cfg(feature = "testing")]
pub mod testing;

// Re-export key types
pub use config::EngineConfig;
pub use error::CoreError;
pub use types::{ContactId, ConversationId, ExecutionId, FlowId, NodeId, TriggerEvent, TriggerKind};

// Re-export main API types for easy use
pub use application::event_broadcaster::{
    CompositeEventHandler, EventBroadcaster, EventSubscription, ExecutionEventHandler,
    LoggingEventHandler,
};
pub use application::flow_definition_service::FlowDefinitionService;
pub use application::flow_execution_service::{FlowExecutionService, TriggerOutcome};
pub use application::handlers::MAX_DELAY_SECONDS;
pub use application::node_executor::{
    MessageSender, NodeContext, NodeExecutor, NodeHandler, WebhookClient, WebhookRequest,
    WebhookResponse,
};
pub use application::scheduler::{FlowScheduler, SchedulerHandle};
pub use domain::events::{ExecutionEventKind, FlowExecutionEvent};
pub use domain::execution_state::{ExecutionStatus, FlowExecutionState};
pub use domain::flow_definition::{FlowDefinition, FlowEdge, FlowNode, NodeKind};
pub use domain::node_result::NodeExecutionResult;
pub use domain::repository::{ExecutionFilter, ExecutionStateRepository, FlowDefinitionRepository};
