use crate::domain::node_result::NodeExecutionResult;
use crate::types::{ContactId, ConversationId, ExecutionId, FlowId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::execution_state::ExecutionStatus;

/// Lifecycle event emitted by a flow execution.
///
/// Published to live subscribers only, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowExecutionEvent {
    /// Execution the event belongs to
    pub execution_id: ExecutionId,

    /// Flow being executed
    pub flow_id: FlowId,

    /// Conversation driving the execution
    pub conversation_id: ConversationId,

    /// Contact being advanced through the flow
    pub contact_id: ContactId,

    /// When the event occurred
    pub timestamp: DateTime<Utc>,

    /// Type-specific payload
    #[serde(flatten)]
    pub kind: ExecutionEventKind,
}

/// Payload of a lifecycle event, discriminated by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEventKind {
    /// Execution was created
    #[serde(rename_all = "camelCase")]
    Started {
        /// Entry node
        current_node_id: Option<NodeId>,
    },

    /// A node finished and its result was persisted
    #[serde(rename_all = "camelCase")]
    Updated {
        /// Status after the step
        status: ExecutionStatus,
        /// Node that ran
        current_node_id: Option<NodeId>,
        /// Path so far
        execution_path: Vec<NodeId>,
        /// What the node returned
        last_node_result: Option<NodeExecutionResult>,
    },

    /// Execution paused
    #[serde(rename_all = "camelCase")]
    Waiting {
        /// Node the execution is parked on
        current_node_id: Option<NodeId>,
        /// Paused for a reply rather than a timer
        waiting_for_input: bool,
        /// Timer expiry
        resume_at: Option<DateTime<Utc>>,
        /// Reply deadline
        wait_deadline: Option<DateTime<Utc>>,
    },

    /// Execution continued after a pause
    #[serde(rename_all = "camelCase")]
    Resumed {
        /// Node the execution resumes at
        current_node_id: Option<NodeId>,
        /// Reply that resumed it, if any
        user_input: Option<String>,
    },

    /// Execution reached the end of the flow
    #[serde(rename_all = "camelCase")]
    Completed {
        /// Full path
        execution_path: Vec<NodeId>,
        /// Wall time since start
        duration_ms: i64,
    },

    /// Execution failed
    #[serde(rename_all = "camelCase")]
    Failed {
        /// Node that was running
        current_node_id: Option<NodeId>,
        /// Failure reason
        error: String,
        /// Wall time since start
        duration_ms: i64,
    },
}

impl FlowExecutionEvent {
    /// Returns the type of the event as a string
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            ExecutionEventKind::Started { .. } => "started",
            ExecutionEventKind::Updated { .. } => "updated",
            ExecutionEventKind::Waiting { .. } => "waiting",
            ExecutionEventKind::Resumed { .. } => "resumed",
            ExecutionEventKind::Completed { .. } => "completed",
            ExecutionEventKind::Failed { .. } => "failed",
        }
    }

    /// Whether the event ends the execution
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            ExecutionEventKind::Completed { .. } | ExecutionEventKind::Failed { .. }
        )
    }
}
