use crate::{
    domain::events::{ExecutionEventKind, FlowExecutionEvent},
    domain::node_result::NodeExecutionResult,
    types::{ContactId, ConversationId, ExecutionId, FlowId, NodeId, TriggerEvent},
    CoreError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The step loop owns the execution
    Running,

    /// Paused on user input or a timer
    Waiting,

    /// Reached the end of the flow
    Completed,

    /// Failed
    Failed,
}

impl ExecutionStatus {
    /// Completed and failed executions are never mutated again
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Aggregate: one contact's run through one flow
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowExecutionState {
    /// Unique identifier
    pub id: ExecutionId,

    /// Flow definition ID
    pub flow_id: FlowId,

    /// Conversation this execution runs in
    pub conversation_id: ConversationId,

    /// Contact being advanced
    pub contact_id: ContactId,

    /// Node being executed or waited on
    pub current_node_id: Option<NodeId>,

    /// Current status
    pub status: ExecutionStatus,

    /// Creation timestamp
    pub started_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub last_activity: DateTime<Utc>,

    /// Every visited node, in order
    pub execution_path: Vec<NodeId>,

    /// Paused on a reply from the contact
    pub waiting_for_input: bool,

    /// Result of the most recent step
    pub last_node_result: Option<NodeExecutionResult>,

    /// Values captured during the run
    #[serde(default)]
    pub variables: Map<String, Value>,

    /// Event that started the execution
    pub trigger: TriggerEvent,

    /// Timer expiry while paused on a delay
    #[serde(default)]
    pub resume_at: Option<DateTime<Utc>>,

    /// Reply deadline while paused on input
    #[serde(default)]
    pub wait_deadline: Option<DateTime<Utc>>,

    /// Error message if the execution failed
    #[serde(default)]
    pub error: Option<String>,

    /// Nodes executed in the current run segment
    #[serde(default)]
    pub step_count: u32,

    /// Pending lifecycle events
    #[serde(skip)]
    events: Vec<FlowExecutionEvent>,
}

// Pending events are not cloned
impl Clone for FlowExecutionState {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            flow_id: self.flow_id.clone(),
            conversation_id: self.conversation_id.clone(),
            contact_id: self.contact_id.clone(),
            current_node_id: self.current_node_id.clone(),
            status: self.status,
            started_at: self.started_at,
            last_activity: self.last_activity,
            execution_path: self.execution_path.clone(),
            waiting_for_input: self.waiting_for_input,
            last_node_result: self.last_node_result.clone(),
            variables: self.variables.clone(),
            trigger: self.trigger.clone(),
            resume_at: self.resume_at,
            wait_deadline: self.wait_deadline,
            error: self.error.clone(),
            step_count: self.step_count,
            events: Vec::new(),
        }
    }
}

impl FlowExecutionState {
    /// Create a running execution positioned on `entry_node`, for the contact and conversation of `trigger`
    pub fn new(flow_id: FlowId, trigger: TriggerEvent, entry_node: NodeId) -> Self {
        let now = Utc::now();
        let mut state = Self {
            id: ExecutionId::generate(),
            flow_id,
            conversation_id: trigger.conversation_id.clone(),
            contact_id: trigger.contact_id.clone(),
            current_node_id: Some(entry_node.clone()),
            status: ExecutionStatus::Running,
            started_at: now,
            last_activity: now,
            execution_path: vec![entry_node.clone()],
            waiting_for_input: false,
            last_node_result: None,
            variables: Map::new(),
            trigger,
            resume_at: None,
            wait_deadline: None,
            error: None,
            step_count: 0,
            events: Vec::with_capacity(4),
        };

        state.record_event(ExecutionEventKind::Started {
            current_node_id: Some(entry_node),
        });

        state
    }

    fn ensure_running(&self, action: &str) -> Result<(), CoreError> {
        if self.status != ExecutionStatus::Running {
            return Err(CoreError::FlowExecutionError(format!(
                "Cannot {} in state: {:?}",
                action, self.status
            )));
        }
        Ok(())
    }

    #[inline]
    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Wall time since the execution started
    pub fn duration_ms(&self) -> i64 {
        (self.last_activity - self.started_at).num_milliseconds()
    }

    /// Whether the execution is paused on a delay timer
    #[inline]
    pub fn is_waiting_for_timer(&self) -> bool {
        self.status == ExecutionStatus::Waiting && self.resume_at.is_some()
    }

    /// Start a new run segment for the step budget
    pub fn begin_segment(&mut self) {
        self.step_count = 0;
    }

    /// Count one node execution against the segment's step budget
    #[inline]
    pub fn count_step(&mut self) {
        self.step_count = self.step_count.saturating_add(1);
    }

    /// Move to `node_id` and append it to the path
    pub fn visit(&mut self, node_id: NodeId) -> Result<(), CoreError> {
        self.ensure_running("visit node")?;

        self.execution_path.push(node_id.clone());
        self.current_node_id = Some(node_id);
        self.touch();
        Ok(())
    }

    /// Store a step's result and merge the variables it captured
    pub fn record_result(&mut self, result: NodeExecutionResult) -> Result<(), CoreError> {
        self.ensure_running("record result")?;

        if let Some(variables) = result.variables() {
            for (name, value) in variables {
                self.variables.insert(name.clone(), value.clone());
            }
        }
        self.last_node_result = Some(result.clone());
        self.touch();

        self.record_event(ExecutionEventKind::Updated {
            status: self.status,
            current_node_id: self.current_node_id.clone(),
            execution_path: self.execution_path.clone(),
            last_node_result: Some(result),
        });
        Ok(())
    }

    /// Pause until the contact replies
    pub fn wait_for_input(&mut self, deadline: Option<DateTime<Utc>>) -> Result<(), CoreError> {
        self.ensure_running("suspend execution")?;

        self.status = ExecutionStatus::Waiting;
        self.waiting_for_input = true;
        self.wait_deadline = deadline;
        self.resume_at = None;
        self.touch();
        self.record_waiting();
        Ok(())
    }

    /// Pause until `resume_at`
    pub fn wait_for_timer(&mut self, resume_at: DateTime<Utc>) -> Result<(), CoreError> {
        self.ensure_running("suspend execution")?;

        self.status = ExecutionStatus::Waiting;
        self.waiting_for_input = false;
        self.wait_deadline = None;
        self.resume_at = Some(resume_at);
        self.touch();
        self.record_waiting();
        Ok(())
    }

    fn record_waiting(&mut self) {
        self.record_event(ExecutionEventKind::Waiting {
            current_node_id: self.current_node_id.clone(),
            waiting_for_input: self.waiting_for_input,
            resume_at: self.resume_at,
            wait_deadline: self.wait_deadline,
        });
    }

    /// Resume a paused execution
    pub fn resume(&mut self, user_input: Option<String>) -> Result<(), CoreError> {
        if self.status != ExecutionStatus::Waiting {
            return Err(CoreError::FlowExecutionError(format!(
                "Cannot resume execution in state: {:?}",
                self.status
            )));
        }

        self.status = ExecutionStatus::Running;
        self.waiting_for_input = false;
        self.wait_deadline = None;
        self.resume_at = None;
        self.begin_segment();
        self.touch();

        self.record_event(ExecutionEventKind::Resumed {
            current_node_id: self.current_node_id.clone(),
            user_input,
        });
        Ok(())
    }

    /// Complete the execution successfully
    pub fn complete(&mut self) -> Result<(), CoreError> {
        self.ensure_running("complete execution")?;

        self.status = ExecutionStatus::Completed;
        self.touch();

        self.record_event(ExecutionEventKind::Completed {
            execution_path: self.execution_path.clone(),
            duration_ms: self.duration_ms(),
        });
        Ok(())
    }

    /// Fail the execution
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::FlowExecutionError(format!(
                "Cannot fail execution in state: {:?}",
                self.status
            )));
        }

        let error = error.into();
        self.status = ExecutionStatus::Failed;
        self.waiting_for_input = false;
        self.wait_deadline = None;
        self.resume_at = None;
        self.error = Some(error.clone());
        self.touch();

        self.record_event(ExecutionEventKind::Failed {
            current_node_id: self.current_node_id.clone(),
            error,
            duration_ms: self.duration_ms(),
        });
        Ok(())
    }

    fn record_event(&mut self, kind: ExecutionEventKind) {
        self.events.push(FlowExecutionEvent {
            execution_id: self.id.clone(),
            flow_id: self.flow_id.clone(),
            conversation_id: self.conversation_id.clone(),
            contact_id: self.contact_id.clone(),
            timestamp: Utc::now(),
            kind,
        });
    }

    /// Get and clear all pending lifecycle events
    pub fn take_events(&mut self) -> Vec<FlowExecutionEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_state() -> FlowExecutionState {
        FlowExecutionState::new(
            FlowId::from("welcome"),
            TriggerEvent::message("conv-1", "contact-1", "hi"),
            NodeId::from("trigger"),
        )
    }

    #[test]
    fn test_creation() {
        let mut state = new_state();

        assert_eq!(state.status, ExecutionStatus::Running);
        assert_eq!(state.conversation_id, ConversationId::from("conv-1"));
        assert_eq!(state.contact_id, ContactId::from("contact-1"));
        assert_eq!(state.execution_path, vec![NodeId::from("trigger")]);
        assert_eq!(state.current_node_id, Some(NodeId::from("trigger")));
        assert_eq!(state.step_count, 0);

        let events = state.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0].kind,
            ExecutionEventKind::Started { current_node_id: Some(id) } if id.as_str() == "trigger"
        ));
        assert!(state.take_events().is_empty());
    }

    #[test]
    fn test_visit_appends_path() {
        let mut state = new_state();
        state.visit(NodeId::from("start")).unwrap();
        state.visit(NodeId::from("ask")).unwrap();
        state.visit(NodeId::from("start")).unwrap();

        assert_eq!(
            state.execution_path,
            vec![
                NodeId::from("trigger"),
                NodeId::from("start"),
                NodeId::from("ask"),
                NodeId::from("start")
            ]
        );
        assert_eq!(state.current_node_id, Some(NodeId::from("start")));
        assert_eq!(state.step_count, 0);
    }

    #[test]
    fn test_steps_count_per_segment() {
        let mut state = new_state();
        state.count_step();
        state.visit(NodeId::from("ask")).unwrap();
        state.count_step();
        assert_eq!(state.step_count, 2);

        state.wait_for_input(None).unwrap();
        state.resume(Some("yes".to_string())).unwrap();
        assert_eq!(state.step_count, 0);
    }

    #[test]
    fn test_record_result_merges_variables() {
        let mut state = new_state();
        state.visit(NodeId::from("capture")).unwrap();
        state.take_events();

        let result = NodeExecutionResult::advance(None).with_variable("email", json!("x@y.z"));
        state.record_result(result.clone()).unwrap();

        assert_eq!(state.variables["email"], "x@y.z");
        assert_eq!(state.last_node_result, Some(result));

        let events = state.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "updated");
    }

    #[test]
    fn test_wait_and_resume_for_input() {
        let mut state = new_state();
        state.visit(NodeId::from("ask")).unwrap();
        let deadline = Utc::now() + chrono::Duration::minutes(5);
        state.wait_for_input(Some(deadline)).unwrap();

        assert_eq!(state.status, ExecutionStatus::Waiting);
        assert!(state.waiting_for_input);
        assert_eq!(state.wait_deadline, Some(deadline));
        assert!(!state.is_waiting_for_timer());

        // A waiting execution cannot advance
        assert!(state.visit(NodeId::from("next")).is_err());

        state.resume(Some("yes".to_string())).unwrap();
        assert_eq!(state.status, ExecutionStatus::Running);
        assert!(!state.waiting_for_input);
        assert!(state.wait_deadline.is_none());
        assert_eq!(state.step_count, 0);

        let types: Vec<_> = state.take_events().iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["started", "waiting", "resumed"]);
    }

    #[test]
    fn test_wait_for_timer() {
        let mut state = new_state();
        state.visit(NodeId::from("pause")).unwrap();
        let at = Utc::now() + chrono::Duration::seconds(30);
        state.wait_for_timer(at).unwrap();

        assert!(state.is_waiting_for_timer());
        assert!(!state.waiting_for_input);
        assert_eq!(state.resume_at, Some(at));

        state.resume(None).unwrap();
        assert!(state.resume_at.is_none());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut state = new_state();
        state.visit(NodeId::from("end")).unwrap();
        state.complete().unwrap();

        assert_eq!(state.status, ExecutionStatus::Completed);
        assert!(state.status.is_terminal());
        assert!(state.visit(NodeId::from("again")).is_err());
        assert!(state.resume(None).is_err());
        assert!(state.complete().is_err());
        assert!(state.fail("late").is_err());

        let err = state.visit(NodeId::from("again")).unwrap_err();
        assert_eq!(
            err,
            CoreError::FlowExecutionError(
                "Cannot visit node in state: Completed".to_string()
            )
        );
    }

    #[test]
    fn test_fail_from_waiting() {
        let mut state = new_state();
        state.visit(NodeId::from("ask")).unwrap();
        state.wait_for_input(None).unwrap();
        state.take_events();

        state.fail("timed out waiting for input").unwrap();
        assert_eq!(state.status, ExecutionStatus::Failed);
        assert!(!state.waiting_for_input);
        assert_eq!(state.error.as_deref(), Some("timed out waiting for input"));

        let events = state.take_events();
        assert!(matches!(
            &events[0].kind,
            ExecutionEventKind::Failed { error, .. } if error == "timed out waiting for input"
        ));
    }

    #[test]
    fn test_clone_drops_pending_events() {
        let mut state = new_state();
        let mut copy = state.clone();
        assert!(copy.take_events().is_empty());
        assert_eq!(state.take_events().len(), 1);
    }

    #[test]
    fn test_serialization() {
        let mut state = new_state();
        state.visit(NodeId::from("start")).unwrap();

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["status"], "running");
        assert_eq!(value["currentNodeId"], "start");
        assert_eq!(value["executionPath"], json!(["trigger", "start"]));
        assert_eq!(value["waitingForInput"], false);

        let back: FlowExecutionState = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, state.id);
        assert_eq!(back.execution_path, state.execution_path);
    }
}
