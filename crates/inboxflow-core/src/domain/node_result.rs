use crate::types::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outcome of executing a single node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionResult {
    /// Whether the node ran successfully
    pub success: bool,

    /// Whether the engine should move on to `next_node_id`
    pub should_continue: bool,

    /// Node to visit next
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_node_id: Option<NodeId>,

    /// Pause until the contact replies
    #[serde(default)]
    pub wait_for_user_input: bool,

    /// Error message on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Data produced by the node. Entries under `variables` are merged into the execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Pause until this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_at: Option<DateTime<Utc>>,
}

impl NodeExecutionResult {
    fn base(success: bool, should_continue: bool) -> Self {
        Self {
            success,
            should_continue,
            next_node_id: None,
            wait_for_user_input: false,
            error: None,
            data: None,
            resume_at: None,
        }
    }

    /// Continue to `next`. `None` ends the flow.
    pub fn advance(next: Option<NodeId>) -> Self {
        let mut result = Self::base(true, true);
        result.next_node_id = next;
        result
    }

    /// Pause until the contact replies
    pub fn wait_for_input() -> Self {
        let mut result = Self::base(true, false);
        result.wait_for_user_input = true;
        result
    }

    /// Pause until `resume_at`
    pub fn delay_until(resume_at: DateTime<Utc>) -> Self {
        let mut result = Self::base(true, false);
        result.resume_at = Some(resume_at);
        result
    }

    /// End the flow successfully
    pub fn finish() -> Self {
        Self::base(true, false)
    }

    /// Fail the flow
    pub fn failure(error: impl Into<String>) -> Self {
        let mut result = Self::base(false, false);
        result.error = Some(error.into());
        result
    }

    /// Attach arbitrary data
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Capture a variable into the execution
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        let data = self
            .data
            .get_or_insert_with(|| Value::Object(Map::new()));
        if !data.is_object() {
            *data = Value::Object(Map::new());
        }
        if let Some(object) = data.as_object_mut() {
            let variables = object
                .entry("variables")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(variables) = variables.as_object_mut() {
                variables.insert(name.into(), value);
            }
        }
        self
    }

    /// Variables captured by this node
    pub fn variables(&self) -> Option<&Map<String, Value>> {
        self.data
            .as_ref()
            .and_then(|data| data.get("variables"))
            .and_then(Value::as_object)
    }

    /// Whether the engine must stop the loop after this result
    pub fn is_pause(&self) -> bool {
        self.success && (self.wait_for_user_input || self.resume_at.is_some())
    }
}
