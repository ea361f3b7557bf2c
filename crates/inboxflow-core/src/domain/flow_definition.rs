use crate::types::{FlowId, NodeId, TriggerEvent, TriggerKind};
use crate::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Edge handle taken when a condition evaluates to true
pub const HANDLE_TRUE: &str = "true";
/// Edge handle taken when a condition evaluates to false
pub const HANDLE_FALSE: &str = "false";
/// Edge handle taken when a wait-for-input node times out
pub const HANDLE_TIMEOUT: &str = "timeout";

/// Represents a conversational automation graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    /// ID of the flow
    pub id: FlowId,

    /// Human-readable name of the flow
    pub name: String,

    /// Description of the flow
    #[serde(default)]
    pub description: Option<String>,

    /// Inactive flows are never started by triggers
    #[serde(default = "default_active")]
    pub active: bool,

    /// The nodes in this flow
    pub nodes: Vec<FlowNode>,

    /// Directed edges between nodes
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

fn default_active() -> bool {
    true
}

/// Kinds of nodes the executor knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry point of the flow
    Trigger,
    /// Branches on the evaluation context
    Condition,
    /// Sends a message to the contact
    Message,
    /// Calls an external HTTP endpoint
    Webhook,
    /// Stores the user's input into a variable
    CaptureInput,
    /// Pauses the flow for a fixed duration
    Delay,
    /// Pauses the flow until the contact replies
    WaitForInput,
    /// Terminates the flow
    End,
}

impl NodeKind {
    /// Stable name used in logs and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Trigger => "trigger",
            NodeKind::Condition => "condition",
            NodeKind::Message => "message",
            NodeKind::Webhook => "webhook",
            NodeKind::CaptureInput => "capture_input",
            NodeKind::Delay => "delay",
            NodeKind::WaitForInput => "wait_for_input",
            NodeKind::End => "end",
        }
    }
}

/// A node in the flow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    /// ID of the node
    pub id: NodeId,

    /// Node kind
    pub kind: NodeKind,

    /// Kind-specific configuration
    #[serde(default)]
    pub config: Value,
}

impl FlowNode {
    /// Create a node with the given kind and config
    pub fn new(id: impl Into<NodeId>, kind: NodeKind, config: Value) -> Self {
        Self {
            id: id.into(),
            kind,
            config,
        }
    }

    /// Deserialize this node's config into a typed struct
    pub fn parse_config<T: serde::de::DeserializeOwned>(&self) -> Result<T, CoreError> {
        let config = if self.config.is_null() {
            Value::Object(Default::default())
        } else {
            self.config.clone()
        };
        serde_json::from_value(config).map_err(|e| {
            CoreError::ConfigurationError(format!("Invalid config on node {}: {}", self.id, e))
        })
    }
}

/// A directed edge between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    /// ID of the edge
    pub id: String,

    /// Source node
    pub source: NodeId,

    /// Target node
    pub target: NodeId,

    /// Output handle on the source node, used by branching nodes
    #[serde(default)]
    pub source_handle: Option<String>,
}

impl FlowEdge {
    /// Create an unlabeled edge
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}->{}", source, target),
            source,
            target,
            source_handle: None,
        }
    }

    /// Create an edge leaving through a named handle
    pub fn with_handle(
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        handle: &str,
    ) -> Self {
        let mut edge = Self::new(source, target);
        edge.id = format!("{}:{}", edge.id, handle);
        edge.source_handle = Some(handle.to_string());
        edge
    }
}

/// How a trigger node decides whether an event starts its flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Any inbound message
    MessageReceived,
    /// Inbound message matching one of the keywords
    Keyword,
    /// Webhook addressed to the flow
    Webhook,
    /// Scheduled start addressed to the flow
    Schedule,
}

/// Keyword comparison mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordMatch {
    /// Whole message equals the keyword
    Exact,
    /// Message contains the keyword
    #[default]
    Contains,
}

/// Typed trigger node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Trigger type
    pub trigger_type: TriggerType,

    /// Keywords for keyword triggers, compared case-insensitively
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Keyword comparison mode
    #[serde(default)]
    pub match_mode: KeywordMatch,

    /// Restrict to one channel
    #[serde(default)]
    pub channel: Option<String>,
}

impl TriggerConfig {
    /// Decide whether the event should start the flow
    pub fn matches(&self, flow_id: &FlowId, event: &TriggerEvent) -> bool {
        if let (Some(wanted), Some(actual)) = (&self.channel, &event.channel) {
            if !wanted.eq_ignore_ascii_case(actual) {
                return false;
            }
        }

        match (self.trigger_type, event.kind) {
            (TriggerType::MessageReceived, TriggerKind::Message) => true,
            (TriggerType::Keyword, TriggerKind::Message) => {
                let text = match &event.text {
                    Some(text) => text.trim().to_lowercase(),
                    None => return false,
                };
                self.keywords.iter().any(|keyword| {
                    let keyword = keyword.trim().to_lowercase();
                    !keyword.is_empty()
                        && match self.match_mode {
                            KeywordMatch::Exact => text == keyword,
                            KeywordMatch::Contains => text.contains(&keyword),
                        }
                })
            }
            (TriggerType::Webhook, TriggerKind::Webhook)
            | (TriggerType::Schedule, TriggerKind::Schedule) => {
                event.flow_id.as_ref() == Some(flow_id)
            }
            _ => false,
        }
    }
}

impl FlowDefinition {
    /// Look up a node by id
    pub fn node(&self, id: &NodeId) -> Option<&FlowNode> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    /// The single trigger node
    pub fn trigger_node(&self) -> Result<&FlowNode, CoreError> {
        self.nodes
            .iter()
            .find(|node| node.kind == NodeKind::Trigger)
            .ok_or_else(|| {
                CoreError::ValidationError(format!("Flow {} has no trigger node", self.id))
            })
    }

    /// Typed config of the trigger node
    pub fn trigger_config(&self) -> Result<TriggerConfig, CoreError> {
        self.trigger_node()?.parse_config()
    }

    /// Edges leaving a node
    pub fn outgoing<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a FlowEdge> + 'a {
        self.edges.iter().filter(move |edge| &edge.source == id)
    }

    /// Resolve the successor of a node.
    ///
    /// With a handle, only an edge carrying that handle qualifies. Without one,
    /// the first unlabeled edge wins, falling back to the first edge of any kind.
    pub fn next_node(&self, id: &NodeId, handle: Option<&str>) -> Option<NodeId> {
        match handle {
            Some(handle) => self
                .outgoing(id)
                .find(|edge| edge.source_handle.as_deref() == Some(handle))
                .map(|edge| edge.target.clone()),
            None => self
                .outgoing(id)
                .find(|edge| edge.source_handle.is_none())
                .or_else(|| {
                    self.outgoing(id).find(|edge| {
                        !matches!(edge.source_handle.as_deref(), Some(HANDLE_TIMEOUT))
                    })
                })
                .map(|edge| edge.target.clone()),
        }
    }

    /// Validate the flow definition
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.nodes.is_empty() {
            return Err(CoreError::ValidationError(
                "Flow must have at least one node".to_string(),
            ));
        }

        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if !node_ids.insert(&node.id) {
                return Err(CoreError::ValidationError(format!(
                    "Duplicate node ID: {}",
                    node.id
                )));
            }
        }

        let triggers: Vec<&FlowNode> = self
            .nodes
            .iter()
            .filter(|node| node.kind == NodeKind::Trigger)
            .collect();
        if triggers.len() != 1 {
            return Err(CoreError::ValidationError(format!(
                "Flow must have exactly one trigger node, found {}",
                triggers.len()
            )));
        }
        let trigger = triggers[0];
        let _: TriggerConfig = trigger.parse_config()?;

        for edge in &self.edges {
            if !node_ids.contains(&edge.source) {
                return Err(CoreError::ValidationError(format!(
                    "Edge {} references non-existent source: {}",
                    edge.id, edge.source
                )));
            }
            if !node_ids.contains(&edge.target) {
                return Err(CoreError::ValidationError(format!(
                    "Edge {} references non-existent target: {}",
                    edge.id, edge.target
                )));
            }
            if edge.target == trigger.id {
                return Err(CoreError::ValidationError(format!(
                    "Edge {} points back at the trigger node",
                    edge.id
                )));
            }
        }

        for node in self.nodes.iter().filter(|n| n.kind == NodeKind::Condition) {
            let mut handles = HashSet::new();
            for edge in self.outgoing(&node.id) {
                if let Some(handle) = &edge.source_handle {
                    if !handles.insert(handle.as_str()) {
                        return Err(CoreError::ValidationError(format!(
                            "Condition node {} has more than one '{}' edge",
                            node.id, handle
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keyword_flow() -> FlowDefinition {
        FlowDefinition {
            id: FlowId::from("support"),
            name: "Support".to_string(),
            description: None,
            active: true,
            nodes: vec![
                FlowNode::new(
                    "start",
                    NodeKind::Trigger,
                    json!({"trigger_type": "keyword", "keywords": ["help", "Support"]}),
                ),
                FlowNode::new("check", NodeKind::Condition, json!({"conditions": []})),
                FlowNode::new("yes", NodeKind::Message, json!({"text": "yes"})),
                FlowNode::new("no", NodeKind::Message, json!({"text": "no"})),
            ],
            edges: vec![
                FlowEdge::new("start", "check"),
                FlowEdge::with_handle("check", "yes", HANDLE_TRUE),
                FlowEdge::with_handle("check", "no", HANDLE_FALSE),
            ],
        }
    }

    #[test]
    fn test_valid_flow() {
        assert!(keyword_flow().validate().is_ok());
    }

    #[test]
    fn test_empty_flow_rejected() {
        let mut flow = keyword_flow();
        flow.nodes.clear();
        flow.edges.clear();
        let err = flow.validate().unwrap_err();
        assert!(err.to_string().contains("at least one node"));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut flow = keyword_flow();
        flow.nodes.push(FlowNode::new("yes", NodeKind::End, json!({})));
        let err = flow.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate node ID: yes"));
    }

    #[test]
    fn test_trigger_count_enforced() {
        let mut flow = keyword_flow();
        flow.nodes.push(FlowNode::new(
            "start2",
            NodeKind::Trigger,
            json!({"trigger_type": "message_received"}),
        ));
        let err = flow.validate().unwrap_err();
        assert!(err.to_string().contains("exactly one trigger"));
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let mut flow = keyword_flow();
        flow.edges.push(FlowEdge::new("yes", "ghost"));
        let err = flow.validate().unwrap_err();
        assert!(err.to_string().contains("non-existent target: ghost"));
    }

    #[test]
    fn test_edge_into_trigger_rejected() {
        let mut flow = keyword_flow();
        flow.edges.push(FlowEdge::new("no", "start"));
        assert!(flow.validate().is_err());
    }

    #[test]
    fn test_duplicate_condition_handle_rejected() {
        let mut flow = keyword_flow();
        flow.edges.push(FlowEdge::with_handle("check", "no", HANDLE_TRUE));
        let err = flow.validate().unwrap_err();
        assert!(err.to_string().contains("more than one 'true' edge"));
    }

    #[test]
    fn test_cycles_are_allowed() {
        let mut flow = keyword_flow();
        flow.edges.push(FlowEdge::new("no", "check"));
        assert!(flow.validate().is_ok());
    }

    #[test]
    fn test_next_node_resolution() {
        let mut flow = keyword_flow();
        assert_eq!(
            flow.next_node(&NodeId::from("start"), None),
            Some(NodeId::from("check"))
        );
        assert_eq!(
            flow.next_node(&NodeId::from("check"), Some(HANDLE_FALSE)),
            Some(NodeId::from("no"))
        );
        assert_eq!(flow.next_node(&NodeId::from("yes"), None), None);

        // Unlabeled lookups never follow a timeout edge
        flow.nodes
            .push(FlowNode::new("wait", NodeKind::WaitForInput, json!({})));
        flow.edges
            .push(FlowEdge::with_handle("wait", "no", HANDLE_TIMEOUT));
        assert_eq!(flow.next_node(&NodeId::from("wait"), None), None);
        assert_eq!(
            flow.next_node(&NodeId::from("wait"), Some(HANDLE_TIMEOUT)),
            Some(NodeId::from("no"))
        );
    }

    #[test]
    fn test_keyword_trigger_matching() {
        let flow = keyword_flow();
        let config = flow.trigger_config().unwrap();

        assert!(config.matches(&flow.id, &TriggerEvent::message("c", "p", "I need HELP now")));
        assert!(config.matches(&flow.id, &TriggerEvent::message("c", "p", "support")));
        assert!(!config.matches(&flow.id, &TriggerEvent::message("c", "p", "hello")));
        assert!(!config.matches(&flow.id, &TriggerEvent::webhook("support", "c", "p", json!({}))));
    }

    #[test]
    fn test_exact_keyword_and_channel() {
        let config = TriggerConfig {
            trigger_type: TriggerType::Keyword,
            keywords: vec!["menu".to_string()],
            match_mode: KeywordMatch::Exact,
            channel: Some("whatsapp".to_string()),
        };
        let flow_id = FlowId::from("f");

        let on_whatsapp = TriggerEvent::message("c", "p", " Menu ").with_channel("WhatsApp");
        assert!(config.matches(&flow_id, &on_whatsapp));

        let on_messenger = TriggerEvent::message("c", "p", "menu").with_channel("messenger");
        assert!(!config.matches(&flow_id, &on_messenger));

        let longer = TriggerEvent::message("c", "p", "show menu").with_channel("whatsapp");
        assert!(!config.matches(&flow_id, &longer));
    }

    #[test]
    fn test_webhook_trigger_requires_matching_flow() {
        let config = TriggerConfig {
            trigger_type: TriggerType::Webhook,
            keywords: vec![],
            match_mode: KeywordMatch::default(),
            channel: None,
        };
        let flow_id = FlowId::from("orders");
        assert!(config.matches(&flow_id, &TriggerEvent::webhook("orders", "c", "p", json!({}))));
        assert!(!config.matches(&flow_id, &TriggerEvent::webhook("other", "c", "p", json!({}))));
    }

    #[test]
    fn test_definition_serialization() {
        let flow = keyword_flow();
        let value = serde_json::to_value(&flow).unwrap();
        assert_eq!(value["edges"][1]["sourceHandle"], "true");
        assert_eq!(value["nodes"][0]["kind"], "trigger");

        let back: FlowDefinition = serde_json::from_value(value).unwrap();
        assert_eq!(back.nodes.len(), 4);
        assert!(back.active);
    }

    #[test]
    fn test_parse_config_error_names_node() {
        let node = FlowNode::new("d", NodeKind::Trigger, json!({"trigger_type": 5}));
        let err = node.parse_config::<TriggerConfig>().unwrap_err();
        assert!(matches!(err, CoreError::ConfigurationError(msg) if msg.contains("node d")));
    }
}
