//! Built-in node handlers

use crate::{
    domain::expression::{render_template, render_value, resolve_path, value_to_text},
    domain::flow_definition::{FlowDefinition, FlowNode, NodeKind, HANDLE_FALSE, HANDLE_TRUE},
    domain::node_result::NodeExecutionResult,
    CoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::node_executor::{MessageSender, NodeContext, NodeHandler, WebhookClient, WebhookRequest};

/// Variable holding the most recent reply delivered to a wait node
pub const LAST_INPUT_VARIABLE: &str = "last_input";

/// Entry node: moves straight to its successor
pub struct TriggerHandler;

#[async_trait]
impl NodeHandler for TriggerHandler {
    async fn execute(
        &self,
        node: &FlowNode,
        ctx: &NodeContext<'_>,
    ) -> Result<NodeExecutionResult, CoreError> {
        Ok(NodeExecutionResult::advance(ctx.flow.next_node(&node.id, None)))
    }
}

/// Terminal node
pub struct EndHandler;

#[async_trait]
impl NodeHandler for EndHandler {
    async fn execute(
        &self,
        _node: &FlowNode,
        _ctx: &NodeContext<'_>,
    ) -> Result<NodeExecutionResult, CoreError> {
        Ok(NodeExecutionResult::finish())
    }
}

/// Comparison applied by a condition rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// Values are equal
    Equals,
    /// Values differ
    NotEquals,
    /// Text contains the value, or an array contains an equal element
    Contains,
    /// Text starts with the value
    StartsWith,
    /// Text ends with the value
    EndsWith,
    /// Text matches the regular expression
    Matches,
    /// Path resolves to a non-empty value
    Exists,
    /// Path resolves to nothing
    NotExists,
    /// Numeric greater than
    GreaterThan,
    /// Numeric less than
    LessThan,
}

/// How rule outcomes combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Every rule must hold
    #[default]
    All,
    /// At least one rule must hold
    Any,
}

/// One comparison inside a condition node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRule {
    /// JMESPath into the evaluation context
    pub path: String,

    /// Comparison
    pub operator: ConditionOperator,

    /// Right-hand side
    #[serde(default)]
    pub value: Value,
}

/// Condition node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// Rules to evaluate
    #[serde(default)]
    pub conditions: Vec<ConditionRule>,

    /// How rule outcomes combine
    #[serde(default, rename = "match")]
    pub match_mode: MatchMode,

    /// Compare text exactly
    #[serde(default)]
    pub case_sensitive: bool,
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

impl ConditionConfig {
    fn normalize(&self, text: String) -> String {
        if self.case_sensitive {
            text
        } else {
            text.to_lowercase()
        }
    }

    fn values_equal(&self, actual: &Value, expected: &Value) -> bool {
        if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
            return a == b;
        }
        match (actual, expected) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                self.normalize(value_to_text(actual)) == self.normalize(value_to_text(expected))
            }
            _ => actual == expected,
        }
    }

    /// Evaluate one rule against the context
    pub fn evaluate_rule(&self, rule: &ConditionRule, context: &Value) -> Result<bool, CoreError> {
        let actual = resolve_path(&rule.path, context)?;
        let expected = &rule.value;

        let outcome = match rule.operator {
            ConditionOperator::Exists => !is_empty(&actual),
            ConditionOperator::NotExists => is_empty(&actual),
            ConditionOperator::Equals => self.values_equal(&actual, expected),
            ConditionOperator::NotEquals => !self.values_equal(&actual, expected),
            ConditionOperator::Contains => match &actual {
                Value::Array(items) => items.iter().any(|item| self.values_equal(item, expected)),
                _ => self
                    .normalize(value_to_text(&actual))
                    .contains(&self.normalize(value_to_text(expected))),
            },
            ConditionOperator::StartsWith => self
                .normalize(value_to_text(&actual))
                .starts_with(&self.normalize(value_to_text(expected))),
            ConditionOperator::EndsWith => self
                .normalize(value_to_text(&actual))
                .ends_with(&self.normalize(value_to_text(expected))),
            ConditionOperator::Matches => {
                let pattern = value_to_text(expected);
                let regex = RegexBuilder::new(&pattern)
                    .case_insensitive(!self.case_sensitive)
                    .build()
                    .map_err(|e| {
                        CoreError::ExpressionError(format!("Invalid pattern {}: {}", pattern, e))
                    })?;
                regex.is_match(&value_to_text(&actual))
            }
            ConditionOperator::GreaterThan => match (as_number(&actual), as_number(expected)) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            ConditionOperator::LessThan => match (as_number(&actual), as_number(expected)) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
        };

        Ok(outcome)
    }

    /// Evaluate all rules and combine them
    pub fn evaluate(&self, context: &Value) -> Result<bool, CoreError> {
        match self.match_mode {
            MatchMode::All => {
                for rule in &self.conditions {
                    if !self.evaluate_rule(rule, context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            MatchMode::Any => {
                for rule in &self.conditions {
                    if self.evaluate_rule(rule, context)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

/// Routes through the `true` or `false` handle
pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    async fn execute(
        &self,
        node: &FlowNode,
        ctx: &NodeContext<'_>,
    ) -> Result<NodeExecutionResult, CoreError> {
        let config: ConditionConfig = node.parse_config()?;
        let outcome = config.evaluate(&ctx.evaluation_context())?;
        let handle = if outcome { HANDLE_TRUE } else { HANDLE_FALSE };

        tracing::debug!(
            execution_id = %ctx.state.id,
            node_id = %node.id,
            outcome,
            "Condition evaluated"
        );

        Ok(
            NodeExecutionResult::advance(ctx.flow.next_node(&node.id, Some(handle)))
                .with_data(json!({ "result": outcome })),
        )
    }
}

/// Message node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    /// Text with `{{path}}` placeholders
    pub text: String,
}

/// Sends a rendered message to the contact
pub struct MessageHandler {
    sender: Arc<dyn MessageSender>,
}

impl MessageHandler {
    /// Create a message handler
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl NodeHandler for MessageHandler {
    async fn execute(
        &self,
        node: &FlowNode,
        ctx: &NodeContext<'_>,
    ) -> Result<NodeExecutionResult, CoreError> {
        let config: MessageConfig = node.parse_config()?;
        let text = render_template(&config.text, &ctx.evaluation_context())?;
        if text.trim().is_empty() {
            return Ok(NodeExecutionResult::failure(format!(
                "Message node {} rendered empty text",
                node.id
            )));
        }

        self.sender
            .send_message(&ctx.state.conversation_id, &ctx.state.contact_id, &text)
            .await?;

        Ok(NodeExecutionResult::advance(ctx.flow.next_node(&node.id, None))
            .with_data(json!({ "sent": text })))
    }
}

fn default_method() -> String {
    "POST".to_string()
}

/// Webhook node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL, may contain placeholders
    pub url: String,

    /// HTTP method
    #[serde(default = "default_method")]
    pub method: String,

    /// Request headers, values may contain placeholders
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// JSON body, string leaves may contain placeholders
    #[serde(default)]
    pub body: Option<Value>,

    /// Variable receiving the response body
    #[serde(default)]
    pub store_as: Option<String>,
}

/// Calls an external endpoint
pub struct WebhookHandler {
    client: Arc<dyn WebhookClient>,
}

impl WebhookHandler {
    /// Create a webhook handler
    pub fn new(client: Arc<dyn WebhookClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeHandler for WebhookHandler {
    async fn execute(
        &self,
        node: &FlowNode,
        ctx: &NodeContext<'_>,
    ) -> Result<NodeExecutionResult, CoreError> {
        let config: WebhookConfig = node.parse_config()?;
        let context = ctx.evaluation_context();

        let mut headers = HashMap::with_capacity(config.headers.len());
        for (name, value) in &config.headers {
            headers.insert(name.clone(), render_template(value, &context)?);
        }
        let request = WebhookRequest {
            url: render_template(&config.url, &context)?,
            method: config.method.to_uppercase(),
            headers,
            body: config
                .body
                .as_ref()
                .map(|body| render_value(body, &context))
                .transpose()?,
        };
        let url = request.url.clone();

        let response = self.client.call(request).await?;
        if !response.is_success() {
            return Err(CoreError::ExternalDependencyError(format!(
                "Webhook {} returned HTTP {}",
                url, response.status
            )));
        }

        let mut result = NodeExecutionResult::advance(ctx.flow.next_node(&node.id, None))
            .with_data(json!({ "status": response.status }));
        if let Some(variable) = config.store_as {
            result = result.with_variable(variable, response.body);
        }
        Ok(result)
    }
}

/// Where captured input comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSource {
    /// Latest reply from the contact
    #[default]
    Input,
    /// Text of the message that started the execution
    Message,
}

/// Capture-input node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureInputConfig {
    /// Variable receiving the value
    pub variable: String,

    /// Where the value comes from
    #[serde(default)]
    pub source: CaptureSource,
}

/// Stores a reply or the trigger message into a variable
pub struct CaptureInputHandler;

#[async_trait]
impl NodeHandler for CaptureInputHandler {
    async fn execute(
        &self,
        node: &FlowNode,
        ctx: &NodeContext<'_>,
    ) -> Result<NodeExecutionResult, CoreError> {
        let config: CaptureInputConfig = node.parse_config()?;
        let trigger_text = ctx.state.trigger.text.clone().map(Value::String);

        let value = match config.source {
            CaptureSource::Input => ctx
                .user_input
                .map(|input| Value::String(input.to_string()))
                .or_else(|| ctx.state.variables.get(LAST_INPUT_VARIABLE).cloned())
                .or(trigger_text),
            CaptureSource::Message => trigger_text,
        }
        .unwrap_or(Value::Null);

        Ok(NodeExecutionResult::advance(ctx.flow.next_node(&node.id, None))
            .with_variable(config.variable, value))
    }
}

/// Delay node configuration. Units add up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Seconds
    #[serde(default)]
    pub seconds: u64,
    /// Minutes
    #[serde(default)]
    pub minutes: u64,
    /// Hours
    #[serde(default)]
    pub hours: u64,
}

impl DelayConfig {
    /// Total delay
    pub fn total_seconds(&self) -> u64 {
        self.seconds
            .saturating_add(self.minutes.saturating_mul(60))
            .saturating_add(self.hours.saturating_mul(3600))
    }
}

/// Longest accepted delay or reply deadline (one year)
pub const MAX_DELAY_SECONDS: u64 = 366 * 24 * 3600;

/// `now` plus `seconds`, rejecting timers longer than [`MAX_DELAY_SECONDS`]
pub fn timer_deadline(now: DateTime<Utc>, seconds: u64) -> Result<DateTime<Utc>, CoreError> {
    if seconds > MAX_DELAY_SECONDS {
        return Err(CoreError::ConfigurationError(format!(
            "Timer of {} seconds exceeds {} seconds",
            seconds, MAX_DELAY_SECONDS
        )));
    }
    i64::try_from(seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|delay| now.checked_add_signed(delay))
        .ok_or_else(|| {
            CoreError::ConfigurationError(format!("Timer of {} seconds is out of range", seconds))
        })
}

/// Check the timer settings of delay and wait-for-input nodes
pub fn validate_timers(definition: &FlowDefinition) -> Result<(), CoreError> {
    for node in &definition.nodes {
        let seconds = match node.kind {
            NodeKind::Delay => node.parse_config::<DelayConfig>()?.total_seconds(),
            NodeKind::WaitForInput => node
                .parse_config::<WaitForInputConfig>()?
                .timeout_seconds
                .unwrap_or(0),
            _ => continue,
        };
        if seconds > MAX_DELAY_SECONDS {
            return Err(CoreError::ConfigurationError(format!(
                "Timer on node {} exceeds {} seconds",
                node.id, MAX_DELAY_SECONDS
            )));
        }
    }
    Ok(())
}

/// Parks the execution on a timer
pub struct DelayHandler;

#[async_trait]
impl NodeHandler for DelayHandler {
    async fn execute(
        &self,
        node: &FlowNode,
        ctx: &NodeContext<'_>,
    ) -> Result<NodeExecutionResult, CoreError> {
        let config: DelayConfig = node.parse_config()?;
        let seconds = config.total_seconds();
        if seconds == 0 {
            return Ok(NodeExecutionResult::advance(ctx.flow.next_node(&node.id, None)));
        }

        if seconds > MAX_DELAY_SECONDS {
            return Err(CoreError::ConfigurationError(format!(
                "Delay on node {} exceeds {} seconds",
                node.id, MAX_DELAY_SECONDS
            )));
        }
        Ok(NodeExecutionResult::delay_until(timer_deadline(ctx.now, seconds)?))
    }
}

/// Wait-for-input node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitForInputConfig {
    /// Question sent when the node is entered
    #[serde(default)]
    pub prompt: Option<String>,

    /// Reply deadline
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Variable receiving the reply
    #[serde(default)]
    pub variable: Option<String>,
}

/// Asks a question and parks the execution until the contact replies
pub struct WaitForInputHandler {
    sender: Arc<dyn MessageSender>,
}

impl WaitForInputHandler {
    /// Create a wait-for-input handler
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl NodeHandler for WaitForInputHandler {
    async fn execute(
        &self,
        node: &FlowNode,
        ctx: &NodeContext<'_>,
    ) -> Result<NodeExecutionResult, CoreError> {
        let config: WaitForInputConfig = node.parse_config()?;

        match ctx.user_input {
            Some(input) => {
                let reply = Value::String(input.to_string());
                let mut result = NodeExecutionResult::advance(ctx.flow.next_node(&node.id, None))
                    .with_variable(LAST_INPUT_VARIABLE, reply.clone());
                if let Some(variable) = config.variable {
                    result = result.with_variable(variable, reply);
                }
                Ok(result)
            }
            None => {
                if let Some(prompt) = &config.prompt {
                    let text = render_template(prompt, &ctx.evaluation_context())?;
                    self.sender
                        .send_message(&ctx.state.conversation_id, &ctx.state.contact_id, &text)
                        .await?;
                }
                Ok(NodeExecutionResult::wait_for_input())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::node_executor::{MockMessageSender, MockWebhookClient, WebhookResponse};
    use crate::domain::execution_state::FlowExecutionState;
    use crate::domain::flow_definition::{FlowDefinition, FlowEdge, NodeKind, HANDLE_TIMEOUT};
    use crate::types::{FlowId, NodeId, TriggerEvent};

    fn flow(nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) -> FlowDefinition {
        let mut all = vec![FlowNode::new(
            "start",
            NodeKind::Trigger,
            json!({"trigger_type": "message_received"}),
        )];
        all.extend(nodes);
        FlowDefinition {
            id: FlowId::from("f"),
            name: "F".to_string(),
            description: None,
            active: true,
            nodes: all,
            edges,
        }
    }

    fn state(text: &str) -> FlowExecutionState {
        let mut state = FlowExecutionState::new(
            FlowId::from("f"),
            TriggerEvent::message("c1", "p1", text)
                .with_contact(json!({"name": "Ana", "age": 34, "tags": ["VIP", "trial"]})),
            NodeId::from("start"),
        );
        state.variables.insert("plan".to_string(), json!("Pro"));
        state
    }

    fn condition(rules: Value, extra: Value) -> ConditionConfig {
        let mut config = json!({ "conditions": rules });
        if let (Some(target), Some(source)) = (config.as_object_mut(), extra.as_object()) {
            for (k, v) in source {
                target.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(config).unwrap()
    }

    fn context() -> Value {
        let flow = flow(vec![], vec![]);
        let state = state("Hello World");
        NodeContext::new(&state, &flow, None).evaluation_context()
    }

    #[test]
    fn test_condition_operators() {
        let ctx = context();
        let cases = vec![
            (json!({"path": "contact.name", "operator": "equals", "value": "ana"}), true),
            (json!({"path": "contact.name", "operator": "not_equals", "value": "Bob"}), true),
            (json!({"path": "message.text", "operator": "contains", "value": "WORLD"}), true),
            (json!({"path": "contact.tags", "operator": "contains", "value": "vip"}), true),
            (json!({"path": "message.text", "operator": "starts_with", "value": "hello"}), true),
            (json!({"path": "message.text", "operator": "ends_with", "value": "there"}), false),
            (json!({"path": "message.text", "operator": "matches", "value": "^hel+o\\s"}), true),
            (json!({"path": "variables.plan", "operator": "exists"}), true),
            (json!({"path": "variables.email", "operator": "not_exists"}), true),
            (json!({"path": "contact.age", "operator": "greater_than", "value": 18}), true),
            (json!({"path": "contact.age", "operator": "less_than", "value": "30"}), false),
            (json!({"path": "contact.age", "operator": "equals", "value": "34"}), true),
            (json!({"path": "contact.name", "operator": "greater_than", "value": 1}), false),
        ];

        for (rule, expected) in cases {
            let config = condition(json!([rule.clone()]), json!({}));
            assert_eq!(config.evaluate(&ctx).unwrap(), expected, "rule: {}", rule);
        }
    }

    #[test]
    fn test_condition_case_sensitive_and_match_modes() {
        let ctx = context();
        let sensitive = condition(
            json!([{"path": "contact.name", "operator": "equals", "value": "ana"}]),
            json!({"case_sensitive": true}),
        );
        assert!(!sensitive.evaluate(&ctx).unwrap());

        let rules = json!([
            {"path": "contact.name", "operator": "equals", "value": "Bob"},
            {"path": "variables.plan", "operator": "equals", "value": "pro"}
        ]);
        assert!(!condition(rules.clone(), json!({"match": "all"})).evaluate(&ctx).unwrap());
        assert!(condition(rules, json!({"match": "any"})).evaluate(&ctx).unwrap());

        assert!(condition(json!([]), json!({})).evaluate(&ctx).unwrap());
    }

    #[test]
    fn test_condition_invalid_pattern() {
        let ctx = context();
        let config = condition(
            json!([{"path": "message.text", "operator": "matches", "value": "("}]),
            json!({}),
        );
        assert!(matches!(
            config.evaluate(&ctx),
            Err(CoreError::ExpressionError(_))
        ));
    }

    #[tokio::test]
    async fn test_condition_handler_routes_by_handle() {
        let node = FlowNode::new(
            "check",
            NodeKind::Condition,
            json!({"conditions": [{"path": "message.text", "operator": "contains", "value": "price"}]}),
        );
        let flow = flow(
            vec![
                node.clone(),
                FlowNode::new("yes", NodeKind::End, json!({})),
                FlowNode::new("no", NodeKind::End, json!({})),
            ],
            vec![
                FlowEdge::with_handle("check", "yes", HANDLE_TRUE),
                FlowEdge::with_handle("check", "no", HANDLE_FALSE),
            ],
        );

        let asking = state("What is the price?");
        let result = ConditionHandler
            .execute(&node, &NodeContext::new(&asking, &flow, None))
            .await
            .unwrap();
        assert_eq!(result.next_node_id, Some(NodeId::from("yes")));

        let other = state("hi");
        let result = ConditionHandler
            .execute(&node, &NodeContext::new(&other, &flow, None))
            .await
            .unwrap();
        assert_eq!(result.next_node_id, Some(NodeId::from("no")));
        assert_eq!(result.data.unwrap()["result"], false);
    }

    #[tokio::test]
    async fn test_message_handler_propagates_send_failure() {
        let mut sender = MockMessageSender::new();
        sender
            .expect_send_message()
            .returning(|_, _, _| Err(CoreError::ExternalDependencyError("gateway down".into())));
        let handler = MessageHandler::new(Arc::new(sender));

        let node = FlowNode::new("greet", NodeKind::Message, json!({"text": "Hi"}));
        let flow = flow(vec![node.clone()], vec![]);
        let state = state("hi");

        let err = handler
            .execute(&node, &NodeContext::new(&state, &flow, None))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_message_handler_rejects_empty_text() {
        let handler = MessageHandler::new(Arc::new(MockMessageSender::new()));
        let node = FlowNode::new("greet", NodeKind::Message, json!({"text": "{{ variables.none }}"}));
        let flow = flow(vec![node.clone()], vec![]);
        let state = state("hi");

        let result = handler
            .execute(&node, &NodeContext::new(&state, &flow, None))
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_webhook_handler_renders_and_stores() {
        let mut client = MockWebhookClient::new();
        client
            .expect_call()
            .withf(|request| {
                request.url == "https://crm.example.com/contacts/p1"
                    && request.method == "PUT"
                    && request.headers.get("X-Plan").map(String::as_str) == Some("Pro")
                    && request.body == Some(json!({"name": "Ana", "count": 1}))
            })
            .times(1)
            .returning(|_| {
                Ok(WebhookResponse {
                    status: 200,
                    body: json!({"score": 9}),
                })
            });
        let handler = WebhookHandler::new(Arc::new(client));

        let node = FlowNode::new(
            "hook",
            NodeKind::Webhook,
            json!({
                "url": "https://crm.example.com/contacts/{{contact.id}}",
                "method": "put",
                "headers": {"X-Plan": "{{variables.plan}}"},
                "body": {"name": "{{contact.name}}", "count": 1},
                "store_as": "crm"
            }),
        );
        let flow = flow(
            vec![node.clone(), FlowNode::new("done", NodeKind::End, json!({}))],
            vec![FlowEdge::new("hook", "done")],
        );
        let state = state("hi");

        let result = handler
            .execute(&node, &NodeContext::new(&state, &flow, None))
            .await
            .unwrap();
        assert_eq!(result.next_node_id, Some(NodeId::from("done")));
        assert_eq!(result.variables().unwrap()["crm"]["score"], 9);
    }

    #[tokio::test]
    async fn test_webhook_non_success_is_retryable_error() {
        let mut client = MockWebhookClient::new();
        client.expect_call().returning(|_| {
            Ok(WebhookResponse {
                status: 503,
                body: Value::Null,
            })
        });
        let handler = WebhookHandler::new(Arc::new(client));
        let node = FlowNode::new("hook", NodeKind::Webhook, json!({"url": "https://x.test"}));
        let flow = flow(vec![node.clone()], vec![]);
        let state = state("hi");

        let err = handler
            .execute(&node, &NodeContext::new(&state, &flow, None))
            .await
            .unwrap_err();
        assert!(matches!(&err, CoreError::ExternalDependencyError(msg) if msg.contains("HTTP 503")));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_capture_input_sources() {
        let node = FlowNode::new("cap", NodeKind::CaptureInput, json!({"variable": "answer"}));
        let flow = flow(vec![node.clone()], vec![]);
        let mut state = state("first message");

        let result = CaptureInputHandler
            .execute(&node, &NodeContext::new(&state, &flow, Some("typed")))
            .await
            .unwrap();
        assert_eq!(result.variables().unwrap()["answer"], "typed");

        state
            .variables
            .insert(LAST_INPUT_VARIABLE.to_string(), json!("earlier reply"));
        let result = CaptureInputHandler
            .execute(&node, &NodeContext::new(&state, &flow, None))
            .await
            .unwrap();
        assert_eq!(result.variables().unwrap()["answer"], "earlier reply");

        let from_message =
            FlowNode::new("cap", NodeKind::CaptureInput, json!({"variable": "m", "source": "message"}));
        let result = CaptureInputHandler
            .execute(&from_message, &NodeContext::new(&state, &flow, Some("typed")))
            .await
            .unwrap();
        assert_eq!(result.variables().unwrap()["m"], "first message");
    }

    #[tokio::test]
    async fn test_delay_handler() {
        let node = FlowNode::new("pause", NodeKind::Delay, json!({"minutes": 2, "seconds": 5}));
        let flow = flow(vec![node.clone()], vec![]);
        let state = state("hi");
        let ctx = NodeContext::new(&state, &flow, None);

        let result = DelayHandler.execute(&node, &ctx).await.unwrap();
        assert_eq!(
            result.resume_at,
            Some(ctx.now + chrono::Duration::seconds(125))
        );
        assert!(result.is_pause());

        let zero = FlowNode::new("pause", NodeKind::Delay, json!({}));
        let result = DelayHandler.execute(&zero, &ctx).await.unwrap();
        assert!(result.should_continue);

        let endless = FlowNode::new("pause", NodeKind::Delay, json!({"hours": u64::MAX}));
        let err = DelayHandler.execute(&endless, &ctx).await.unwrap_err();
        assert!(matches!(err, CoreError::ConfigurationError(_)));
    }

    #[test]
    fn test_timer_deadline_is_bounded() {
        let now = Utc::now();
        assert_eq!(
            timer_deadline(now, 90).unwrap(),
            now + chrono::Duration::seconds(90)
        );
        assert!(timer_deadline(now, MAX_DELAY_SECONDS).is_ok());

        for seconds in [MAX_DELAY_SECONDS + 1, 10_000_000_000_000, u64::MAX] {
            let err = timer_deadline(now, seconds).unwrap_err();
            assert!(matches!(err, CoreError::ConfigurationError(_)), "{}", seconds);
        }
    }

    #[test]
    fn test_validate_timers() {
        let ask = |config: Value| FlowNode::new("ask", NodeKind::WaitForInput, config);
        let pause = |config: Value| FlowNode::new("pause", NodeKind::Delay, config);

        let ok = flow(
            vec![ask(json!({"timeout_seconds": 3600})), pause(json!({"hours": 24}))],
            vec![],
        );
        assert!(validate_timers(&ok).is_ok());

        let long_wait = flow(vec![ask(json!({"timeout_seconds": 10_000_000_000_000u64}))], vec![]);
        let err = validate_timers(&long_wait).unwrap_err();
        assert_eq!(
            err,
            CoreError::ConfigurationError(format!(
                "Timer on node ask exceeds {} seconds",
                MAX_DELAY_SECONDS
            ))
        );

        let long_delay = flow(vec![pause(json!({"hours": 9_000_000}))], vec![]);
        assert!(validate_timers(&long_delay).is_err());

        let malformed = flow(vec![ask(json!({"timeout_seconds": "soon"}))], vec![]);
        assert!(validate_timers(&malformed).is_err());
    }

    #[tokio::test]
    async fn test_wait_for_input_prompts_then_captures() {
        let mut sender = MockMessageSender::new();
        sender
            .expect_send_message()
            .withf(|_, _, text| text.to_string() == "What's your email, Ana?")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let handler = WaitForInputHandler::new(Arc::new(sender));

        let node = FlowNode::new(
            "ask",
            NodeKind::WaitForInput,
            json!({"prompt": "What's your email, {{contact.name}}?", "variable": "email"}),
        );
        let flow = flow(
            vec![
                node.clone(),
                FlowNode::new("thanks", NodeKind::End, json!({})),
                FlowNode::new("late", NodeKind::End, json!({})),
            ],
            vec![
                FlowEdge::with_handle("ask", "late", HANDLE_TIMEOUT),
                FlowEdge::new("ask", "thanks"),
            ],
        );
        let state = state("hi");

        let first = handler
            .execute(&node, &NodeContext::new(&state, &flow, None))
            .await
            .unwrap();
        assert!(first.wait_for_user_input);

        let second = handler
            .execute(&node, &NodeContext::new(&state, &flow, Some("ana@example.com")))
            .await
            .unwrap();
        assert_eq!(second.next_node_id, Some(NodeId::from("thanks")));
        let variables = second.variables().unwrap();
        assert_eq!(variables["email"], "ana@example.com");
        assert_eq!(variables[LAST_INPUT_VARIABLE], "ana@example.com");
    }
}
