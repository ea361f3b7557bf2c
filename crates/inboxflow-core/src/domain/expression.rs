//! Path resolution, template rendering and the evaluation context nodes see

use crate::domain::execution_state::FlowExecutionState;
use crate::domain::flow_definition::FlowDefinition;
use crate::CoreError;
use serde_json::{json, Value};

/// Build the JSON document conditions and templates are evaluated against
pub fn build_evaluation_context(
    state: &FlowExecutionState,
    flow: &FlowDefinition,
    user_input: Option<&str>,
) -> Value {
    let trigger = &state.trigger;

    let mut contact = match &trigger.contact {
        Value::Object(attributes) => attributes.clone(),
        _ => serde_json::Map::new(),
    };
    contact.insert("id".to_string(), json!(state.contact_id));

    json!({
        "message": {
            "text": trigger.text,
            "channel": trigger.channel,
            "kind": trigger.kind,
            "payload": trigger.payload,
            "receivedAt": trigger.received_at,
        },
        "contact": contact,
        "conversation": {
            "id": state.conversation_id,
            "channel": trigger.channel,
        },
        "variables": state.variables,
        "flow": {
            "id": flow.id,
            "name": flow.name,
            "executionId": state.id,
        },
        "input": user_input,
    })
}

/// Evaluate a JMESPath expression against `context`
pub fn resolve_path(path: &str, context: &Value) -> Result<Value, CoreError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(CoreError::ExpressionError("Empty path".to_string()));
    }

    let compiled = jmespath::compile(path).map_err(|e| {
        CoreError::ExpressionError(format!(
            "Failed to compile JMESPath expression: {}: {}",
            path, e
        ))
    })?;
    let found = compiled.search(context).map_err(|e| {
        CoreError::ExpressionError(format!(
            "Failed to evaluate JMESPath expression: {}: {}",
            path, e
        ))
    })?;

    Ok(serde_json::to_value(&*found)?)
}

/// Render a value the way it appears inside a message
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace every `{{ path }}` placeholder in `template`.
///
/// Unknown paths render as empty text. An unterminated placeholder is kept verbatim.
pub fn render_template(template: &str, context: &Value) -> Result<String, CoreError> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            break;
        };

        rendered.push_str(&rest[..open]);
        let value = resolve_path(&after_open[..close], context)?;
        rendered.push_str(&value_to_text(&value));
        rest = &after_open[close + 2..];
    }

    rendered.push_str(rest);
    Ok(rendered)
}

/// Render every string leaf of a JSON value as a template
pub fn render_value(value: &Value, context: &Value) -> Result<Value, CoreError> {
    Ok(match value {
        Value::String(s) => Value::String(render_template(s, context)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(item, context))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                rendered.insert(key.clone(), render_value(item, context)?);
            }
            Value::Object(rendered)
        }
        other => other.clone(),
    })
}
