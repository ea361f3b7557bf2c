//! Value objects shared across the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the inner string
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Value object: Flow ID
    FlowId
);
id_type!(
    /// Value object: Node ID within a flow graph
    NodeId
);
id_type!(
    /// Value object: Flow execution ID
    ExecutionId
);
id_type!(
    /// Value object: Conversation ID
    ConversationId
);
id_type!(
    /// Value object: Contact ID
    ContactId
);

impl ExecutionId {
    /// Generate a fresh random execution id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// What produced a trigger event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Inbound message on a conversation
    Message,
    /// External webhook call addressed to a flow
    Webhook,
    /// Scheduled start of a flow
    Schedule,
}

/// An inbound event that may start or resume executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    /// Event source
    pub kind: TriggerKind,

    /// Conversation the event belongs to
    pub conversation_id: ConversationId,

    /// Contact on the other end of the conversation
    pub contact_id: ContactId,

    /// Channel the message arrived on (e.g. "whatsapp", "messenger")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Message text, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Flow targeted by webhook and schedule events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<FlowId>,

    /// Contact attributes available to conditions and templates
    #[serde(default)]
    pub contact: Value,

    /// Arbitrary payload (webhook body, schedule metadata)
    #[serde(default)]
    pub payload: Value,

    /// When the event was received
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl TriggerEvent {
    /// Inbound message event
    pub fn message(
        conversation_id: impl Into<ConversationId>,
        contact_id: impl Into<ContactId>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            kind: TriggerKind::Message,
            conversation_id: conversation_id.into(),
            contact_id: contact_id.into(),
            channel: None,
            text: Some(text.into()),
            flow_id: None,
            contact: Value::Null,
            payload: Value::Null,
            received_at: Utc::now(),
        }
    }

    /// Webhook event addressed to a specific flow
    pub fn webhook(
        flow_id: impl Into<FlowId>,
        conversation_id: impl Into<ConversationId>,
        contact_id: impl Into<ContactId>,
        payload: Value,
    ) -> Self {
        Self {
            kind: TriggerKind::Webhook,
            conversation_id: conversation_id.into(),
            contact_id: contact_id.into(),
            channel: None,
            text: None,
            flow_id: Some(flow_id.into()),
            contact: Value::Null,
            payload,
            received_at: Utc::now(),
        }
    }

    /// Scheduled start of a flow
    pub fn schedule(
        flow_id: impl Into<FlowId>,
        conversation_id: impl Into<ConversationId>,
        contact_id: impl Into<ContactId>,
    ) -> Self {
        Self {
            kind: TriggerKind::Schedule,
            conversation_id: conversation_id.into(),
            contact_id: contact_id.into(),
            channel: None,
            text: None,
            flow_id: Some(flow_id.into()),
            contact: Value::Null,
            payload: Value::Null,
            received_at: Utc::now(),
        }
    }

    /// Set the channel
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Set contact attributes
    pub fn with_contact(mut self, contact: Value) -> Self {
        self.contact = contact;
        self
    }
}
