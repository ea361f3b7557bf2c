//! Recording collaborators for tests and local runs

use crate::application::node_executor::{
    MessageSender, WebhookClient, WebhookRequest, WebhookResponse,
};
use crate::types::{ContactId, ConversationId};
use crate::CoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A message handed to [`RecordingMessageSender`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Conversation
    pub conversation_id: ConversationId,
    /// Recipient
    pub contact_id: ContactId,
    /// Rendered text
    pub text: String,
}

/// Message sender that keeps every message in memory
#[derive(Debug, Default)]
pub struct RecordingMessageSender {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingMessageSender {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, oldest first
    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    /// Texts sent so far, oldest first
    pub fn texts(&self) -> Vec<String> {
        lock(&self.sent).iter().map(|m| m.text.clone()).collect()
    }
}

#[async_trait]
impl MessageSender for RecordingMessageSender {
    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        contact_id: &ContactId,
        text: &str,
    ) -> Result<(), CoreError> {
        lock(&self.sent).push(SentMessage {
            conversation_id: conversation_id.clone(),
            contact_id: contact_id.clone(),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Webhook client that answers every request with the same response
#[derive(Debug)]
pub struct StaticWebhookClient {
    response: WebhookResponse,
    latency: Option<Duration>,
    requests: Mutex<Vec<WebhookRequest>>,
}

impl StaticWebhookClient {
    /// Answer with `status` and `body`
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            response: WebhookResponse { status, body },
            latency: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Wait `latency` before answering each request
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Answer `200 {}`
    pub fn ok() -> Self {
        Self::new(200, Value::Object(Default::default()))
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<WebhookRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl WebhookClient for StaticWebhookClient {
    async fn call(&self, request: WebhookRequest) -> Result<WebhookResponse, CoreError> {
        lock(&self.requests).push(request);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.response.clone())
    }
}
