//! Outbound HTTP for webhook nodes

use async_trait::async_trait;
use inboxflow_core::{CoreError, WebhookClient, WebhookRequest, WebhookResponse};
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

/// `WebhookClient` backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestWebhookClient {
    client: reqwest::Client,
}

impl ReqwestWebhookClient {
    /// Create a client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("inboxflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                CoreError::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookClient for ReqwestWebhookClient {
    async fn call(&self, request: WebhookRequest) -> Result<WebhookResponse, CoreError> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            CoreError::ConfigurationError(format!("Invalid HTTP method: {}", request.method))
        })?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            CoreError::ExternalDependencyError(format!("Webhook {} failed: {}", request.url, e))
        })?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| {
            CoreError::ExternalDependencyError(format!(
                "Failed to read webhook response from {}: {}",
                request.url, e
            ))
        })?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        tracing::debug!(url = %request.url, status, "Webhook call finished");
        Ok(WebhookResponse { status, body })
    }
}
