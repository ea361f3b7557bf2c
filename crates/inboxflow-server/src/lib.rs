//!
//! Inboxflow Server - HTTP and WebSocket surface of the conversational flow engine
//!
//! This module exports all the components of the Inboxflow Server.

/// API module
pub mod api;

/// Configuration module
pub mod config;

/// Error module
pub mod error;

/// Outbound webhook HTTP client
pub mod http_client;

/// Outbound messaging and telemetry adapters
pub mod messaging;

/// Server module
pub mod server;

// Re-export key types
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use http_client::ReqwestWebhookClient;
pub use messaging::{LoggingMessageSender, MetricsEventHandler};
pub use server::{AppState, InboxflowServer};

/// Run function
pub async fn run(config: ServerConfig) -> ServerResult<()> {
    InboxflowServer::new(config)?.run().await
}
