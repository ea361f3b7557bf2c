//! Error types for the Inboxflow Server
//!
//! This module contains the error types used throughout the server.

use inboxflow_core::CoreError;
use thiserror::Error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    /// Resource not found
    #[error("{resource} {id} not found")]
    NotFound {
        /// Kind of resource ("Flow", "Execution")
        resource: String,
        /// Requested identifier
        id: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The request conflicts with the current state of an execution
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Engine failure
    #[error("Engine error: {0}")]
    EngineError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    /// Missing flow definition
    pub fn flow_not_found(id: impl Into<String>) -> Self {
        ServerError::NotFound {
            resource: "Flow".to_string(),
            id: id.into(),
        }
    }

    /// Missing execution
    pub fn execution_not_found(id: impl Into<String>) -> Self {
        ServerError::NotFound {
            resource: "Execution".to_string(),
            id: id.into(),
        }
    }
}

// Implement conversions from other error types
impl From<CoreError> for ServerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::FlowDefinitionNotFound(id) => ServerError::flow_not_found(id),
            CoreError::ExecutionNotFound(id) => ServerError::execution_not_found(id),
            CoreError::ValidationError(msg)
            | CoreError::ConfigurationError(msg)
            | CoreError::ExpressionError(msg) => ServerError::ValidationError(msg),
            CoreError::FlowExecutionError(msg) => ServerError::Conflict(msg),
            other => ServerError::EngineError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::ValidationError(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::InternalError(format!("IO error: {}", err))
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::InternalError(format!("Error: {}", err))
    }
}
