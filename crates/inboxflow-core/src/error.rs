use thiserror::Error;

/// Core error type for the Inboxflow engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Flow definition not found
    #[error("Flow definition not found: {0}")]
    FlowDefinitionNotFound(String),

    /// Flow execution not found
    #[error("Flow execution not found: {0}")]
    ExecutionNotFound(String),

    /// Node referenced by an execution or edge does not exist
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// No handler registered for a node kind
    #[error("No handler registered for node kind: {0}")]
    NodeHandlerNotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Illegal state transition or engine failure
    #[error("Flow execution error: {0}")]
    FlowExecutionError(String),

    /// A node handler failed
    #[error("Node execution error: {0}")]
    NodeExecutionError(String),

    /// A node handler exceeded its time budget
    #[error("Node timed out after {0}ms")]
    NodeTimeout(u64),

    /// Expression or template evaluation error
    #[error("Expression evaluation error: {0}")]
    ExpressionError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// External dependency error (message gateway, webhook target)
    #[error("External dependency error: {0}")]
    ExternalDependencyError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Whether a failed step may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::NodeExecutionError(_)
                | CoreError::NodeTimeout(_)
                | CoreError::ExternalDependencyError(_)
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}
