/// Node dispatch and collaborator traits
pub mod node_executor;

/// Built-in node handlers
pub mod handlers;

/// Flow execution service
pub mod flow_execution_service;

/// Flow definition management service
pub mod flow_definition_service;

/// Lifecycle event fan-out
pub mod event_broadcaster;

/// Background processing of timers and reply deadlines
pub mod scheduler;
