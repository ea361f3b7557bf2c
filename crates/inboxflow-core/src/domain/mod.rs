/// Flow definition graph
pub mod flow_definition;

/// Execution state aggregate
pub mod execution_state;

/// Node execution results
pub mod node_result;

/// Execution lifecycle events
pub mod events;

/// Path resolution and template rendering
pub mod expression;

/// Repository interfaces
pub mod repository;
