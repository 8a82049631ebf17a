//! Engine-level error types.

use super::NodeError;
use thiserror::Error;

/// Errors surfaced by the execution driver and workflow validation.
///
/// Validation errors are always raised before the first node runs; a
/// malformed workflow never reaches traversal. Suspension is not an error
/// and has no variant here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Workflow validation failed: {0}")]
    Validation(String),
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("Execution {id} is {actual}, expected {expected}")]
    InvalidStatus {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("No valid edge found from node {0}")]
    NoEdgeFound(String),
    #[error("Max steps exceeded: {0}")]
    MaxStepsExceeded(u32),
    #[error("Node execution error: node={node_id}, error={error}")]
    NodeExecution { node_id: String, error: String },
    #[error("Node error: {0}")]
    Node(Box<NodeError>),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<NodeError> for EngineError {
    fn from(value: NodeError) -> Self {
        EngineError::Node(Box::new(value))
    }
}
