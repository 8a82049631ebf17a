use thiserror::Error;

/// Node-level errors. Raised inside a single node executor; the driver records
/// them on the step and fails the execution unless the node type has its own
/// fallback path.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Expression error: {0}")]
    ExpressionError(String),
    #[error("Template error: {0}")]
    TemplateError(String),
    #[error("Routing error: {0}")]
    RoutingError(String),
    #[error("Missing input: {0}")]
    MissingInput(String),
    #[error("External call failed: {0}")]
    CallFailed(String),
    #[error("Timeout: call exceeded {0}ms")]
    Timeout(u64),
    #[error("Call failed after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::SerializationError(e.to_string())
    }
}
