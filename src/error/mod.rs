//! Error types for the workflow engine.
//!
//! - [`NodeError`]: errors raised during individual node execution.
//! - [`EngineError`]: top-level errors for validation, resumption, and running.

pub mod engine_error;
pub mod node_error;

pub use engine_error::EngineError;
pub use node_error::NodeError;

/// Convenience alias for engine-level results.
pub type EngineResult<T> = Result<T, EngineError>;
/// Convenience alias for node-level results.
pub type NodeResult<T> = Result<T, NodeError>;
