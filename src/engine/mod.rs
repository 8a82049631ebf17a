//! Execution driver and persistence.

pub mod driver;
pub mod store;

pub use driver::{EngineConfig, WorkflowEngine};
pub use store::{ExecutionStore, InMemoryExecutionStore};
