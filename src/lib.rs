//! graphflow: a resumable workflow orchestration engine.
//!
//! Workflows are declarative graphs of typed nodes and edges. The engine
//! validates the graph, walks it node by node, runs parallel regions as
//! concurrent branch tasks with a single-writer join, and can suspend an
//! execution indefinitely while it waits for user input, an approval
//! decision, or an external event. All outbound work (tools, agents, MCP
//! servers, LLM providers) goes through the traits in [`services`], so the
//! engine itself stays host-agnostic.
//!
//! ```no_run
//! use std::sync::Arc;
//! use graphflow::engine::{EngineConfig, InMemoryExecutionStore, WorkflowEngine};
//! use graphflow::nodes::NodeServices;
//! use graphflow::services::Actor;
//!
//! # async fn demo(services: NodeServices, workflow: graphflow::model::WorkflowDefinition) {
//! let engine = WorkflowEngine::new(
//!     services,
//!     Arc::new(InMemoryExecutionStore::new()),
//!     EngineConfig::default(),
//! );
//! let execution = engine
//!     .start(workflow, Actor::new("ada"), None, None, None)
//!     .await
//!     .unwrap();
//! println!("{}", execution.status.as_str());
//! # }
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod expr;
pub mod model;
pub mod nodes;
pub mod retry;
pub mod routing;
pub mod services;
pub mod template;
pub mod validate;

pub use context::ExecutionContext;
pub use engine::{EngineConfig, ExecutionStore, InMemoryExecutionStore, WorkflowEngine};
pub use error::{EngineError, EngineResult, NodeError, NodeResult};
pub use events::{EventEmitter, LifecycleEvent};
pub use model::{Execution, ExecutionStatus, ExecutionStep, WorkflowDefinition};
pub use nodes::{NodeServices, WaitKind};
pub use services::Actor;
