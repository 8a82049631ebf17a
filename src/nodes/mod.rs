//! Node executors: one per node type, looked up by type string.

pub mod call;
pub mod condition;
pub mod control;
pub mod interaction;
pub mod intent;
pub mod llm;
pub mod loops;
pub mod parallel;
pub mod script;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::NodeError;
use crate::model::{ExecutionStatus, Node, WorkflowDefinition};
use crate::services::{Actor, AgentChat, LlmClient, McpClient, ToolExecutor};

pub use parallel::ParallelRuntime;

/// What a suspended execution is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    Input,
    Event,
    Approval,
}

impl WaitKind {
    pub fn status(self) -> ExecutionStatus {
        match self {
            WaitKind::Input => ExecutionStatus::WaitingInput,
            WaitKind::Event => ExecutionStatus::WaitingEvent,
            WaitKind::Approval => ExecutionStatus::WaitingApproval,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WaitKind::Input => "user_input",
            WaitKind::Event => "event",
            WaitKind::Approval => "approval",
        }
    }
}

/// Where the driver goes after a node finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFlow {
    /// Follow edge selection from this node.
    Next,
    /// Go directly to a node, bypassing edges (loop back-jumps, routers).
    Jump(String),
    /// Persist and stop; a resume call continues past this node.
    Suspend(WaitKind),
    /// The execution is done.
    Complete,
}

/// Result of one node execution.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub output: Value,
    pub control: ControlFlow,
    /// Retries consumed by the call adapter, recorded on the step.
    pub retries: u32,
}

impl NodeOutcome {
    pub fn next(output: Value) -> Self {
        NodeOutcome {
            output,
            control: ControlFlow::Next,
            retries: 0,
        }
    }

    pub fn jump(output: Value, target: impl Into<String>) -> Self {
        NodeOutcome {
            output,
            control: ControlFlow::Jump(target.into()),
            retries: 0,
        }
    }

    pub fn suspend(output: Value, kind: WaitKind) -> Self {
        NodeOutcome {
            output,
            control: ControlFlow::Suspend(kind),
            retries: 0,
        }
    }

    pub fn complete(output: Value) -> Self {
        NodeOutcome {
            output,
            control: ControlFlow::Complete,
            retries: 0,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// The outbound collaborators every executor can reach.
pub struct NodeServices {
    pub tools: Arc<dyn ToolExecutor>,
    pub agents: Arc<dyn AgentChat>,
    pub mcp: Arc<dyn McpClient>,
    pub llm: Arc<dyn LlmClient>,
}

/// Per-invocation view handed to an executor: the execution's mutable
/// context plus everything needed for outbound calls. Parallel branch tasks
/// build their own with a private context snapshot.
pub struct NodeContext<'a> {
    pub execution_id: &'a str,
    pub workflow: &'a Arc<WorkflowDefinition>,
    pub context: &'a mut ExecutionContext,
    pub services: &'a Arc<NodeServices>,
    pub registry: &'a Arc<NodeExecutorRegistry>,
    pub actor: &'a Actor,
}

/// Trait for node execution. Each node type implements this.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError>;
}

/// Registry of node executors by node type string.
pub struct NodeExecutorRegistry {
    executors: HashMap<String, Box<dyn NodeExecutor>>,
}

impl NodeExecutorRegistry {
    /// Registry with all built-in node types. The two parallel executors
    /// share the runtime that carries branch result channels.
    pub fn new(parallels: Arc<ParallelRuntime>) -> Self {
        let mut registry = NodeExecutorRegistry {
            executors: HashMap::new(),
        };
        registry.register("start", Box::new(control::StartExecutor));
        registry.register("end", Box::new(control::EndExecutor));
        registry.register("tool", Box::new(call::ToolNodeExecutor));
        registry.register("agent", Box::new(call::AgentNodeExecutor));
        registry.register("mcp_tool", Box::new(call::McpToolNodeExecutor));
        registry.register("condition", Box::new(condition::ConditionExecutor));
        registry.register("script", Box::new(script::ScriptExecutor));
        registry.register("delay", Box::new(script::DelayExecutor));
        registry.register("user_input", Box::new(interaction::UserInputExecutor));
        registry.register("wait_event", Box::new(interaction::WaitEventExecutor));
        registry.register("approval", Box::new(interaction::ApprovalExecutor));
        registry.register("llm", Box::new(llm::LlmExecutor));
        registry.register("intent_recognition", Box::new(intent::IntentRecognitionExecutor));
        registry.register("loop_start", Box::new(loops::LoopStartExecutor));
        registry.register("loop_end", Box::new(loops::LoopEndExecutor));
        registry.register("loop_condition", Box::new(loops::LoopConditionExecutor));
        registry.register(
            "parallel_start",
            Box::new(parallel::ParallelStartExecutor::new(parallels.clone())),
        );
        registry.register(
            "parallel_end",
            Box::new(parallel::ParallelEndExecutor::new(parallels)),
        );
        registry.register("parallel_branch", Box::new(parallel::ParallelBranchMarker));
        registry
    }

    pub fn register(&mut self, node_type: &str, executor: Box<dyn NodeExecutor>) {
        self.executors.insert(node_type.to_string(), executor);
    }

    pub fn get(&self, node_type: &str) -> Option<&dyn NodeExecutor> {
        self.executors.get(node_type).map(|e| e.as_ref())
    }

    pub fn node_types(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(String::as_str)
    }
}

/// Required string field from a node's `data` bag.
pub(crate) fn required_str<'a>(node: &'a Node, key: &str) -> Result<&'a str, NodeError> {
    node.data
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            NodeError::ConfigError(format!("node {} is missing {:?}", node.id, key))
        })
}

pub(crate) fn optional_str<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.data
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
