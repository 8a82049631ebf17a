//! Parallel region controller: `parallel_start`, `parallel_end`,
//! `parallel_branch`.
//!
//! `parallel_start` snapshots the context once and spawns one task per
//! branch; branch tasks execute against their private snapshot and report a
//! single [`BranchOutcome`] over a channel. The shared context is written
//! only by the join in `parallel_end`, which drains the channel until the
//! region's strategy is satisfied. Results arriving after the join are
//! discarded along with the dropped receiver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{
    required_str, Node, NodeContext, NodeError, NodeExecutor, NodeExecutorRegistry, NodeOutcome,
    NodeServices,
};
use crate::context::ExecutionContext;
use crate::expr;
use crate::model::{
    BranchState, BranchStatus, FailureStrategy, JoinDecision, ParallelState, ParallelStrategy,
    WorkflowDefinition,
};
use crate::services::Actor;

/// Node types a branch chain may contain. Suspension and nested regions are
/// not allowed inside a branch.
const BRANCH_NODE_TYPES: [&str; 6] = ["tool", "agent", "script", "llm", "mcp_tool", "delay"];

/// Result of one branch task.
#[derive(Debug)]
pub struct BranchOutcome {
    pub branch_id: String,
    pub branch_name: String,
    pub result: Result<Value, String>,
}

/// Engine-owned table of in-flight parallel regions, keyed by
/// `executionId:parallelId`. `parallel_start` deposits the receiving end of
/// the branch channel; `parallel_end` takes it for the join.
#[derive(Default)]
pub struct ParallelRuntime {
    entries: Mutex<HashMap<String, mpsc::Receiver<BranchOutcome>>>,
}

impl ParallelRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(execution_id: &str, parallel_id: &str) -> String {
        format!("{}:{}", execution_id, parallel_id)
    }

    fn insert(&self, execution_id: &str, parallel_id: &str, rx: mpsc::Receiver<BranchOutcome>) {
        self.entries
            .lock()
            .insert(Self::key(execution_id, parallel_id), rx);
    }

    fn take(&self, execution_id: &str, parallel_id: &str) -> Option<mpsc::Receiver<BranchOutcome>> {
        self.entries
            .lock()
            .remove(&Self::key(execution_id, parallel_id))
    }

    /// Drop any receivers belonging to an execution (cancellation path).
    pub fn discard_execution(&self, execution_id: &str) {
        let prefix = format!("{}:", execution_id);
        self.entries.lock().retain(|k, _| !k.starts_with(&prefix));
    }
}

fn branch_name(node: &Node) -> String {
    node.data
        .get("branchName")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if node.label.is_empty() {
                node.id.clone()
            } else {
                node.label.clone()
            }
        })
}

/// Execute one branch chain against a private context snapshot. Returns the
/// output of the last node in the chain.
async fn run_branch(
    entry_node_id: String,
    execution_id: String,
    workflow: Arc<WorkflowDefinition>,
    services: Arc<NodeServices>,
    registry: Arc<NodeExecutorRegistry>,
    actor: Actor,
    mut context: ExecutionContext,
) -> Result<Value, NodeError> {
    let mut last_output = Value::Null;
    let mut current = workflow
        .outgoing_edges(&entry_node_id)
        .first()
        .map(|e| e.target.clone());

    while let Some(node_id) = current {
        let node = workflow.node(&node_id).ok_or_else(|| {
            NodeError::ExecutionError(format!("branch references unknown node {}", node_id))
        })?;
        if node.node_type == "parallel_end" {
            break;
        }
        if !BRANCH_NODE_TYPES.contains(&node.node_type.as_str()) {
            return Err(NodeError::ConfigError(format!(
                "node type {:?} is not allowed inside a parallel branch",
                node.node_type
            )));
        }
        let executor = registry.get(&node.node_type).ok_or_else(|| {
            NodeError::ConfigError(format!("unknown node type {:?}", node.node_type))
        })?;

        let mut node_ctx = NodeContext {
            execution_id: &execution_id,
            workflow: &workflow,
            context: &mut context,
            services: &services,
            registry: &registry,
            actor: &actor,
        };
        let outcome = executor.execute(node, &mut node_ctx).await?;
        context.record_node_output(&node.id, outcome.output.clone());
        context.merge_value(&outcome.output);
        last_output = outcome.output;

        current = workflow
            .outgoing_edges(&node.id)
            .first()
            .map(|e| e.target.clone());
    }

    Ok(last_output)
}

pub struct ParallelStartExecutor {
    runtime: Arc<ParallelRuntime>,
}

impl ParallelStartExecutor {
    pub fn new(runtime: Arc<ParallelRuntime>) -> Self {
        ParallelStartExecutor { runtime }
    }
}

#[async_trait]
impl NodeExecutor for ParallelStartExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let parallel_id = required_str(node, "parallelId")?;
        let branches = ctx.workflow.parallel_branches(parallel_id);
        if branches.is_empty() {
            return Err(NodeError::ConfigError(format!(
                "parallel region {:?} has no branches",
                parallel_id
            )));
        }

        let strategy: ParallelStrategy = node
            .data
            .get("parallelStrategy")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let failure_strategy: FailureStrategy = node
            .data
            .get("failureStrategy")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let timeout_ms = node.data.get("timeout").and_then(Value::as_u64);

        let mut state = ParallelState {
            parallel_id: parallel_id.to_string(),
            strategy,
            timeout_ms,
            start_time: Utc::now(),
            branches: branches
                .iter()
                .map(|b| BranchState {
                    branch_id: b.id.clone(),
                    branch_name: branch_name(b),
                    status: BranchStatus::Pending,
                    result: None,
                    error: None,
                    start_time: None,
                    end_time: None,
                })
                .collect(),
            completed_branches: Vec::new(),
            failed_branches: Vec::new(),
            results: Map::new(),
            failure_strategy,
        };
        ctx.context.put_parallel_state(&state)?;

        // One snapshot for the whole region; each task clones it.
        let snapshot = ctx.context.clone();
        let (tx, rx) = mpsc::channel(branches.len());
        for branch in &branches {
            let tx = tx.clone();
            let branch_id = branch.id.clone();
            let name = branch_name(branch);
            let execution_id = ctx.execution_id.to_string();
            let workflow = ctx.workflow.clone();
            let services = ctx.services.clone();
            let registry = ctx.registry.clone();
            let actor = ctx.actor.clone();
            let context = snapshot.clone();
            tokio::spawn(async move {
                let result = run_branch(
                    branch_id.clone(),
                    execution_id,
                    workflow,
                    services,
                    registry,
                    actor,
                    context,
                )
                .await
                .map_err(|e| e.to_string());
                if tx
                    .send(BranchOutcome {
                        branch_id,
                        branch_name: name,
                        result,
                    })
                    .await
                    .is_err()
                {
                    debug!("parallel join already finished, discarding branch result");
                }
            });
        }
        self.runtime.insert(ctx.execution_id, parallel_id, rx);

        // Branches are pending until their tasks exist; now they all do.
        let now = Utc::now();
        for branch in &mut state.branches {
            branch.status = BranchStatus::Running;
            branch.start_time = Some(now);
        }
        ctx.context.put_parallel_state(&state)?;

        Ok(NodeOutcome::next(json!({
            "parallelStarted": true,
            "parallelId": parallel_id,
            "branchCount": branches.len(),
        })))
    }
}

pub struct ParallelEndExecutor {
    runtime: Arc<ParallelRuntime>,
}

impl ParallelEndExecutor {
    pub fn new(runtime: Arc<ParallelRuntime>) -> Self {
        ParallelEndExecutor { runtime }
    }
}

fn apply_outcome(state: &mut ParallelState, outcome: BranchOutcome) {
    let now = Utc::now();
    match outcome.result {
        Ok(value) => {
            if let Some(branch) = state.branch_mut(&outcome.branch_id) {
                branch.status = BranchStatus::Completed;
                branch.result = Some(value.clone());
                branch.end_time = Some(now);
            }
            state.completed_branches.push(outcome.branch_id);
            state.results.insert(outcome.branch_name, value);
        }
        Err(error) => {
            warn!(branch_id = %outcome.branch_id, error = %error, "parallel branch failed");
            if let Some(branch) = state.branch_mut(&outcome.branch_id) {
                branch.status = BranchStatus::Failed;
                branch.error = Some(error.clone());
                branch.end_time = Some(now);
            }
            state.failed_branches.push(outcome.branch_id);
        }
    }
}

/// Mark every branch that never reported as failed with the given error.
fn fail_unfinished(state: &mut ParallelState, error: &str) {
    let unfinished: Vec<String> = state
        .branches
        .iter()
        .filter(|b| b.status == BranchStatus::Running || b.status == BranchStatus::Pending)
        .map(|b| b.branch_id.clone())
        .collect();
    for id in unfinished {
        if let Some(branch) = state.branch_mut(&id) {
            branch.status = BranchStatus::Failed;
            branch.error = Some(error.to_string());
            branch.end_time = Some(Utc::now());
        }
        state.failed_branches.push(id);
    }
}

#[async_trait]
impl NodeExecutor for ParallelEndExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let parallel_id = required_str(node, "parallelId")?;
        let mut state = ctx.context.parallel_state(parallel_id)?.ok_or_else(|| {
            NodeError::ExecutionError(format!(
                "parallel region {:?} was never started",
                parallel_id
            ))
        })?;
        let mut rx = self.runtime.take(ctx.execution_id, parallel_id).ok_or_else(|| {
            NodeError::ExecutionError(format!(
                "no in-flight branches for parallel region {:?}",
                parallel_id
            ))
        })?;

        let deadline = state.timeout_ms.map(|ms| {
            let elapsed = (Utc::now() - state.start_time)
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::time::Instant::now() + Duration::from_millis(ms).saturating_sub(elapsed)
        });

        let reason = loop {
            if let JoinDecision::Complete { reason } = state.join_decision() {
                break reason;
            }
            let received = match deadline {
                Some(at) => match tokio::time::timeout_at(at, rx.recv()).await {
                    Ok(r) => r,
                    Err(_) => {
                        fail_unfinished(&mut state, "parallel region timed out");
                        break "timeout";
                    }
                },
                None => rx.recv().await,
            };
            match received {
                Some(outcome) => apply_outcome(&mut state, outcome),
                None => {
                    // All senders gone without satisfying the strategy.
                    fail_unfinished(&mut state, "branch task ended without a result");
                }
            }
        };
        drop(rx);

        // Escalate failures per strategy before touching the context.
        let first_error = || {
            state
                .branches
                .iter()
                .find_map(|b| b.error.clone())
                .unwrap_or_else(|| "branch failed".to_string())
        };
        let escalate = match state.strategy {
            ParallelStrategy::WaitAll => {
                state.failure_strategy == FailureStrategy::FailFast
                    && !state.failed_branches.is_empty()
            }
            ParallelStrategy::WaitAny => state.completed_branches.is_empty(),
            ParallelStrategy::WaitFirst => false,
        };
        if escalate {
            ctx.context.put_parallel_state(&state)?;
            return Err(NodeError::ExecutionError(format!(
                "parallel region {:?} failed: {}",
                parallel_id,
                first_error()
            )));
        }

        let mut parallel_result = Value::Object(state.results.clone());
        if let Some(aggregation) = node.data.get("aggregationExpression").and_then(Value::as_str)
        {
            let mut scope = ctx.context.flat().clone();
            scope.insert("results".to_string(), parallel_result.clone());
            parallel_result = expr::evaluate(aggregation, &Value::Object(scope))?;
        }

        let mut output = json!({
            "parallelResult": parallel_result,
            "completedBranches": state.completed_branches,
            "failedBranches": state.failed_branches,
            "joinReason": reason,
            "durationMs": (Utc::now() - state.start_time).num_milliseconds(),
        });
        if state.failure_strategy != FailureStrategy::IgnoreErrors {
            let errors: Map<String, Value> = state
                .branches
                .iter()
                .filter_map(|b| {
                    b.error
                        .as_ref()
                        .map(|e| (b.branch_name.clone(), Value::String(e.clone())))
                })
                .collect();
            if !errors.is_empty() {
                output["branchErrors"] = Value::Object(errors);
            }
        }

        ctx.context.remove_parallel_state(parallel_id);
        Ok(NodeOutcome::next(output))
    }
}

/// `parallel_branch` nodes are entry markers discovered by `parallel_start`;
/// the main traversal never visits them.
pub struct ParallelBranchMarker;

#[async_trait]
impl NodeExecutor for ParallelBranchMarker {
    async fn execute(
        &self,
        node: &Node,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        Err(NodeError::ConfigError(format!(
            "parallel_branch node {} must not be wired into the main path",
            node.id
        )))
    }
}
