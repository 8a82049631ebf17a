//! The execution driver: owns the traversal loop, suspension/resume, and
//! edge selection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::store::ExecutionStore;
use crate::error::{EngineError, EngineResult};
use crate::events::{sanitize, EventEmitter, LifecycleEvent};
use crate::expr;
use crate::model::{Execution, ExecutionStatus, ExecutionStep, Node, WorkflowDefinition};
use crate::nodes::{
    ControlFlow, NodeContext, NodeExecutorRegistry, NodeServices, ParallelRuntime,
};
use crate::services::Actor;
use crate::validate;

/// Engine-wide limits.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard cap on node visits per execution; exceeded executions fail.
    pub max_steps: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { max_steps: 500 }
    }
}

/// The workflow execution engine.
///
/// One instance serves many workflows and executions. `start` validates and
/// drives an execution until it completes, fails or suspends; the resume
/// family (`continue_with_input`, `resolve_approval`, `dispatch_event`)
/// picks suspended executions back up.
pub struct WorkflowEngine {
    store: Arc<dyn ExecutionStore>,
    registry: Arc<NodeExecutorRegistry>,
    services: Arc<NodeServices>,
    parallels: Arc<ParallelRuntime>,
    emitter: EventEmitter,
    config: EngineConfig,
    workflows: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    actors: RwLock<HashMap<String, Actor>>,
}

impl WorkflowEngine {
    pub fn new(
        services: NodeServices,
        store: Arc<dyn ExecutionStore>,
        config: EngineConfig,
    ) -> Self {
        let parallels = Arc::new(ParallelRuntime::new());
        let registry = Arc::new(NodeExecutorRegistry::new(parallels.clone()));
        WorkflowEngine {
            store,
            registry,
            services: Arc::new(services),
            parallels,
            emitter: EventEmitter::disabled(),
            config,
            workflows: RwLock::new(HashMap::new()),
            actors: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a lifecycle event listener, replacing any previous one.
    pub fn subscribe(&mut self, capacity: usize) -> mpsc::Receiver<LifecycleEvent> {
        let (emitter, rx) = EventEmitter::channel(capacity);
        self.emitter = emitter;
        rx
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Validate and run a workflow until it completes, fails or suspends.
    pub async fn start(
        &self,
        workflow: WorkflowDefinition,
        actor: Actor,
        input: Option<Map<String, Value>>,
        trigger_type: Option<String>,
        trigger_data: Option<Value>,
    ) -> EngineResult<Execution> {
        validate::validate(&workflow, &self.registry)?;
        let workflow = Arc::new(workflow);
        self.workflows
            .write()
            .insert(workflow.id.clone(), workflow.clone());

        let mut execution = Execution::new(&workflow.id);
        execution.status = ExecutionStatus::Running;
        execution.trigger_type = trigger_type;
        execution.trigger_data = trigger_data;
        execution.context.merge(&workflow.variables);
        if let Some(input) = input {
            execution.context.merge(&input);
            execution.input = Some(input);
        }
        self.actors.write().insert(execution.id.clone(), actor.clone());
        self.store.save_execution(&execution)?;

        info!(execution_id = %execution.id, workflow_id = %workflow.id, "workflow started");
        self.emitter.emit(LifecycleEvent::WorkflowStarted {
            execution_id: execution.id.clone(),
            workflow_id: workflow.id.clone(),
            timestamp: execution.started_at,
        });

        let start_id = workflow
            .start_node()
            .map(|n| n.id.clone())
            .ok_or_else(|| EngineError::Internal("validated workflow lost its start node".into()))?;
        self.run_loop(&mut execution, &workflow, &actor, start_id).await?;
        Ok(execution)
    }

    /// Resume a `waiting_input` execution with the user's input.
    pub async fn continue_with_input(
        &self,
        execution_id: &str,
        input: Map<String, Value>,
    ) -> EngineResult<Execution> {
        let mut execution = self.expect_status(execution_id, ExecutionStatus::WaitingInput)?;
        execution.context.merge(&input);
        if !input.contains_key("userInput") {
            execution
                .context
                .set("userInput", Value::Object(input.clone()));
        }
        self.resume(execution, Value::Object(input)).await
    }

    /// Resolve a pending approval and resume.
    pub async fn resolve_approval(
        &self,
        execution_id: &str,
        approved: bool,
        comment: Option<String>,
    ) -> EngineResult<Execution> {
        let mut execution = self.expect_status(execution_id, ExecutionStatus::WaitingApproval)?;
        let mut decision = Map::new();
        decision.insert("approved".to_string(), Value::Bool(approved));
        if let Some(comment) = comment {
            decision.insert("approvalComment".to_string(), Value::String(comment));
        }
        decision.insert(
            "approvalTimestamp".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        execution.context.merge(&decision);
        self.resume(execution, Value::Object(decision)).await
    }

    /// Deliver an event to every `waiting_event` execution whose current
    /// node matches. Returns the ids of the executions that were resumed.
    pub async fn dispatch_event(
        &self,
        event_type: &str,
        event_data: Value,
    ) -> EngineResult<Vec<String>> {
        let waiting = self.store.list_by_status(ExecutionStatus::WaitingEvent)?;
        let mut resumed = Vec::new();

        for mut execution in waiting {
            let Some(node_id) = execution.current_node_id.clone() else {
                continue;
            };
            let Ok(workflow) = self.workflow_for(&execution) else {
                continue;
            };
            let Some(node) = workflow.node(&node_id) else {
                continue;
            };
            if node.node_type != "wait_event" {
                continue;
            }
            if node.data.get("eventType").and_then(Value::as_str) != Some(event_type) {
                continue;
            }
            if let Some(condition) = node.data.get("eventCondition").and_then(Value::as_str) {
                let scope = json!({ "event": event_data });
                match expr::evaluate_bool(condition, &scope) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        warn!(execution_id = %execution.id, error = %e, "event condition failed");
                        continue;
                    }
                }
            }

            let id = execution.id.clone();
            execution.context.set("eventData", event_data.clone());
            execution.context.set(
                "lastEvent",
                json!({ "type": event_type, "data": event_data }),
            );
            let received = json!({ "eventType": event_type, "eventData": event_data });
            self.resume(execution, received).await?;
            resumed.push(id);
        }

        Ok(resumed)
    }

    /// Mark an execution cancelled. A running traversal observes the stored
    /// status between nodes and stops; in-flight branch results are dropped.
    pub fn cancel(&self, execution_id: &str) -> EngineResult<Execution> {
        let mut execution = self.store.execution(execution_id)?;
        if execution.status.is_terminal() {
            return Err(EngineError::InvalidStatus {
                id: execution_id.to_string(),
                expected: "an active status".to_string(),
                actual: execution.status.as_str().to_string(),
            });
        }
        execution.cancel();
        self.store.save_execution(&execution)?;
        self.parallels.discard_execution(execution_id);
        self.actors.write().remove(execution_id);
        info!(execution_id, "execution cancelled");
        Ok(execution)
    }

    pub fn execution(&self, id: &str) -> EngineResult<Execution> {
        self.store.execution(id)
    }

    pub fn steps(&self, execution_id: &str) -> EngineResult<Vec<ExecutionStep>> {
        self.store.steps(execution_id)
    }

    // ---- internals ----

    fn expect_status(&self, id: &str, expected: ExecutionStatus) -> EngineResult<Execution> {
        let execution = self.store.execution(id)?;
        if execution.status != expected {
            return Err(EngineError::InvalidStatus {
                id: id.to_string(),
                expected: expected.as_str().to_string(),
                actual: execution.status.as_str().to_string(),
            });
        }
        Ok(execution)
    }

    fn workflow_for(&self, execution: &Execution) -> EngineResult<Arc<WorkflowDefinition>> {
        self.workflows
            .read()
            .get(&execution.workflow_id)
            .cloned()
            .ok_or_else(|| {
                EngineError::Internal(format!(
                    "workflow {} is not registered with this engine",
                    execution.workflow_id
                ))
            })
    }

    fn actor_for(&self, execution_id: &str) -> EngineResult<Actor> {
        self.actors
            .read()
            .get(execution_id)
            .cloned()
            .ok_or_else(|| {
                EngineError::Internal(format!("no actor recorded for execution {}", execution_id))
            })
    }

    /// Shared tail of every resume call: record what the waiting node
    /// received, flip to running, and continue past it.
    async fn resume(
        &self,
        mut execution: Execution,
        received: Value,
    ) -> EngineResult<Execution> {
        let node_id = execution.current_node_id.clone().ok_or_else(|| {
            EngineError::Internal(format!(
                "waiting execution {} has no current node",
                execution.id
            ))
        })?;
        let workflow = self.workflow_for(&execution)?;
        let actor = self.actor_for(&execution.id)?;
        let node = workflow
            .node(&node_id)
            .ok_or_else(|| EngineError::NodeNotFound(node_id.clone()))?;

        execution.context.record_node_output(&node_id, received.clone());
        execution.status = ExecutionStatus::Running;
        self.store.save_execution(&execution)?;
        info!(execution_id = %execution.id, node_id = %node_id, "execution resumed");

        match self.select_next(&workflow, node, &received, &execution) {
            Ok(Some(next)) => {
                self.run_loop(&mut execution, &workflow, &actor, next).await?;
            }
            Ok(None) => self.complete_execution(&mut execution)?,
            Err(e) => self.fail_execution(&mut execution, e.to_string())?,
        }
        Ok(execution)
    }

    /// The traversal loop. Returns when the execution reaches a terminal or
    /// waiting status; engine-level errors (not node failures) bubble up.
    async fn run_loop(
        &self,
        execution: &mut Execution,
        workflow: &Arc<WorkflowDefinition>,
        actor: &Actor,
        start_node_id: String,
    ) -> EngineResult<()> {
        let execution_id = execution.id.clone();
        let mut current = start_node_id;

        for _ in 0..self.config.max_steps {
            // Observe cancellation between nodes.
            if let Ok(stored) = self.store.execution(&execution_id) {
                if stored.status == ExecutionStatus::Cancelled {
                    execution.status = ExecutionStatus::Cancelled;
                    execution.completed_at = stored.completed_at;
                    self.parallels.discard_execution(&execution_id);
                    return Ok(());
                }
            }

            let Some(node) = workflow.node(&current) else {
                self.fail_execution(execution, format!("node not found: {}", current))?;
                return Ok(());
            };
            let node = node.clone();

            execution.current_node_id = Some(node.id.clone());
            self.store.save_execution(execution)?;
            let mut step =
                ExecutionStep::begin(&execution_id, &node.id, &node.node_type, &node.label);
            if !node.data.is_null() {
                step.input = Some(node.data.clone());
            }
            self.store.save_step(&step)?;
            self.emitter.emit(LifecycleEvent::NodeStarted {
                execution_id: execution_id.clone(),
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
                timestamp: step.started_at,
            });
            let started = Instant::now();

            let Some(executor) = self.registry.get(&node.node_type) else {
                let message = format!("unknown node type: {}", node.node_type);
                step.fail(message.clone());
                self.store.save_step(&step)?;
                self.fail_execution(execution, message)?;
                return Ok(());
            };

            let result = {
                let mut node_ctx = NodeContext {
                    execution_id: &execution_id,
                    workflow,
                    context: &mut execution.context,
                    services: &self.services,
                    registry: &self.registry,
                    actor,
                };
                executor.execute(&node, &mut node_ctx).await
            };

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    step.fail(e.to_string());
                    self.store.save_step(&step)?;
                    self.emitter.emit(LifecycleEvent::NodeFailed {
                        execution_id: execution_id.clone(),
                        node_id: node.id.clone(),
                        node_type: node.node_type.clone(),
                        error: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                    self.fail_execution(
                        execution,
                        EngineError::NodeExecution {
                            node_id: node.id.clone(),
                            error: e.to_string(),
                        }
                        .to_string(),
                    )?;
                    return Ok(());
                }
            };

            execution
                .context
                .record_node_output(&node.id, outcome.output.clone());
            execution.context.merge_value(&outcome.output);
            let duration_ms = started.elapsed().as_millis() as i64;

            match outcome.control {
                ControlFlow::Next => {
                    step.complete(outcome.output.clone(), outcome.retries);
                    self.store.save_step(&step)?;
                    self.emit_node_completed(&execution_id, &node, &outcome.output, duration_ms);
                    // Edge-selection errors fail the execution rather than
                    // escaping the loop with it stuck in running.
                    match self.select_next(workflow, &node, &outcome.output, execution) {
                        Ok(Some(next)) => current = next,
                        Ok(None) => {
                            self.complete_execution(execution)?;
                            return Ok(());
                        }
                        Err(e) => {
                            self.fail_execution(execution, e.to_string())?;
                            return Ok(());
                        }
                    }
                    self.store.save_execution(execution)?;
                }
                ControlFlow::Jump(target) => {
                    step.complete(outcome.output.clone(), outcome.retries);
                    self.store.save_step(&step)?;
                    self.emit_node_completed(&execution_id, &node, &outcome.output, duration_ms);
                    current = target;
                    self.store.save_execution(execution)?;
                }
                ControlFlow::Suspend(kind) => {
                    step.wait(outcome.output.clone());
                    self.store.save_step(&step)?;
                    execution.status = kind.status();
                    self.store.save_execution(execution)?;
                    self.emitter.emit(LifecycleEvent::NodeWaiting {
                        execution_id: execution_id.clone(),
                        node_id: node.id.clone(),
                        node_type: node.node_type.clone(),
                        waiting_for: kind.as_str().to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                    info!(execution_id = %execution_id, node_id = %node.id, waiting_for = kind.as_str(), "execution suspended");
                    return Ok(());
                }
                ControlFlow::Complete => {
                    step.complete(outcome.output.clone(), outcome.retries);
                    self.store.save_step(&step)?;
                    self.emit_node_completed(&execution_id, &node, &outcome.output, duration_ms);
                    self.complete_execution(execution)?;
                    return Ok(());
                }
            }
        }

        self.fail_execution(
            execution,
            EngineError::MaxStepsExceeded(self.config.max_steps).to_string(),
        )?;
        Ok(())
    }

    fn emit_node_completed(&self, execution_id: &str, node: &Node, output: &Value, duration_ms: i64) {
        self.emitter.emit(LifecycleEvent::NodeCompleted {
            execution_id: execution_id.to_string(),
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            output: sanitize(output),
            duration_ms,
            timestamp: chrono::Utc::now(),
        });
    }

    fn complete_execution(&self, execution: &mut Execution) -> EngineResult<()> {
        execution.complete();
        self.store.save_execution(execution)?;
        self.actors.write().remove(&execution.id);
        info!(execution_id = %execution.id, "workflow completed");
        self.emitter.emit(LifecycleEvent::WorkflowCompleted {
            execution_id: execution.id.clone(),
            output: sanitize(execution.output.as_ref().unwrap_or(&Value::Null)),
            duration_ms: execution
                .completed_at
                .map(|t| (t - execution.started_at).num_milliseconds())
                .unwrap_or_default(),
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    fn fail_execution(&self, execution: &mut Execution, message: String) -> EngineResult<()> {
        error!(execution_id = %execution.id, error = %message, "workflow failed");
        execution.fail(message.clone());
        self.store.save_execution(execution)?;
        self.parallels.discard_execution(&execution.id);
        self.actors.write().remove(&execution.id);
        self.emitter.emit(LifecycleEvent::WorkflowFailed {
            execution_id: execution.id.clone(),
            error: message,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Pick the node after `node`, or `None` when the path ends here.
    fn select_next(
        &self,
        workflow: &WorkflowDefinition,
        node: &Node,
        output: &Value,
        execution: &Execution,
    ) -> EngineResult<Option<String>> {
        let edges = workflow.outgoing_edges(&node.id);
        if edges.is_empty() {
            return Ok(None);
        }
        let scope = execution.context.as_value();

        match node.node_type.as_str() {
            "condition" => {
                if let Some(selected) = output.get("selectedNodeId").and_then(Value::as_str) {
                    if let Some(edge) = edges.iter().find(|e| e.target == selected) {
                        return Ok(Some(edge.target.clone()));
                    }
                    if workflow.node(selected).is_some() {
                        return Ok(Some(selected.to_string()));
                    }
                    return Err(EngineError::NodeNotFound(selected.to_string()));
                }
                if let Some(result) = output.get("conditionResult").and_then(Value::as_bool) {
                    let wanted = if result { "true" } else { "false" };
                    if let Some(edge) = edges.iter().find(|e| {
                        e.label
                            .as_deref()
                            .map(|l| l.eq_ignore_ascii_case(wanted))
                            .unwrap_or(false)
                    }) {
                        return Ok(Some(edge.target.clone()));
                    }
                    // Positional fallback: true takes the first edge, false
                    // the second.
                    let index = if result { 0 } else { 1.min(edges.len() - 1) };
                    return Ok(Some(edges[index].target.clone()));
                }
                if let Some(edge) = edges.iter().find(|e| e.condition.is_none()) {
                    return Ok(Some(edge.target.clone()));
                }
                Ok(Some(edges[0].target.clone()))
            }
            "intent_recognition" => {
                if let Some(suggested) = output.get("suggestedNodeId").and_then(Value::as_str) {
                    if let Some(edge) = edges.iter().find(|e| e.target == suggested) {
                        return Ok(Some(edge.target.clone()));
                    }
                }
                for edge in &edges {
                    if let Some(condition) = &edge.condition {
                        if expr::evaluate_bool(condition, &scope).map_err(EngineError::from)? {
                            return Ok(Some(edge.target.clone()));
                        }
                    }
                }
                if let Some(edge) = edges.iter().find(|e| {
                    e.label
                        .as_deref()
                        .map(|l| {
                            let l = l.to_lowercase();
                            l == "clarification" || l == "fallback"
                        })
                        .unwrap_or(false)
                }) {
                    return Ok(Some(edge.target.clone()));
                }
                Ok(Some(edges[0].target.clone()))
            }
            _ => {
                for edge in &edges {
                    match &edge.condition {
                        None => return Ok(Some(edge.target.clone())),
                        Some(condition) => {
                            if expr::evaluate_bool(condition, &scope).map_err(EngineError::from)? {
                                return Ok(Some(edge.target.clone()));
                            }
                        }
                    }
                }
                Err(EngineError::NoEdgeFound(node.id.clone()))
            }
        }
    }
}
