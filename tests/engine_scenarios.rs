//! End-to-end engine scenarios against mocked collaborators.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use graphflow::engine::{EngineConfig, InMemoryExecutionStore, WorkflowEngine};
use graphflow::error::{EngineError, NodeError};
use graphflow::model::{ExecutionStatus, StepStatus, WorkflowDefinition};
use graphflow::nodes::NodeServices;
use graphflow::services::{
    Actor, AgentChat, ChatRequest, ChatResponse, LlmClient, McpClient, ToolExecutor,
};

/// Tool mock: `flaky` fails until its counter runs out, `fail` always
/// fails, `slow` sleeps first, anything else echoes its arguments.
struct TestTools {
    flaky_failures: AtomicU32,
}

impl TestTools {
    fn new(flaky_failures: u32) -> Self {
        TestTools {
            flaky_failures: AtomicU32::new(flaky_failures),
        }
    }
}

#[async_trait]
impl ToolExecutor for TestTools {
    async fn execute(&self, tool_id: &str, args: &Value, _actor: &Actor) -> Result<Value, NodeError> {
        match tool_id {
            "fail" => Err(NodeError::CallFailed("tool is broken".into())),
            "flaky" => {
                let remaining = self.flaky_failures.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.flaky_failures.store(remaining - 1, Ordering::SeqCst);
                    Err(NodeError::CallFailed("transient".into()))
                } else {
                    Ok(json!({ "ok": true }))
                }
            }
            "slow" => {
                tokio::time::sleep(std::time::Duration::from_millis(150)).await;
                Ok(json!({ "slow": true }))
            }
            other => Ok(json!({ "tool": other, "echo": args })),
        }
    }
}

struct StubAgents;

#[async_trait]
impl AgentChat for StubAgents {
    async fn chat(
        &self,
        agent_id: &str,
        _conversation_id: &str,
        message: &str,
        _actor: &Actor,
    ) -> Result<Value, NodeError> {
        Ok(json!({ "agent": agent_id, "reply": format!("ack: {}", message) }))
    }
}

struct StubMcp;

#[async_trait]
impl McpClient for StubMcp {
    async fn execute_tool(
        &self,
        _server_id: &str,
        tool_name: &str,
        _args: &Value,
        _actor: &Actor,
    ) -> Result<Value, NodeError> {
        Ok(json!({ "mcp": tool_name }))
    }

    async fn execute_tool_by_name(
        &self,
        server_name: &str,
        _tool_name: &str,
        _args: &Value,
        _actor: &Actor,
    ) -> Result<Value, NodeError> {
        Err(NodeError::CallFailed(format!(
            "server {:?} is not connected",
            server_name
        )))
    }
}

struct StubLlm {
    content: String,
}

#[async_trait]
impl LlmClient for StubLlm {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, NodeError> {
        Ok(ChatResponse {
            content: self.content.clone(),
            usage: None,
        })
    }
}

fn engine_with(flaky_failures: u32, llm_content: &str) -> WorkflowEngine {
    let services = NodeServices {
        tools: Arc::new(TestTools::new(flaky_failures)),
        agents: Arc::new(StubAgents),
        mcp: Arc::new(StubMcp),
        llm: Arc::new(StubLlm {
            content: llm_content.to_string(),
        }),
    };
    WorkflowEngine::new(
        services,
        Arc::new(InMemoryExecutionStore::new()),
        EngineConfig::default(),
    )
}

fn engine() -> WorkflowEngine {
    engine_with(0, "ok")
}

fn workflow(value: Value) -> WorkflowDefinition {
    serde_json::from_value(value).expect("workflow json")
}

fn input(pairs: Value) -> Map<String, Value> {
    pairs.as_object().expect("object input").clone()
}

#[tokio::test]
async fn two_node_workflow_completes() {
    let wf = workflow(json!({
        "id": "a", "name": "a",
        "variables": {"region": "eu"},
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "e", "type": "end"}
        ],
        "edges": [{"id": "e1", "source": "s", "target": "e"}]
    }));
    let exec = engine()
        .start(wf, Actor::new("t"), None, None, None)
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    let output = exec.output.unwrap();
    assert_eq!(output["region"], json!("eu"));
    assert!(output["nodeOutputs"]["s"]["started"].as_bool().unwrap());
}

#[tokio::test]
async fn simple_condition_routes_true_branch() {
    let wf = workflow(json!({
        "id": "b", "name": "b",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "check", "type": "condition", "data": {"conditionExpression": "price <= 90000"}},
            {"id": "cheap", "type": "script", "data": {"script": "'affordable'"}},
            {"id": "costly", "type": "script", "data": {"script": "'expensive'"}},
            {"id": "e", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "check"},
            {"id": "e2", "source": "check", "target": "cheap", "label": "true"},
            {"id": "e3", "source": "check", "target": "costly", "label": "false"},
            {"id": "e4", "source": "cheap", "target": "e"},
            {"id": "e5", "source": "costly", "target": "e"}
        ]
    }));
    let eng = engine();
    let exec = eng
        .start(wf, Actor::new("t"), Some(input(json!({"price": 85000}))), None, None)
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);

    let visited: Vec<String> = eng
        .steps(&exec.id)
        .unwrap()
        .into_iter()
        .map(|s| s.node_id)
        .collect();
    assert!(visited.contains(&"cheap".to_string()));
    assert!(!visited.contains(&"costly".to_string()));
}

#[tokio::test]
async fn loop_runs_exactly_max_iterations() {
    let wf = workflow(json!({
        "id": "c", "name": "c",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "ls", "type": "loop_start", "data": {"loopId": "L", "maxIterations": 3}},
            {"id": "le", "type": "loop_end", "data": {"loopId": "L"}},
            {"id": "e", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "ls"},
            {"id": "e2", "source": "ls", "target": "le"},
            {"id": "e3", "source": "le", "target": "e"}
        ]
    }));
    let eng = engine();
    let exec = eng
        .start(wf, Actor::new("t"), None, None, None)
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);

    let loop_starts = eng
        .steps(&exec.id)
        .unwrap()
        .into_iter()
        .filter(|s| s.node_id == "ls")
        .count();
    assert_eq!(loop_starts, 3);
    // LoopState is gone after exit.
    assert!(exec.context.loop_state("L").unwrap().is_none());
    assert_eq!(
        exec.context.node_output("le").unwrap()["iterations"],
        json!(3)
    );
}

#[tokio::test]
async fn user_input_suspends_and_resumes() {
    let wf = workflow(json!({
        "id": "d", "name": "d",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "ask", "type": "user_input", "data": {"prompt": "continue?"}},
            {"id": "e", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "ask"},
            {"id": "e2", "source": "ask", "target": "e"}
        ]
    }));
    let eng = engine();
    let exec = eng
        .start(wf, Actor::new("t"), None, None, None)
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::WaitingInput);
    assert_eq!(exec.current_node_id.as_deref(), Some("ask"));
    let waiting_step = eng
        .steps(&exec.id)
        .unwrap()
        .into_iter()
        .find(|s| s.node_id == "ask")
        .unwrap();
    assert_eq!(waiting_step.status, StepStatus::Waiting);

    let resumed = eng
        .continue_with_input(&exec.id, input(json!({"answer": "yes"})))
        .await
        .unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.context.get("answer"), Some(&json!("yes")));
}

#[tokio::test]
async fn tool_retries_then_succeeds() {
    let wf = workflow(json!({
        "id": "e", "name": "e",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "t", "type": "tool", "data": {
                "toolId": "flaky",
                "retryAttempts": 3,
                "retryDelay": 1
            }},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "t"},
            {"id": "e2", "source": "t", "target": "end"}
        ]
    }));
    let eng = engine_with(2, "ok");
    let exec = eng
        .start(wf, Actor::new("t"), None, None, None)
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);

    let step = eng
        .steps(&exec.id)
        .unwrap()
        .into_iter()
        .find(|s| s.node_id == "t")
        .unwrap();
    assert_eq!(step.status, StepStatus::Completed);
    assert_eq!(step.retry_count, 2);
    // The step records what the node was invoked with.
    assert_eq!(step.input.as_ref().unwrap()["toolId"], json!("flaky"));
    assert_eq!(
        exec.context.node_output("t").unwrap()["toolResult"]["ok"],
        json!(true)
    );
}

#[tokio::test]
async fn exhausted_retries_fail_the_execution() {
    let wf = workflow(json!({
        "id": "ex", "name": "ex",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "t", "type": "tool", "data": {
                "toolId": "fail",
                "retryAttempts": 2,
                "retryDelay": 1
            }},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "t"},
            {"id": "e2", "source": "t", "target": "end"}
        ]
    }));
    let eng = engine();
    let exec = eng
        .start(wf, Actor::new("t"), None, None, None)
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    let error = exec.error.unwrap();
    assert!(error.contains("2 attempts"), "unexpected error: {}", error);
    // Partial progress stays queryable.
    assert!(!eng.steps(&exec.id).unwrap().is_empty());
}

#[tokio::test]
async fn dead_end_edge_selection_fails_the_execution() {
    // Every outgoing edge is conditioned and none is true; the execution
    // must end up failed in the store, not stranded as running.
    let wf = workflow(json!({
        "id": "ne", "name": "ne",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "e", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "e", "condition": "false"}
        ]
    }));
    let eng = engine();
    let exec = eng
        .start(wf, Actor::new("t"), None, None, None)
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.error.as_deref().unwrap().contains("No valid edge"));
    assert!(exec.completed_at.is_some());

    let stored = eng.execution(&exec.id).unwrap();
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert!(stored.error.is_some());
}

fn parallel_workflow(strategy: &str, failure_strategy: &str) -> WorkflowDefinition {
    workflow(json!({
        "id": "p", "name": "p",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "ps", "type": "parallel_start", "data": {
                "parallelId": "P",
                "parallelStrategy": strategy,
                "failureStrategy": failure_strategy
            }},
            {"id": "b1", "type": "parallel_branch", "label": "failing", "data": {"parallelId": "P"}},
            {"id": "b1t", "type": "tool", "data": {"toolId": "fail"}},
            {"id": "b2", "type": "parallel_branch", "label": "slow", "data": {"parallelId": "P"}},
            {"id": "b2t", "type": "tool", "data": {"toolId": "slow"}},
            {"id": "pe", "type": "parallel_end", "data": {"parallelId": "P"}},
            {"id": "e", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "ps"},
            {"id": "e2", "source": "ps", "target": "pe"},
            {"id": "e3", "source": "b1", "target": "b1t"},
            {"id": "e4", "source": "b2", "target": "b2t"},
            {"id": "e5", "source": "pe", "target": "e"}
        ]
    }))
}

#[tokio::test]
async fn wait_first_completes_on_first_terminal_branch() {
    let eng = engine();
    let started = std::time::Instant::now();
    let exec = eng
        .start(
            parallel_workflow("wait_first", "continue_on_error"),
            Actor::new("t"),
            None,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    // The failing branch reports immediately; the slow branch takes 150ms.
    assert!(started.elapsed() < std::time::Duration::from_millis(120));

    let join = exec.context.node_output("pe").unwrap().clone();
    assert_eq!(join["joinReason"], json!("first_finished"));
    assert_eq!(join["failedBranches"], json!(["b1"]));
    // Parallel state is cleaned up on join.
    assert!(exec.context.parallel_state("P").unwrap().is_none());
}

#[tokio::test]
async fn parallel_wait_all_fail_fast_fails_the_execution() {
    let eng = engine();
    let exec = eng
        .start(
            parallel_workflow("wait_all", "fail_fast"),
            Actor::new("t"),
            None,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.error.unwrap().contains("parallel region"));
}

#[tokio::test]
async fn parallel_wait_all_continue_on_error_collects_survivors() {
    let eng = engine();
    let exec = eng
        .start(
            parallel_workflow("wait_all", "continue_on_error"),
            Actor::new("t"),
            None,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    let join = exec.context.node_output("pe").unwrap();
    assert_eq!(join["parallelResult"]["slow"]["toolResult"]["slow"], json!(true));
    assert_eq!(join["failedBranches"], json!(["b1"]));
    assert!(join["branchErrors"]["failing"]
        .as_str()
        .unwrap()
        .contains("broken"));
}

#[tokio::test]
async fn dispatch_event_resumes_matching_executions() {
    let wf = workflow(json!({
        "id": "ev", "name": "ev",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "w", "type": "wait_event", "data": {
                "eventType": "order_shipped",
                "eventCondition": "event.priority > 1"
            }},
            {"id": "e", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "w"},
            {"id": "e2", "source": "w", "target": "e"}
        ]
    }));
    let eng = engine();
    let exec = eng
        .start(wf, Actor::new("t"), None, None, None)
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::WaitingEvent);

    // Wrong type and unsatisfied condition both leave it waiting.
    assert!(eng
        .dispatch_event("other_event", json!({"priority": 5}))
        .await
        .unwrap()
        .is_empty());
    assert!(eng
        .dispatch_event("order_shipped", json!({"priority": 0}))
        .await
        .unwrap()
        .is_empty());

    let resumed = eng
        .dispatch_event("order_shipped", json!({"priority": 2}))
        .await
        .unwrap();
    assert_eq!(resumed, vec![exec.id.clone()]);
    let finished = eng.execution(&exec.id).unwrap();
    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert_eq!(
        finished.context.get("eventData"),
        Some(&json!({"priority": 2}))
    );
}

#[tokio::test]
async fn approval_merges_decision_and_resumes() {
    let wf = workflow(json!({
        "id": "ap", "name": "ap",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "a", "type": "approval", "data": {"message": "ok?"}},
            {"id": "e", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "a"},
            {"id": "e2", "source": "a", "target": "e"}
        ]
    }));
    let eng = engine();
    let exec = eng
        .start(wf, Actor::new("t"), None, None, None)
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::WaitingApproval);

    let resumed = eng
        .resolve_approval(&exec.id, false, Some("too costly".into()))
        .await
        .unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.context.get("approved"), Some(&json!(false)));
    assert_eq!(
        resumed.context.get("approvalComment"),
        Some(&json!("too costly"))
    );
}

#[tokio::test]
async fn resume_with_wrong_status_is_rejected() {
    let wf = workflow(json!({
        "id": "ws", "name": "ws",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "a", "type": "approval", "data": {}},
            {"id": "e", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "a"},
            {"id": "e2", "source": "a", "target": "e"}
        ]
    }));
    let eng = engine();
    let exec = eng
        .start(wf, Actor::new("t"), None, None, None)
        .await
        .unwrap();

    // waiting_approval, not waiting_input
    let err = eng
        .continue_with_input(&exec.id, input(json!({"x": 1})))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidStatus { .. }));
}

#[tokio::test]
async fn cancel_is_terminal() {
    let wf = workflow(json!({
        "id": "cn", "name": "cn",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "ask", "type": "user_input", "data": {}},
            {"id": "e", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "ask"},
            {"id": "e2", "source": "ask", "target": "e"}
        ]
    }));
    let eng = engine();
    let exec = eng
        .start(wf, Actor::new("t"), None, None, None)
        .await
        .unwrap();

    let cancelled = eng.cancel(&exec.id).unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    // Neither resume nor a second cancel is allowed now.
    assert!(eng
        .continue_with_input(&exec.id, input(json!({})))
        .await
        .is_err());
    assert!(matches!(
        eng.cancel(&exec.id),
        Err(EngineError::InvalidStatus { .. })
    ));
}

#[tokio::test]
async fn smart_router_routes_to_rule_target() {
    let wf = workflow(json!({
        "id": "sr", "name": "sr",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "route", "type": "condition", "data": {
                "conditionType": "smart_router",
                "routingRules": [
                    {"id": "vip", "targetNodeId": "vip", "condition": "tier == \"vip\"", "priority": 10},
                    {"id": "std", "targetNodeId": "std", "condition": "true", "priority": 1}
                ]
            }},
            {"id": "vip", "type": "script", "data": {"script": "'vip lane'"}},
            {"id": "std", "type": "script", "data": {"script": "'standard lane'"}},
            {"id": "e", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "route"},
            {"id": "e2", "source": "route", "target": "vip"},
            {"id": "e3", "source": "route", "target": "std"},
            {"id": "e4", "source": "vip", "target": "e"},
            {"id": "e5", "source": "std", "target": "e"}
        ]
    }));
    let eng = engine();
    let exec = eng
        .start(wf, Actor::new("t"), Some(input(json!({"tier": "vip"}))), None, None)
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(
        exec.context.node_output("route").unwrap()["selectedNodeId"],
        json!("vip")
    );
    assert_eq!(
        exec.context.node_output("vip").unwrap()["scriptResult"],
        json!("vip lane")
    );
}

#[tokio::test]
async fn validation_failure_never_creates_an_execution() {
    let wf = workflow(json!({
        "id": "bad", "name": "bad",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "t", "type": "tool", "data": {}},
            {"id": "e", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "t"},
            {"id": "e2", "source": "t", "target": "e"}
        ]
    }));
    let eng = engine();
    let err = eng
        .start(wf, Actor::new("t"), None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn llm_node_extracts_fields_from_json_output() {
    let wf = workflow(json!({
        "id": "llm", "name": "llm",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "l", "type": "llm", "data": {
                "prompt": "Summarize {{topic}}",
                "outputFormat": "json",
                "extractFields": ["sentiment", "score"]
            }},
            {"id": "e", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "l"},
            {"id": "e2", "source": "l", "target": "e"}
        ]
    }));
    let eng = engine_with(0, "```json\n{\"sentiment\": \"positive\", \"score\": 0.9}\n```");
    let exec = eng
        .start(wf, Actor::new("t"), Some(input(json!({"topic": "rust"}))), None, None)
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    let out = exec.context.node_output("l").unwrap();
    assert_eq!(out["llmOutput"]["sentiment"], json!("positive"));
    assert_eq!(out["extractedFields"]["score"], json!(0.9));
}

#[tokio::test]
async fn intent_recognition_routes_to_suggested_target() {
    let wf = workflow(json!({
        "id": "ir", "name": "ir",
        "nodes": [
            {"id": "s", "type": "start"},
            {"id": "intent", "type": "intent_recognition", "data": {
                "input": "{{userInput}}",
                "intentCategories": [
                    {"name": "refund", "targetNodeId": "refund", "keywords": ["refund"]},
                    {"name": "status", "targetNodeId": "status", "keywords": ["where"]}
                ]
            }},
            {"id": "refund", "type": "script", "data": {"script": "'refund flow'"}},
            {"id": "status", "type": "script", "data": {"script": "'status flow'"}},
            {"id": "e", "type": "end"}
        ],
        "edges": [
            {"id": "e1", "source": "s", "target": "intent"},
            {"id": "e2", "source": "intent", "target": "refund"},
            {"id": "e3", "source": "intent", "target": "status"},
            {"id": "e4", "source": "refund", "target": "e"},
            {"id": "e5", "source": "status", "target": "e"}
        ]
    }));
    let eng = engine_with(0, "{\"intent\": \"refund\", \"confidence\": 0.95}");
    let exec = eng
        .start(
            wf,
            Actor::new("t"),
            Some(input(json!({"userInput": "I want a refund"}))),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    let out = exec.context.node_output("intent").unwrap();
    assert_eq!(out["intent"], json!("refund"));
    assert_eq!(out["suggestedNodeId"], json!("refund"));
    assert!(exec.context.node_output("refund").is_some());
    assert!(exec.context.node_output("status").is_none());
}
