//! Demo binary: runs a small order-review workflow end to end, including an
//! approval suspension, and prints the lifecycle events.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

use graphflow::engine::{EngineConfig, InMemoryExecutionStore, WorkflowEngine};
use graphflow::error::NodeError;
use graphflow::model::WorkflowDefinition;
use graphflow::nodes::NodeServices;
use graphflow::services::{
    Actor, AgentChat, ChatRequest, ChatResponse, LlmClient, McpClient, ToolExecutor,
};

struct DemoTools;

#[async_trait]
impl ToolExecutor for DemoTools {
    async fn execute(&self, tool_id: &str, args: &Value, _actor: &Actor) -> Result<Value, NodeError> {
        Ok(json!({ "tool": tool_id, "echo": args }))
    }
}

struct DemoAgents;

#[async_trait]
impl AgentChat for DemoAgents {
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

struct DemoMcp;

#[async_trait]
impl McpClient for DemoMcp {
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

struct DemoLlm;

#[async_trait]
impl LlmClient for DemoLlm {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, NodeError> {
        Ok(ChatResponse {
            content: "ok".to_string(),
            usage: None,
        })
    }
}

fn demo_workflow() -> WorkflowDefinition {
    serde_json::from_value(json!({
        "id": "order-review",
        "name": "Order review",
        "nodes": [
            {"id": "start", "type": "start", "label": "Start"},
            {"id": "fetch", "type": "tool", "label": "Fetch order", "data": {
                "toolId": "orders.fetch",
                "orderId": "{{orderId}}"
            }},
            {"id": "check", "type": "condition", "label": "Needs review?", "data": {
                "conditionExpression": "total > 1000"
            }},
            {"id": "review", "type": "approval", "label": "Manager approval", "data": {
                "message": "Approve order {{orderId}}?"
            }},
            {"id": "done", "type": "end", "label": "Done"}
        ],
        "edges": [
            {"id": "e1", "source": "start", "target": "fetch"},
            {"id": "e2", "source": "fetch", "target": "check"},
            {"id": "e3", "source": "check", "target": "review", "label": "true"},
            {"id": "e4", "source": "check", "target": "done", "label": "false"},
            {"id": "e5", "source": "review", "target": "done"}
        ]
    }))
    .expect("demo workflow is well formed")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let services = NodeServices {
        tools: Arc::new(DemoTools),
        agents: Arc::new(DemoAgents),
        mcp: Arc::new(DemoMcp),
        llm: Arc::new(DemoLlm),
    };
    let mut engine = WorkflowEngine::new(
        services,
        Arc::new(InMemoryExecutionStore::new()),
        EngineConfig::default(),
    );
    let mut events = engine.subscribe(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("event: {}", serde_json::to_string(&event).unwrap());
        }
    });

    let mut input = Map::new();
    input.insert("orderId".to_string(), json!("ord-42"));
    input.insert("total".to_string(), json!(1500));

    let execution = engine
        .start(demo_workflow(), Actor::new("demo"), Some(input), None, None)
        .await
        .expect("start failed");
    println!("after start: {}", execution.status.as_str());

    let execution = engine
        .resolve_approval(&execution.id, true, Some("looks good".to_string()))
        .await
        .expect("approval failed");
    println!("final: {}", execution.status.as_str());
    for step in engine.steps(&execution.id).expect("steps") {
        println!("step {} ({}) -> {:?}", step.node_id, step.node_type, step.status);
    }

    drop(engine);
    let _ = printer.await;
}
