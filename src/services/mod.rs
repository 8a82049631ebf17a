//! Outbound collaborator interfaces. The engine never talks to tools, agents,
//! MCP servers or LLM providers directly; it goes through these traits so the
//! host wires in real clients and tests wire in mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NodeError;

/// The caller on whose behalf an execution runs. Passed through to every
/// outbound call so the host can enforce its own scoping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>) -> Self {
        Actor {
            user_id: user_id.into(),
            tenant_id: None,
        }
    }
}

/// Executes a registered tool by id.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_id: &str, args: &Value, actor: &Actor)
        -> Result<Value, NodeError>;
}

/// One-shot conversation turn with a configured agent.
#[async_trait]
pub trait AgentChat: Send + Sync {
    async fn chat(
        &self,
        agent_id: &str,
        conversation_id: &str,
        message: &str,
        actor: &Actor,
    ) -> Result<Value, NodeError>;
}

/// Tool invocation on an MCP server, addressed by id or by display name.
/// Implementations fail the call when the server is not connected.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn execute_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        args: &Value,
        actor: &Actor,
    ) -> Result<Value, NodeError>;

    async fn execute_tool_by_name(
        &self,
        server_name: &str,
        tool_name: &str,
        args: &Value,
        actor: &Actor,
    ) -> Result<Value, NodeError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Provider-agnostic chat completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Chat completion against whatever provider the host configured.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, NodeError>;
}
