//! Outbound call nodes: `tool`, `agent`, `mcp_tool`. All three resolve their
//! configuration through the template layer and go through the retry adapter.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{optional_str, required_str, Node, NodeContext, NodeError, NodeExecutor, NodeOutcome};
use crate::retry::{call_with_retry, CallPolicy};
use crate::template;

/// Keys consumed by the engine itself, never forwarded as call arguments.
const CONTROL_KEYS: [&str; 9] = [
    "toolId",
    "agentId",
    "serverId",
    "serverName",
    "toolName",
    "timeout",
    "retryAttempts",
    "retryDelay",
    "label",
];

/// Resolve the node's argument object: `_inputMapping` when present,
/// otherwise the data bag minus engine control keys.
fn resolved_args(node: &Node, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
    let resolved = template::resolve_node_input(&node.data, ctx.context)?;
    if node.data.get(template::INPUT_MAPPING_KEY).is_some() {
        return Ok(resolved);
    }
    let Value::Object(obj) = resolved else {
        return Ok(Value::Object(Map::new()));
    };
    let filtered: Map<String, Value> = obj
        .into_iter()
        .filter(|(k, _)| !CONTROL_KEYS.contains(&k.as_str()))
        .collect();
    Ok(Value::Object(filtered))
}

pub struct ToolNodeExecutor;

#[async_trait]
impl NodeExecutor for ToolNodeExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let tool_id = required_str(node, "toolId")?.to_string();
        let args = resolved_args(node, ctx)?;
        let policy = CallPolicy::from_node_data(&node.data);

        let services = ctx.services.clone();
        let actor = ctx.actor.clone();
        let (result, retries) = call_with_retry(&policy, || {
            let services = services.clone();
            let tool_id = tool_id.clone();
            let args = args.clone();
            let actor = actor.clone();
            async move { services.tools.execute(&tool_id, &args, &actor).await }
        })
        .await?;

        Ok(NodeOutcome::next(json!({ "toolResult": result })).with_retries(retries))
    }
}

pub struct AgentNodeExecutor;

#[async_trait]
impl NodeExecutor for AgentNodeExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let agent_id = required_str(node, "agentId")?.to_string();
        let message = match optional_str(node, "message") {
            Some(tpl) => match template::resolve_string(tpl, ctx.context)? {
                Value::String(s) => s,
                other => other.to_string(),
            },
            None => ctx
                .context
                .get("userInput")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };
        if message.is_empty() {
            return Err(NodeError::MissingInput(format!(
                "node {} has no message and no userInput in context",
                node.id
            )));
        }
        let conversation_id = optional_str(node, "conversationId")
            .map(str::to_string)
            .unwrap_or_else(|| ctx.execution_id.to_string());

        let services = ctx.services.clone();
        let actor = ctx.actor.clone();
        let policy = CallPolicy::from_node_data(&node.data);
        let (response, retries) = call_with_retry(&policy, || {
            let services = services.clone();
            let agent_id = agent_id.clone();
            let conversation_id = conversation_id.clone();
            let message = message.clone();
            let actor = actor.clone();
            async move {
                services
                    .agents
                    .chat(&agent_id, &conversation_id, &message, &actor)
                    .await
            }
        })
        .await?;

        Ok(NodeOutcome::next(json!({ "agentResponse": response })).with_retries(retries))
    }
}

pub struct McpToolNodeExecutor;

#[async_trait]
impl NodeExecutor for McpToolNodeExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let tool_name = required_str(node, "toolName")?.to_string();
        // serverId takes precedence; serverName falls back to name lookup.
        let server_id = optional_str(node, "serverId").map(str::to_string);
        let server_name = optional_str(node, "serverName").map(str::to_string);
        let target = server_id.or_else(|| server_name.clone()).ok_or_else(|| {
            NodeError::ConfigError(format!("node {} needs serverId or serverName", node.id))
        })?;
        let by_name = optional_str(node, "serverId").is_none();

        let args = match node.data.get("arguments") {
            Some(raw) => template::resolve_value(raw, ctx.context)?,
            None => resolved_args(node, ctx)?,
        };
        let policy = CallPolicy::from_node_data(&node.data);

        let services = ctx.services.clone();
        let actor = ctx.actor.clone();
        let (result, retries) = {
            let target = target.clone();
            let tool_name = tool_name.clone();
            call_with_retry(&policy, move || {
                let services = services.clone();
                let target = target.clone();
                let tool_name = tool_name.clone();
                let args = args.clone();
                let actor = actor.clone();
                async move {
                    if by_name {
                        services
                            .mcp
                            .execute_tool_by_name(&target, &tool_name, &args, &actor)
                            .await
                    } else {
                        services.mcp.execute_tool(&target, &tool_name, &args, &actor).await
                    }
                }
            })
            .await?
        };

        let mut output = json!({
            "mcpResult": result,
            "toolName": tool_name,
        });
        if let Some(name) = server_name {
            output["serverName"] = Value::String(name);
        }
        Ok(NodeOutcome::next(output).with_retries(retries))
    }
}
