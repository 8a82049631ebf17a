//! Suspending nodes: `user_input`, `wait_event`, `approval`.
//!
//! Each returns a `Suspend` outcome; the driver persists the execution in the
//! matching waiting status and the corresponding resume call continues past
//! the node.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, Node, NodeContext, NodeError, NodeExecutor, NodeOutcome, WaitKind};
use crate::template;

pub struct UserInputExecutor;

#[async_trait]
impl NodeExecutor for UserInputExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let mut output = json!({ "waitingFor": "user_input" });
        if let Some(prompt) = optional_str(node, "prompt") {
            output["prompt"] = template::resolve_string(prompt, ctx.context)?;
        }
        if let Some(schema) = node.data.get("inputSchema") {
            output["inputSchema"] = schema.clone();
        }
        Ok(NodeOutcome::suspend(output, WaitKind::Input))
    }
}

pub struct WaitEventExecutor;

#[async_trait]
impl NodeExecutor for WaitEventExecutor {
    async fn execute(
        &self,
        node: &Node,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let event_type = super::required_str(node, "eventType")?;
        let mut output = json!({
            "waitingFor": "event",
            "eventType": event_type,
        });
        if let Some(condition) = optional_str(node, "eventCondition") {
            output["eventCondition"] = Value::String(condition.to_string());
        }
        Ok(NodeOutcome::suspend(output, WaitKind::Event))
    }
}

pub struct ApprovalExecutor;

#[async_trait]
impl NodeExecutor for ApprovalExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let mut output = json!({ "waitingFor": "approval" });
        if let Some(message) = optional_str(node, "message") {
            output["message"] = template::resolve_string(message, ctx.context)?;
        }
        if let Some(approvers) = node.data.get("approvers") {
            output["approvers"] = approvers.clone();
        }
        Ok(NodeOutcome::suspend(output, WaitKind::Approval))
    }
}
