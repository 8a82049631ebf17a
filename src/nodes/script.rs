//! `script` and `delay` nodes.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{required_str, Node, NodeContext, NodeError, NodeExecutor, NodeOutcome};
use crate::expr;

/// Evaluates the node's `script` expression against the context.
pub struct ScriptExecutor;

#[async_trait]
impl NodeExecutor for ScriptExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let source = required_str(node, "script")?;
        let result = expr::evaluate(source, &ctx.context.as_value())?;
        Ok(NodeOutcome::next(json!({ "scriptResult": result })))
    }
}

pub struct DelayExecutor;

#[async_trait]
impl NodeExecutor for DelayExecutor {
    async fn execute(
        &self,
        node: &Node,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let delay_ms = node
            .data
            .get("delayMs")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| {
                NodeError::ConfigError(format!("node {} is missing \"delayMs\"", node.id))
            })?;
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(NodeOutcome::next(json!({
            "delayed": true,
            "delayMs": delay_ms,
        })))
    }
}
