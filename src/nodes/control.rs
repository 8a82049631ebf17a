//! `start` and `end` nodes.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{Node, NodeContext, NodeError, NodeExecutor, NodeOutcome};

pub struct StartExecutor;

#[async_trait]
impl NodeExecutor for StartExecutor {
    async fn execute(
        &self,
        _node: &Node,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        Ok(NodeOutcome::next(json!({
            "started": true,
            "timestamp": Utc::now().to_rfc3339(),
        })))
    }
}

pub struct EndExecutor;

#[async_trait]
impl NodeExecutor for EndExecutor {
    async fn execute(
        &self,
        _node: &Node,
        _ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        Ok(NodeOutcome::complete(json!({
            "completed": true,
            "timestamp": Utc::now().to_rfc3339(),
        })))
    }
}
