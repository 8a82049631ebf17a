//! `condition` node: simple boolean branch, smart-router rules, or value
//! matching. Owns the fallback chain; the rule evaluation itself lives in
//! [`crate::routing`].

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, Node, NodeContext, NodeError, NodeExecutor, NodeOutcome};
use crate::expr;
use crate::model::{ConditionType, RoutingRule, RoutingStrategy, ValueMatchingConfig};
use crate::routing;
use crate::template;
use tracing::warn;

fn fallback_target(node: &Node) -> Option<String> {
    optional_str(node, "defaultTargetNodeId")
        .or_else(|| optional_str(node, "fallbackNodeId"))
        .map(str::to_string)
}

fn fallback_enabled(node: &Node) -> bool {
    node.data
        .get("enableFallback")
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let condition_type: ConditionType = node
            .data
            .get("conditionType")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        match condition_type {
            ConditionType::Simple => self.simple(node, ctx),
            ConditionType::SmartRouter => self.smart_router(node, ctx),
            ConditionType::ValueMatcher => self.value_matcher(node, ctx),
        }
    }
}

impl ConditionExecutor {
    fn simple(&self, node: &Node, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let source = optional_str(node, "conditionExpression")
            .or_else(|| optional_str(node, "condition"))
            .ok_or_else(|| {
                NodeError::ConfigError(format!(
                    "node {} is missing \"conditionExpression\"",
                    node.id
                ))
            })?;
        let result = expr::evaluate_bool(source, &ctx.context.as_value())?;
        Ok(NodeOutcome::next(json!({ "conditionResult": result })))
    }

    fn smart_router(&self, node: &Node, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let rules: Vec<RoutingRule> = node
            .data
            .get("routingRules")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        if rules.is_empty() {
            return Err(NodeError::ConfigError(format!(
                "node {} needs \"routingRules\"",
                node.id
            )));
        }
        let strategy: RoutingStrategy = node
            .data
            .get("routingStrategy")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        let scope = ctx.context.as_value();
        match routing::evaluate_smart_rules(&rules, strategy, &scope) {
            Ok(Some(m)) => Ok(NodeOutcome::next(json!({
                "selectedNodeId": m.target_node_id,
                "matchedRule": m.rule_id,
                "score": m.score,
            }))),
            Ok(None) => self.no_match(node),
            Err(e) => self.routing_failed(node, e),
        }
    }

    fn value_matcher(&self, node: &Node, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let cfg: ValueMatchingConfig = node
            .data
            .get("valueMatchingConfig")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| {
                NodeError::ConfigError(format!(
                    "node {} needs \"valueMatchingConfig\"",
                    node.id
                ))
            })?;

        // The source field may be a context path or a template.
        let source = if cfg.source_field.contains("{{") {
            template::resolve_string(&cfg.source_field, ctx.context)?
        } else {
            ctx.context.get_path(&cfg.source_field).unwrap_or(Value::Null)
        };

        match routing::evaluate_value_matching(&cfg, &source) {
            Ok(Some(m)) => Ok(NodeOutcome::next(json!({
                "selectedNodeId": m.target_node_id,
                "matchedRule": m.rule_id,
                "score": m.score,
                "sourceValue": source,
            }))),
            Ok(None) => {
                if let Some(default) = &cfg.default_node_id {
                    return Ok(NodeOutcome::next(json!({
                        "selectedNodeId": default,
                        "fallback": true,
                        "sourceValue": source,
                    })));
                }
                self.no_match(node)
            }
            Err(e) => self.routing_failed(node, e),
        }
    }

    fn no_match(&self, node: &Node) -> Result<NodeOutcome, NodeError> {
        if fallback_enabled(node) {
            if let Some(target) = fallback_target(node) {
                return Ok(NodeOutcome::next(json!({
                    "selectedNodeId": target,
                    "fallback": true,
                })));
            }
        }
        Err(NodeError::RoutingError(format!(
            "node {}: no rule matched and no fallback target",
            node.id
        )))
    }

    fn routing_failed(&self, node: &Node, error: NodeError) -> Result<NodeOutcome, NodeError> {
        if fallback_enabled(node) {
            if let Some(target) = fallback_target(node) {
                warn!(node_id = %node.id, error = %error, "routing failed, taking fallback");
                return Ok(NodeOutcome::next(json!({
                    "selectedNodeId": target,
                    "fallback": true,
                    "routingError": error.to_string(),
                })));
            }
        }
        Err(error)
    }
}
