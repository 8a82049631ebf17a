//! Loop controller: `loop_start`, `loop_end`, `loop_condition`.
//!
//! Loop state lives in the execution context under `loops[loopId]` and is
//! deleted on exit, so a later re-entry starts a fresh loop.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, required_str, Node, NodeContext, NodeError, NodeExecutor, NodeOutcome};
use crate::expr;
use crate::model::LoopState;

const DEFAULT_MAX_ITERATIONS: u32 = 10;

pub struct LoopStartExecutor;

#[async_trait]
impl NodeExecutor for LoopStartExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let loop_id = required_str(node, "loopId")?;

        let state = match ctx.context.loop_state(loop_id)? {
            Some(mut state) => {
                state.current_iteration += 1;
                state
            }
            None => LoopState {
                loop_id: loop_id.to_string(),
                current_iteration: 1,
                max_iterations: node
                    .data
                    .get("maxIterations")
                    .and_then(Value::as_u64)
                    .map(|n| n as u32)
                    .unwrap_or(DEFAULT_MAX_ITERATIONS),
                start_node_id: node.id.clone(),
                exit_condition: optional_str(node, "exitCondition").map(str::to_string),
                exit_event_type: optional_str(node, "exitEventType").map(str::to_string),
                exit_event_condition: optional_str(node, "exitEventCondition").map(str::to_string),
                exit_keyword: optional_str(node, "exitKeyword").map(str::to_string),
            },
        };
        ctx.context.put_loop_state(&state)?;

        Ok(NodeOutcome::next(json!({
            "loopId": state.loop_id,
            "iteration": state.current_iteration,
            "maxIterations": state.max_iterations,
        })))
    }
}

/// Why a loop exited; `None` means keep going.
fn exit_reason(state: &LoopState, scope: &Value) -> Result<Option<&'static str>, NodeError> {
    if state.current_iteration >= state.max_iterations {
        return Ok(Some("max_iterations"));
    }
    if let Some(condition) = &state.exit_condition {
        if expr::evaluate_bool(condition, scope)? {
            return Ok(Some("condition"));
        }
    }
    if let Some(keyword) = &state.exit_keyword {
        let last_input = scope
            .get("userInput")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if last_input.to_lowercase().contains(&keyword.to_lowercase()) {
            return Ok(Some("keyword"));
        }
    }
    if let Some(event_type) = &state.exit_event_type {
        let last_event = scope.get("lastEvent");
        let type_matches = last_event
            .and_then(|e| e.get("type"))
            .and_then(Value::as_str)
            == Some(event_type.as_str());
        if type_matches {
            let condition_ok = match &state.exit_event_condition {
                Some(condition) => {
                    let data = last_event
                        .and_then(|e| e.get("data"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    expr::evaluate_bool(condition, &json!({ "event": data }))?
                }
                None => true,
            };
            if condition_ok {
                return Ok(Some("event"));
            }
        }
    }
    Ok(None)
}

pub struct LoopEndExecutor;

#[async_trait]
impl NodeExecutor for LoopEndExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let loop_id = required_str(node, "loopId")?;
        let state = ctx.context.loop_state(loop_id)?.ok_or_else(|| {
            NodeError::ConfigError(format!(
                "node {}: loop {:?} was never started",
                node.id, loop_id
            ))
        })?;

        match exit_reason(&state, &ctx.context.as_value())? {
            Some(reason) => {
                ctx.context.remove_loop_state(loop_id);
                Ok(NodeOutcome::next(json!({
                    "loopExited": true,
                    "reason": reason,
                    "iterations": state.current_iteration,
                })))
            }
            None => Ok(NodeOutcome::jump(
                json!({
                    "loopContinue": true,
                    "iteration": state.current_iteration,
                }),
                state.start_node_id.clone(),
            )),
        }
    }
}

/// Pure read of the loop state; routes nothing, mutates nothing.
pub struct LoopConditionExecutor;

#[async_trait]
impl NodeExecutor for LoopConditionExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let loop_id = required_str(node, "loopId")?;
        let output = match ctx.context.loop_state(loop_id)? {
            Some(state) => json!({
                "loopId": state.loop_id,
                "iteration": state.current_iteration,
                "maxIterations": state.max_iterations,
                "remaining": state.max_iterations.saturating_sub(state.current_iteration),
                "active": true,
            }),
            None => json!({ "loopId": loop_id, "active": false }),
        };
        Ok(NodeOutcome::next(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(iteration: u32, max: u32) -> LoopState {
        LoopState {
            loop_id: "L".into(),
            current_iteration: iteration,
            max_iterations: max,
            start_node_id: "ls".into(),
            exit_condition: None,
            exit_event_type: None,
            exit_event_condition: None,
            exit_keyword: None,
        }
    }

    #[test]
    fn test_exit_on_max_iterations() {
        assert_eq!(
            exit_reason(&state(3, 3), &json!({})).unwrap(),
            Some("max_iterations")
        );
        assert_eq!(exit_reason(&state(2, 3), &json!({})).unwrap(), None);
    }

    #[test]
    fn test_exit_condition_checked_before_keyword() {
        let mut s = state(1, 10);
        s.exit_condition = Some("done == true".into());
        s.exit_keyword = Some("stop".into());
        assert_eq!(
            exit_reason(&s, &json!({"done": true, "userInput": "stop"})).unwrap(),
            Some("condition")
        );
        assert_eq!(
            exit_reason(&s, &json!({"done": false, "userInput": "please STOP"})).unwrap(),
            Some("keyword")
        );
        assert_eq!(
            exit_reason(&s, &json!({"done": false, "userInput": "go on"})).unwrap(),
            None
        );
    }

    #[test]
    fn test_exit_on_matching_event() {
        let mut s = state(1, 10);
        s.exit_event_type = Some("order_shipped".into());
        s.exit_event_condition = Some("event.priority > 1".into());
        let scope = json!({"lastEvent": {"type": "order_shipped", "data": {"priority": 2}}});
        assert_eq!(exit_reason(&s, &scope).unwrap(), Some("event"));
        let low = json!({"lastEvent": {"type": "order_shipped", "data": {"priority": 0}}});
        assert_eq!(exit_reason(&s, &low).unwrap(), None);
        let other = json!({"lastEvent": {"type": "other", "data": {"priority": 9}}});
        assert_eq!(exit_reason(&s, &other).unwrap(), None);
    }
}
