//! Structural validation of a workflow definition. Runs once before the
//! first node executes; a malformed graph never reaches traversal.

use std::collections::{HashSet, VecDeque};

use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::model::{Node, WorkflowDefinition};
use crate::nodes::NodeExecutorRegistry;

/// Node types allowed to fan out to more than one edge.
const ROUTER_TYPES: [&str; 3] = ["condition", "intent_recognition", "parallel_start"];

fn fail(message: impl Into<String>) -> EngineError {
    EngineError::Validation(message.into())
}

fn has_str(node: &Node, key: &str) -> bool {
    node.data
        .get(key)
        .and_then(Value::as_str)
        .map(|s| !s.is_empty())
        .unwrap_or(false)
}

/// Per-type required configuration.
fn check_node_config(node: &Node) -> EngineResult<()> {
    let missing = |key: &str| {
        Err(fail(format!(
            "node {} ({}) is missing {:?}",
            node.id, node.node_type, key
        )))
    };
    match node.node_type.as_str() {
        "tool" => {
            if !has_str(node, "toolId") {
                return missing("toolId");
            }
        }
        "agent" => {
            if !has_str(node, "agentId") {
                return missing("agentId");
            }
        }
        "mcp_tool" => {
            if !has_str(node, "toolName") {
                return missing("toolName");
            }
            if !has_str(node, "serverId") && !has_str(node, "serverName") {
                return Err(fail(format!(
                    "node {} (mcp_tool) needs serverId or serverName",
                    node.id
                )));
            }
        }
        "condition" => {
            let typed = node
                .data
                .get("conditionType")
                .and_then(Value::as_str)
                .unwrap_or("simple");
            match typed {
                "simple" => {
                    if !has_str(node, "conditionExpression") && !has_str(node, "condition") {
                        return missing("conditionExpression");
                    }
                }
                "smart_router" => {
                    let empty = node
                        .data
                        .get("routingRules")
                        .and_then(Value::as_array)
                        .map(Vec::is_empty)
                        .unwrap_or(true);
                    if empty {
                        return missing("routingRules");
                    }
                }
                "value_matcher" => {
                    if node.data.get("valueMatchingConfig").is_none() {
                        return missing("valueMatchingConfig");
                    }
                }
                other => {
                    return Err(fail(format!(
                        "node {} has unknown conditionType {:?}",
                        node.id, other
                    )))
                }
            }
        }
        "script" => {
            if !has_str(node, "script") {
                return missing("script");
            }
        }
        "delay" => {
            if node.data.get("delayMs").and_then(Value::as_u64).is_none() {
                return missing("delayMs");
            }
        }
        "wait_event" => {
            if !has_str(node, "eventType") {
                return missing("eventType");
            }
        }
        "llm" => {
            if !has_str(node, "prompt") {
                return missing("prompt");
            }
        }
        "intent_recognition" => {
            let empty = node
                .data
                .get("intentCategories")
                .and_then(Value::as_array)
                .map(Vec::is_empty)
                .unwrap_or(true);
            if empty {
                return missing("intentCategories");
            }
        }
        "loop_start" | "loop_end" | "loop_condition" => {
            if !has_str(node, "loopId") {
                return missing("loopId");
            }
        }
        "parallel_start" | "parallel_end" | "parallel_branch" => {
            if !has_str(node, "parallelId") {
                return missing("parallelId");
            }
        }
        _ => {}
    }
    Ok(())
}

/// Validate a workflow against the structural rules and the registered node
/// types.
pub fn validate(workflow: &WorkflowDefinition, registry: &NodeExecutorRegistry) -> EngineResult<()> {
    if workflow.nodes.is_empty() {
        return Err(fail("workflow has no nodes"));
    }

    let mut ids = HashSet::new();
    for node in &workflow.nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(fail(format!("duplicate node id {:?}", node.id)));
        }
        if registry.get(&node.node_type).is_none() {
            let mut known: Vec<&str> = registry.node_types().collect();
            known.sort_unstable();
            return Err(fail(format!(
                "node {} has unknown type {:?} (known types: {})",
                node.id,
                node.node_type,
                known.join(", ")
            )));
        }
        check_node_config(node)?;
    }

    let start_count = workflow
        .nodes
        .iter()
        .filter(|n| n.node_type == "start")
        .count();
    if start_count != 1 {
        return Err(fail(format!(
            "workflow needs exactly one start node, found {}",
            start_count
        )));
    }
    if !workflow.nodes.iter().any(|n| n.node_type == "end") {
        return Err(fail("workflow needs at least one end node"));
    }

    for edge in &workflow.edges {
        if !ids.contains(edge.source.as_str()) {
            return Err(fail(format!(
                "edge {} references missing source {:?}",
                edge.id, edge.source
            )));
        }
        if !ids.contains(edge.target.as_str()) {
            return Err(fail(format!(
                "edge {} references missing target {:?}",
                edge.id, edge.target
            )));
        }
    }

    // Fan-out is only for router-capable nodes.
    for node in &workflow.nodes {
        let out = workflow.outgoing_edges(&node.id).len();
        if out > 1 && !ROUTER_TYPES.contains(&node.node_type.as_str()) {
            return Err(fail(format!(
                "node {} ({}) has {} outgoing edges but cannot route",
                node.id, node.node_type, out
            )));
        }
    }

    check_reachability(workflow)?;
    Ok(())
}

/// Every node must be reachable from start. Parallel branch nodes are
/// reached through their `parallelId` tag rather than edges, and their
/// chains are walked from there. Router rule targets count as edges.
fn check_reachability(workflow: &WorkflowDefinition) -> EngineResult<()> {
    let start = workflow
        .start_node()
        .map(|n| n.id.clone())
        .ok_or_else(|| fail("workflow has no start node"))?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    seen.insert(start.clone());
    queue.push_back(start);

    while let Some(id) = queue.pop_front() {
        let push = |target: &str, seen: &mut HashSet<String>, queue: &mut VecDeque<String>| {
            if workflow.node(target).is_some() && seen.insert(target.to_string()) {
                queue.push_back(target.to_string());
            }
        };

        for edge in workflow.outgoing_edges(&id) {
            push(&edge.target, &mut seen, &mut queue);
        }

        if let Some(node) = workflow.node(&id) {
            // Branch entry points hang off the matching parallel_start.
            if node.node_type == "parallel_start" {
                if let Some(parallel_id) = node.data.get("parallelId").and_then(Value::as_str) {
                    for branch in workflow.parallel_branches(parallel_id) {
                        push(&branch.id, &mut seen, &mut queue);
                    }
                }
            }
            // Routers can jump to rule targets that have no edge.
            if let Some(rules) = node.data.get("routingRules").and_then(Value::as_array) {
                for rule in rules {
                    if let Some(target) = rule.get("targetNodeId").and_then(Value::as_str) {
                        push(target, &mut seen, &mut queue);
                    }
                }
            }
            if let Some(rules) = node
                .data
                .get("valueMatchingConfig")
                .and_then(|c| c.get("matchingRules"))
                .and_then(Value::as_array)
            {
                for rule in rules {
                    if let Some(target) = rule.get("targetNodeId").and_then(Value::as_str) {
                        push(target, &mut seen, &mut queue);
                    }
                }
            }
            for key in ["defaultTargetNodeId", "fallbackNodeId"] {
                if let Some(target) = node.data.get(key).and_then(Value::as_str) {
                    push(target, &mut seen, &mut queue);
                }
            }
            if let Some(target) = node
                .data
                .get("valueMatchingConfig")
                .and_then(|c| c.get("defaultNodeId"))
                .and_then(Value::as_str)
            {
                push(target, &mut seen, &mut queue);
            }
            if let Some(categories) = node.data.get("intentCategories").and_then(Value::as_array) {
                for category in categories {
                    if let Some(target) = category.get("targetNodeId").and_then(Value::as_str) {
                        push(target, &mut seen, &mut queue);
                    }
                }
            }
        }
    }

    for node in &workflow.nodes {
        if !seen.contains(node.id.as_str()) {
            return Err(fail(format!(
                "node {} is unreachable from start",
                node.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::ParallelRuntime;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> NodeExecutorRegistry {
        NodeExecutorRegistry::new(Arc::new(ParallelRuntime::new()))
    }

    fn wf(nodes: Value, edges: Value) -> WorkflowDefinition {
        serde_json::from_value(json!({
            "id": "wf",
            "name": "wf",
            "nodes": nodes,
            "edges": edges
        }))
        .unwrap()
    }

    #[test]
    fn test_minimal_workflow_passes() {
        let w = wf(
            json!([
                {"id": "s", "type": "start"},
                {"id": "e", "type": "end"}
            ]),
            json!([{"id": "e1", "source": "s", "target": "e"}]),
        );
        assert!(validate(&w, &registry()).is_ok());
    }

    #[test]
    fn test_missing_start_or_end() {
        let no_start = wf(json!([{"id": "e", "type": "end"}]), json!([]));
        assert!(validate(&no_start, &registry()).is_err());

        let two_starts = wf(
            json!([
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "start"},
                {"id": "e", "type": "end"}
            ]),
            json!([
                {"id": "e1", "source": "s1", "target": "e"},
                {"id": "e2", "source": "s2", "target": "e"}
            ]),
        );
        let err = validate(&two_starts, &registry()).unwrap_err();
        assert!(err.to_string().contains("exactly one start"));
    }

    #[test]
    fn test_unknown_node_type_lists_known_types() {
        let w = wf(
            json!([
                {"id": "s", "type": "start"},
                {"id": "x", "type": "teleport"},
                {"id": "e", "type": "end"}
            ]),
            json!([
                {"id": "e1", "source": "s", "target": "x"},
                {"id": "e2", "source": "x", "target": "e"}
            ]),
        );
        let msg = validate(&w, &registry()).unwrap_err().to_string();
        assert!(msg.contains("teleport"));
        assert!(msg.contains("known types"));
        assert!(msg.contains("tool"));
    }

    #[test]
    fn test_dangling_edge() {
        let w = wf(
            json!([
                {"id": "s", "type": "start"},
                {"id": "e", "type": "end"}
            ]),
            json!([{"id": "e1", "source": "s", "target": "ghost"}]),
        );
        let err = validate(&w, &registry()).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_fan_out_requires_router() {
        let w = wf(
            json!([
                {"id": "s", "type": "start"},
                {"id": "a", "type": "end"},
                {"id": "b", "type": "end"}
            ]),
            json!([
                {"id": "e1", "source": "s", "target": "a"},
                {"id": "e2", "source": "s", "target": "b"}
            ]),
        );
        let err = validate(&w, &registry()).unwrap_err();
        assert!(err.to_string().contains("cannot route"));
    }

    #[test]
    fn test_missing_required_config() {
        let w = wf(
            json!([
                {"id": "s", "type": "start"},
                {"id": "t", "type": "tool"},
                {"id": "e", "type": "end"}
            ]),
            json!([
                {"id": "e1", "source": "s", "target": "t"},
                {"id": "e2", "source": "t", "target": "e"}
            ]),
        );
        let err = validate(&w, &registry()).unwrap_err();
        assert!(err.to_string().contains("toolId"));
    }

    #[test]
    fn test_unreachable_node() {
        let w = wf(
            json!([
                {"id": "s", "type": "start"},
                {"id": "e", "type": "end"},
                {"id": "island", "type": "script", "data": {"script": "1"}}
            ]),
            json!([{"id": "e1", "source": "s", "target": "e"}]),
        );
        let err = validate(&w, &registry()).unwrap_err();
        assert!(err.to_string().contains("island"));
    }

    #[test]
    fn test_parallel_branches_reachable_via_tag() {
        let w = wf(
            json!([
                {"id": "s", "type": "start"},
                {"id": "ps", "type": "parallel_start", "data": {"parallelId": "p1"}},
                {"id": "b1", "type": "parallel_branch", "data": {"parallelId": "p1"}},
                {"id": "sc", "type": "script", "data": {"script": "1 + 1"}},
                {"id": "pe", "type": "parallel_end", "data": {"parallelId": "p1"}},
                {"id": "e", "type": "end"}
            ]),
            json!([
                {"id": "e1", "source": "s", "target": "ps"},
                {"id": "e2", "source": "ps", "target": "pe"},
                {"id": "e3", "source": "b1", "target": "sc"},
                {"id": "e4", "source": "pe", "target": "e"}
            ]),
        );
        assert!(validate(&w, &registry()).is_ok());
    }

    #[test]
    fn test_router_rule_targets_count_as_reachable() {
        let w = wf(
            json!([
                {"id": "s", "type": "start"},
                {"id": "c", "type": "condition", "data": {
                    "conditionType": "smart_router",
                    "routingRules": [
                        {"id": "r1", "targetNodeId": "hid", "condition": "true"}
                    ]
                }},
                {"id": "hid", "type": "script", "data": {"script": "2"}},
                {"id": "e", "type": "end"}
            ]),
            json!([
                {"id": "e1", "source": "s", "target": "c"},
                {"id": "e2", "source": "c", "target": "e"},
                {"id": "e3", "source": "hid", "target": "e"}
            ]),
        );
        assert!(validate(&w, &registry()).is_ok());
    }
}
