//! Workflow definition: an immutable-at-execution-time graph of typed nodes
//! and edges, plus an initial variable seed.
//!
//! Node configuration lives in a loosely-typed `data` bag; each executor
//! deserializes the slice of it that it understands into a typed config
//! struct. Field names stay `camelCase` on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A declarative workflow graph. Validated by [`crate::validate`] before the
/// engine will run it; never mutated during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Initial context seed, merged with the start input.
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Informational only; scheduling/webhook wiring lives outside the engine.
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

impl WorkflowDefinition {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn start_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.node_type == "start")
    }

    /// Outgoing edges of a node, in definition order.
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == node_id).collect()
    }

    /// All `parallel_branch` nodes tagged with the given parallel id.
    pub fn parallel_branches(&self, parallel_id: &str) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| {
                n.node_type == "parallel_branch"
                    && n.data.get("parallelId").and_then(Value::as_str) == Some(parallel_id)
            })
            .collect()
    }
}

/// One node in the graph. `node_type` is an open string so new executors can
/// be registered without touching the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub label: String,
    /// Type-specific configuration bag.
    #[serde(default)]
    pub data: Value,
}

/// A directed edge. `condition`, when present, is an expression evaluated
/// against the execution context to decide traversal eligibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Schedule,
    Webhook,
    Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub config: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_node_workflow() -> WorkflowDefinition {
        serde_json::from_value(json!({
            "id": "wf1",
            "name": "test",
            "nodes": [
                {"id": "start", "type": "start", "label": "Start"},
                {"id": "end", "type": "end", "label": "End"}
            ],
            "edges": [
                {"id": "e1", "source": "start", "target": "end"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_deserialize_minimal() {
        let wf = two_node_workflow();
        assert_eq!(wf.nodes.len(), 2);
        assert_eq!(wf.start_node().unwrap().id, "start");
        assert!(wf.variables.is_empty());
    }

    #[test]
    fn test_outgoing_edges() {
        let wf = two_node_workflow();
        let edges = wf.outgoing_edges("start");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target, "end");
        assert!(wf.outgoing_edges("end").is_empty());
    }

    #[test]
    fn test_parallel_branches_by_tag() {
        let wf: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf2",
            "name": "par",
            "nodes": [
                {"id": "b1", "type": "parallel_branch", "data": {"parallelId": "p1"}},
                {"id": "b2", "type": "parallel_branch", "data": {"parallelId": "p1"}},
                {"id": "b3", "type": "parallel_branch", "data": {"parallelId": "other"}}
            ],
            "edges": []
        }))
        .unwrap();
        let branches = wf.parallel_branches("p1");
        assert_eq!(branches.len(), 2);
    }
}
