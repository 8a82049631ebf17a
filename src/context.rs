//! The execution context: a single mutable JSON mapping owned by the
//! execution.
//!
//! Flat keys form the back-compat "global" namespace merged from completed
//! node outputs. Three reserved sub-maps carry structured state:
//! `nodeOutputs` (full output per node id), `loops` ([`LoopState`] per loop
//! id), and `parallels` ([`ParallelState`] per parallel id). The context is
//! append/merge-only during forward progress; loop and parallel sub-states
//! are the only entries ever deleted, on loop exit / join.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NodeError;
use crate::model::{LoopState, ParallelState};

pub const NODE_OUTPUTS_KEY: &str = "nodeOutputs";
pub const LOOPS_KEY: &str = "loops";
pub const PARALLELS_KEY: &str = "parallels";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    map: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        ExecutionContext { map }
    }

    /// The raw mapping, including the reserved sub-maps.
    pub fn flat(&self) -> &Map<String, Value> {
        &self.map
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.map.clone())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    /// Read a dotted path (`a.b.c`, with `[n]` indexing) from the flat map.
    pub fn get_path(&self, path: &str) -> Option<Value> {
        lookup_path(&Value::Object(self.map.clone()), path)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.map.insert(key.into(), value);
    }

    /// Merge an object into the flat namespace. Reserved sub-map keys are
    /// skipped so a node output can never clobber structured state.
    pub fn merge(&mut self, other: &Map<String, Value>) {
        for (k, v) in other {
            if k == NODE_OUTPUTS_KEY || k == LOOPS_KEY || k == PARALLELS_KEY {
                continue;
            }
            self.map.insert(k.clone(), v.clone());
        }
    }

    /// Merge a value into the flat namespace if it is an object; scalars and
    /// arrays are ignored, matching the original engine.
    pub fn merge_value(&mut self, value: &Value) {
        if let Value::Object(obj) = value {
            self.merge(obj);
        }
    }

    // ---- nodeOutputs ----

    fn sub_map_mut(&mut self, key: &str) -> &mut Map<String, Value> {
        let entry = self
            .map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        entry.as_object_mut().expect("just ensured object")
    }

    fn sub_map(&self, key: &str) -> Option<&Map<String, Value>> {
        self.map.get(key).and_then(Value::as_object)
    }

    /// Record a node's full output under `nodeOutputs[node_id]`.
    pub fn record_node_output(&mut self, node_id: &str, output: Value) {
        self.sub_map_mut(NODE_OUTPUTS_KEY)
            .insert(node_id.to_string(), output);
    }

    pub fn node_output(&self, node_id: &str) -> Option<&Value> {
        self.sub_map(NODE_OUTPUTS_KEY)?.get(node_id)
    }

    /// All node outputs, as a map value (for `node(id)` in expressions).
    pub fn node_outputs(&self) -> Value {
        self.map
            .get(NODE_OUTPUTS_KEY)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    // ---- loops ----

    pub fn loop_state(&self, loop_id: &str) -> Result<Option<LoopState>, NodeError> {
        match self.sub_map(LOOPS_KEY).and_then(|m| m.get(loop_id)) {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }

    pub fn put_loop_state(&mut self, state: &LoopState) -> Result<(), NodeError> {
        let value = serde_json::to_value(state)?;
        self.sub_map_mut(LOOPS_KEY).insert(state.loop_id.clone(), value);
        Ok(())
    }

    pub fn remove_loop_state(&mut self, loop_id: &str) {
        self.sub_map_mut(LOOPS_KEY).remove(loop_id);
    }

    // ---- parallels ----

    pub fn parallel_state(&self, parallel_id: &str) -> Result<Option<ParallelState>, NodeError> {
        match self.sub_map(PARALLELS_KEY).and_then(|m| m.get(parallel_id)) {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }

    pub fn put_parallel_state(&mut self, state: &ParallelState) -> Result<(), NodeError> {
        let value = serde_json::to_value(state)?;
        self.sub_map_mut(PARALLELS_KEY)
            .insert(state.parallel_id.clone(), value);
        Ok(())
    }

    pub fn remove_parallel_state(&mut self, parallel_id: &str) {
        self.sub_map_mut(PARALLELS_KEY).remove(parallel_id);
    }
}

/// Walk a dotted/bracket-indexed path into a JSON value.
/// `items[0].name` → `value["items"][0]["name"]`.
pub fn lookup_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value.clone();
    for segment in split_path(path) {
        current = match segment {
            PathSegment::Key(k) => current.get(&k)?.clone(),
            PathSegment::Index(i) => current.get(i)?.clone(),
        };
    }
    Some(current)
}

enum PathSegment {
    Key(String),
    Index(usize),
}

fn split_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let mut rest = part;
        while let Some(open) = rest.find('[') {
            let key = &rest[..open];
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            match rest[open + 1..].find(']') {
                Some(close) => {
                    let inner = &rest[open + 1..open + 1 + close];
                    let inner = inner.trim_matches(|c| c == '"' || c == '\'');
                    match inner.parse::<usize>() {
                        Ok(i) => segments.push(PathSegment::Index(i)),
                        Err(_) => segments.push(PathSegment::Key(inner.to_string())),
                    }
                    rest = &rest[open + 2 + close..];
                }
                None => {
                    segments.push(PathSegment::Key(rest[open..].to_string()));
                    rest = "";
                }
            }
        }
        if !rest.is_empty() {
            segments.push(PathSegment::Key(rest.to_string()));
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_skips_reserved_keys() {
        let mut ctx = ExecutionContext::new();
        ctx.record_node_output("n1", json!({"x": 1}));
        let mut incoming = Map::new();
        incoming.insert("nodeOutputs".to_string(), json!("clobbered"));
        incoming.insert("price".to_string(), json!(42));
        ctx.merge(&incoming);
        assert_eq!(ctx.node_output("n1"), Some(&json!({"x": 1})));
        assert_eq!(ctx.get("price"), Some(&json!(42)));
    }

    #[test]
    fn test_node_output_round_trip() {
        let mut ctx = ExecutionContext::new();
        ctx.record_node_output("fetch", json!({"result": {"items": [1, 2, 3]}}));
        assert_eq!(
            ctx.node_output("fetch").unwrap()["result"]["items"][1],
            json!(2)
        );
    }

    #[test]
    fn test_loop_state_lifecycle() {
        let mut ctx = ExecutionContext::new();
        assert!(ctx.loop_state("L").unwrap().is_none());
        let state = LoopState {
            loop_id: "L".into(),
            current_iteration: 1,
            max_iterations: 3,
            start_node_id: "ls".into(),
            exit_condition: None,
            exit_event_type: None,
            exit_event_condition: None,
            exit_keyword: None,
        };
        ctx.put_loop_state(&state).unwrap();
        assert_eq!(ctx.loop_state("L").unwrap().unwrap().current_iteration, 1);
        ctx.remove_loop_state("L");
        assert!(ctx.loop_state("L").unwrap().is_none());
    }

    #[test]
    fn test_lookup_path_dotted_and_indexed() {
        let v = json!({"a": {"b": [{"c": "hit"}]}});
        assert_eq!(lookup_path(&v, "a.b[0].c"), Some(json!("hit")));
        assert_eq!(lookup_path(&v, "a.b[1].c"), None);
        assert_eq!(lookup_path(&v, "a.missing"), None);
        assert_eq!(lookup_path(&v, "a"), Some(json!({"b": [{"c": "hit"}]})));
    }

    #[test]
    fn test_lookup_path_quoted_key() {
        let v = json!({"a": {"k-1": 7}});
        assert_eq!(lookup_path(&v, "a[\"k-1\"]"), Some(json!(7)));
    }

    #[test]
    fn test_merge_value_ignores_non_objects() {
        let mut ctx = ExecutionContext::new();
        ctx.merge_value(&json!("scalar"));
        ctx.merge_value(&json!([1, 2]));
        assert!(ctx.flat().is_empty());
    }
}
