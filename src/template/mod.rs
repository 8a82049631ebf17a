//! `{{...}}` template resolution over the execution context.
//!
//! Placeholder forms, tried in order:
//! - `{{expr:EXPR}}` evaluates EXPR with the expression interpreter
//! - `{{$nodeId}}` resolves to a node's whole recorded output
//! - `{{nodeId.path}}` / `{{nodes.nodeId.path}}` reads into a node output
//! - `{{field.path}}` reads from the flat context
//!
//! A string that is exactly one placeholder resolves to the typed JSON value;
//! anything else interpolates placeholders into the string. Unresolvable
//! references are left verbatim, so resolution is idempotent over an
//! unchanged context. Expression errors are not swallowed.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::context::{lookup_path, ExecutionContext};
use crate::error::NodeError;
use crate::expr;

/// Reserved key in a node's `data` bag: when present, the node input is built
/// from this mapping instead of the raw data object.
pub const INPUT_MAPPING_KEY: &str = "_inputMapping";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("static regex"))
}

/// Resolve one placeholder body to a value, or `None` if the reference does
/// not exist (the caller leaves the placeholder verbatim).
fn resolve_reference(body: &str, ctx: &ExecutionContext) -> Result<Option<Value>, NodeError> {
    if let Some(source) = body.strip_prefix("expr:") {
        let result = expr::evaluate(source, &ctx.as_value())
            .map_err(|e| NodeError::TemplateError(format!("in {{{{expr:...}}}}: {}", e)))?;
        return Ok(Some(result));
    }

    if let Some(node_id) = body.strip_prefix('$') {
        return Ok(ctx.node_output(node_id).cloned());
    }

    let path = body.strip_prefix("nodes.").unwrap_or(body);
    if let Some((first, rest)) = path.split_once('.') {
        if let Some(output) = ctx.node_output(first) {
            return Ok(lookup_path(output, rest));
        }
    } else if let Some(output) = ctx.node_output(path) {
        return Ok(Some(output.clone()));
    }

    // Fall back to the flat context.
    Ok(ctx.get_path(path))
}

fn interpolate(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        // Integral numbers render without the `.0` the expression layer's
        // f64 backing would otherwise leak into prompts and messages.
        Value::Number(_) => expr::display_string(value),
        other => other.to_string(),
    }
}

/// Resolve a template string. Exactly one placeholder keeps the value's type.
pub fn resolve_string(input: &str, ctx: &ExecutionContext) -> Result<Value, NodeError> {
    let re = placeholder_re();

    let trimmed = input.trim();
    if let Some(caps) = re.captures(trimmed) {
        if caps.get(0).map(|m| m.as_str()) == Some(trimmed) {
            let body = &caps[1];
            return Ok(match resolve_reference(body, ctx)? {
                Some(v) => v,
                None => Value::String(input.to_string()),
            });
        }
    }

    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in re.captures_iter(input) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&input[last..whole.start()]);
        match resolve_reference(&caps[1], ctx)? {
            Some(v) => out.push_str(&interpolate(&v)),
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(Value::String(out))
}

/// Resolve templates recursively through objects and arrays.
pub fn resolve_value(value: &Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
    match value {
        Value::String(s) => resolve_string(s, ctx),
        Value::Array(items) => {
            let resolved: Result<Vec<Value>, NodeError> =
                items.iter().map(|v| resolve_value(v, ctx)).collect();
            Ok(Value::Array(resolved?))
        }
        Value::Object(obj) => {
            let mut out = Map::with_capacity(obj.len());
            for (k, v) in obj {
                out.insert(k.clone(), resolve_value(v, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Build a node's resolved input from its `data` bag. When `_inputMapping`
/// is present, only that mapping is resolved; otherwise the whole bag is.
pub fn resolve_node_input(data: &Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
    if let Some(mapping) = data.get(INPUT_MAPPING_KEY) {
        let Some(entries) = mapping.as_object() else {
            return Err(NodeError::TemplateError(
                "_inputMapping must be an object".to_string(),
            ));
        };
        let mut out = Map::with_capacity(entries.len());
        for (k, v) in entries {
            out.insert(k.clone(), resolve_value(v, ctx)?);
        }
        return Ok(Value::Object(out));
    }
    resolve_value(data, ctx)
}
