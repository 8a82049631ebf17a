//! `llm` node: templated prompt, optional rolling conversation history,
//! output post-processing.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{optional_str, Node, NodeContext, NodeError, NodeExecutor, NodeOutcome};
use crate::context::ExecutionContext;
use crate::expr;
use crate::retry::{call_with_retry, CallPolicy};
use crate::services::{ChatMessage, ChatRequest};
use crate::template;

const CONVERSATIONS_KEY: &str = "llmConversations";
const DEFAULT_MAX_HISTORY: usize = 20;

fn resolved_text(node: &Node, key: &str, ctx: &ExecutionContext) -> Result<Option<String>, NodeError> {
    match optional_str(node, key) {
        Some(tpl) => {
            let v = template::resolve_string(tpl, ctx)?;
            Ok(Some(match v {
                Value::String(s) => s,
                other => other.to_string(),
            }))
        }
        None => Ok(None),
    }
}

fn history(ctx: &ExecutionContext, conversation_id: &str) -> Vec<ChatMessage> {
    ctx.get(CONVERSATIONS_KEY)
        .and_then(|c| c.get(conversation_id))
        .and_then(Value::as_array)
        .map(|msgs| {
            msgs.iter()
                .filter_map(|m| serde_json::from_value(m.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn store_history(
    ctx: &mut ExecutionContext,
    conversation_id: &str,
    mut messages: Vec<ChatMessage>,
    max_history: usize,
) -> Result<(), NodeError> {
    if messages.len() > max_history {
        messages.drain(..messages.len() - max_history);
    }
    let mut conversations = ctx
        .get(CONVERSATIONS_KEY)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    conversations.insert(conversation_id.to_string(), serde_json::to_value(&messages)?);
    ctx.set(CONVERSATIONS_KEY, Value::Object(conversations));
    Ok(())
}

/// Strip a markdown code fence so `json` output parses even when the model
/// wraps it.
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches('\n')
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

pub(crate) fn parse_llm_json(content: &str) -> Result<Value, NodeError> {
    serde_json::from_str(strip_fences(content))
        .map_err(|e| NodeError::ExecutionError(format!("LLM output is not valid JSON: {}", e)))
}

fn chat_request_from_node(node: &Node, messages: Vec<ChatMessage>) -> ChatRequest {
    let d = &node.data;
    ChatRequest {
        model: optional_str(node, "model").map(str::to_string),
        messages,
        temperature: d.get("temperature").and_then(Value::as_f64),
        max_tokens: d.get("maxTokens").and_then(Value::as_u64).map(|n| n as u32),
        top_p: d.get("topP").and_then(Value::as_f64),
        frequency_penalty: d.get("frequencyPenalty").and_then(Value::as_f64),
        presence_penalty: d.get("presencePenalty").and_then(Value::as_f64),
        stream: false,
    }
}

pub struct LlmExecutor;

#[async_trait]
impl NodeExecutor for LlmExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let prompt = resolved_text(node, "prompt", ctx.context)?.ok_or_else(|| {
            NodeError::ConfigError(format!("node {} is missing \"prompt\"", node.id))
        })?;
        let system_prompt = resolved_text(node, "systemPrompt", ctx.context)?;
        let conversation_id = optional_str(node, "conversationId").map(str::to_string);
        let max_history = node
            .data
            .get("conversationMaxHistory")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_HISTORY);

        let mut messages = Vec::new();
        if let Some(system) = &system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        let prior = conversation_id
            .as_deref()
            .map(|id| history(ctx.context, id))
            .unwrap_or_default();
        messages.extend(prior.iter().cloned());
        messages.push(ChatMessage::user(prompt.clone()));

        let request = chat_request_from_node(node, messages);
        let policy = CallPolicy::from_node_data(&node.data);
        let services = ctx.services.clone();
        let (response, retries) = call_with_retry(&policy, || {
            let services = services.clone();
            let request = request.clone();
            async move { services.llm.chat(request).await }
        })
        .await?;

        if let Some(id) = &conversation_id {
            let mut turns = prior;
            turns.push(ChatMessage::user(prompt.clone()));
            turns.push(ChatMessage::assistant(response.content.clone()));
            store_history(ctx.context, id, turns, max_history)?;
        }

        let output_format = optional_str(node, "outputFormat").unwrap_or("text");
        let mut llm_output = match output_format {
            "json" => parse_llm_json(&response.content)?,
            _ => Value::String(response.content.clone()),
        };

        let mut extracted: Option<Value> = None;
        if let Some(fields) = node.data.get("extractFields").and_then(Value::as_array) {
            let parsed = if llm_output.is_object() {
                llm_output.clone()
            } else {
                parse_llm_json(&response.content)?
            };
            let mut out = Map::new();
            for field in fields.iter().filter_map(Value::as_str) {
                out.insert(
                    field.to_string(),
                    parsed.get(field).cloned().unwrap_or(Value::Null),
                );
            }
            extracted = Some(Value::Object(out));
        }

        if let Some(transform) = optional_str(node, "transformExpression") {
            let mut scope = ctx.context.flat().clone();
            scope.insert("output".to_string(), llm_output.clone());
            if let Some(fields) = &extracted {
                scope.insert("fields".to_string(), fields.clone());
            }
            llm_output = expr::evaluate(transform, &Value::Object(scope))?;
        }

        let mut output = json!({ "llmOutput": llm_output });
        if let Some(fields) = extracted {
            output["extractedFields"] = fields;
        }
        if let Some(usage) = response.usage {
            output["usage"] = serde_json::to_value(usage)?;
        }
        Ok(NodeOutcome::next(output).with_retries(retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn test_parse_llm_json() {
        assert_eq!(
            parse_llm_json("```json\n{\"intent\": \"refund\"}\n```").unwrap(),
            serde_json::json!({"intent": "refund"})
        );
        assert!(parse_llm_json("not json").is_err());
    }
}
