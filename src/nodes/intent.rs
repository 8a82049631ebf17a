//! `intent_recognition` node: LLM-backed classification of the user's input
//! against configured intent categories, with optional parameter extraction
//! and a fallback policy when nothing clears the confidence threshold.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::llm::parse_llm_json;
use super::{optional_str, Node, NodeContext, NodeError, NodeExecutor, NodeOutcome};
use crate::retry::{call_with_retry, CallPolicy};
use crate::services::{ChatMessage, ChatRequest};
use crate::template;

const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntentCategory {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    examples: Vec<String>,
    #[serde(default)]
    required_parameters: Vec<String>,
    #[serde(default)]
    target_node_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum FallbackStrategy {
    #[default]
    AskClarification,
    DefaultIntent,
    HumanHandoff,
}

#[derive(Debug, Deserialize)]
struct Classification {
    intent: String,
    #[serde(default)]
    confidence: f64,
}

fn classification_prompt(categories: &[IntentCategory], input: &str) -> String {
    let mut prompt = String::from(
        "Classify the user message into exactly one of the following intents.\n\n",
    );
    for cat in categories {
        prompt.push_str(&format!("- {}", cat.name));
        if let Some(desc) = &cat.description {
            prompt.push_str(&format!(": {}", desc));
        }
        prompt.push('\n');
        if !cat.keywords.is_empty() {
            prompt.push_str(&format!("  keywords: {}\n", cat.keywords.join(", ")));
        }
        for example in &cat.examples {
            prompt.push_str(&format!("  example: {}\n", example));
        }
    }
    prompt.push_str(&format!(
        "\nUser message: {}\n\n\
         Respond with JSON only: {{\"intent\": \"<name or unknown>\", \"confidence\": <0..1>}}",
        input
    ));
    prompt
}

fn extraction_prompt(category: &IntentCategory, input: &str) -> String {
    format!(
        "Extract the following parameters from the user message: {}.\n\
         User message: {}\n\n\
         Respond with JSON only, one key per parameter, null when absent.",
        category.required_parameters.join(", "),
        input
    )
}

pub struct IntentRecognitionExecutor;

impl IntentRecognitionExecutor {
    async fn chat(
        &self,
        ctx: &NodeContext<'_>,
        policy: &CallPolicy,
        model: Option<String>,
        prompt: String,
    ) -> Result<(String, u32), NodeError> {
        let services = ctx.services.clone();
        let (response, retries) = call_with_retry(policy, || {
            let services = services.clone();
            let request = ChatRequest {
                model: model.clone(),
                messages: vec![ChatMessage::user(prompt.clone())],
                temperature: Some(0.0),
                ..ChatRequest::default()
            };
            async move { services.llm.chat(request).await }
        })
        .await?;
        Ok((response.content, retries))
    }
}

#[async_trait]
impl NodeExecutor for IntentRecognitionExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let categories: Vec<IntentCategory> = node
            .data
            .get("intentCategories")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .filter(|c: &Vec<IntentCategory>| !c.is_empty())
            .ok_or_else(|| {
                NodeError::ConfigError(format!(
                    "node {} needs a non-empty \"intentCategories\"",
                    node.id
                ))
            })?;

        let input = match optional_str(node, "input") {
            Some(tpl) => match template::resolve_string(tpl, ctx.context)? {
                Value::String(s) => s,
                other => other.to_string(),
            },
            None => ctx
                .context
                .get("userInput")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };
        if input.is_empty() {
            return Err(NodeError::MissingInput(format!(
                "node {} has no input to classify",
                node.id
            )));
        }

        let threshold = node
            .data
            .get("confidenceThreshold")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);
        let policy = CallPolicy::from_node_data(&node.data);
        let model = optional_str(node, "model").map(str::to_string);

        let (content, mut retries) = self
            .chat(ctx, &policy, model.clone(), classification_prompt(&categories, &input))
            .await?;
        let classification: Classification = serde_json::from_value(parse_llm_json(&content)?)
            .map_err(|e| {
                NodeError::ExecutionError(format!("unusable classification result: {}", e))
            })?;

        let matched = categories
            .iter()
            .find(|c| c.name == classification.intent)
            .filter(|_| classification.confidence >= threshold);

        let Some(category) = matched else {
            // Below threshold or unknown: apply the fallback policy.
            let strategy: FallbackStrategy = node
                .data
                .get("fallbackStrategy")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            let mut output = json!({
                "intent": classification.intent,
                "confidence": classification.confidence,
                "fallback": match strategy {
                    FallbackStrategy::AskClarification => "ask_clarification",
                    FallbackStrategy::DefaultIntent => "default_intent",
                    FallbackStrategy::HumanHandoff => "human_handoff",
                },
            });
            if strategy == FallbackStrategy::DefaultIntent {
                if let Some(default_intent) = optional_str(node, "defaultIntent") {
                    output["intent"] = Value::String(default_intent.to_string());
                    if let Some(cat) = categories.iter().find(|c| c.name == default_intent) {
                        if let Some(target) = &cat.target_node_id {
                            output["suggestedNodeId"] = Value::String(target.clone());
                        }
                    }
                }
            }
            return Ok(NodeOutcome::next(output).with_retries(retries));
        };

        let mut output = json!({
            "intent": category.name,
            "confidence": classification.confidence,
        });
        if let Some(target) = &category.target_node_id {
            output["suggestedNodeId"] = Value::String(target.clone());
        }

        if !category.required_parameters.is_empty() {
            let (params_content, extra_retries) = self
                .chat(ctx, &policy, model, extraction_prompt(category, &input))
                .await?;
            retries += extra_retries;
            output["parameters"] = parse_llm_json(&params_content)?;
        }

        Ok(NodeOutcome::next(output).with_retries(retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_prompt_lists_categories() {
        let categories = vec![IntentCategory {
            name: "refund".into(),
            description: Some("user wants money back".into()),
            keywords: vec!["refund".into(), "return".into()],
            examples: vec!["I want my money back".into()],
            required_parameters: vec![],
            target_node_id: None,
        }];
        let p = classification_prompt(&categories, "please refund order 7");
        assert!(p.contains("refund: user wants money back"));
        assert!(p.contains("keywords: refund, return"));
        assert!(p.contains("please refund order 7"));
    }

    #[test]
    fn test_fallback_strategy_wire_format() {
        let s: FallbackStrategy = serde_json::from_str("\"human_handoff\"").unwrap();
        assert_eq!(s, FallbackStrategy::HumanHandoff);
    }
}
