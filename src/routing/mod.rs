//! Rule evaluation for `condition` nodes: smart-router scoring and value
//! matching. The condition node executor owns fallback handling; this module
//! only answers "which target, if any".

use regex::Regex;
use serde_json::Value;

use crate::error::NodeError;
use crate::expr;
use crate::model::{
    MatchType, RoutingRule, RoutingStrategy, ValueMatchRule, ValueMatchType, ValueMatchingConfig,
};

/// A selected route: target node, the rule that chose it, and its score.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub target_node_id: String,
    pub rule_id: String,
    pub score: f64,
}

fn err(msg: impl Into<String>) -> NodeError {
    NodeError::RoutingError(msg.into())
}

fn compile_regex(pattern: &str) -> Result<Regex, NodeError> {
    Regex::new(pattern).map_err(|e| err(format!("invalid pattern {:?}: {}", pattern, e)))
}

fn value_as_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Score one smart-router rule against the scope. `None` means no match;
/// matches score in `(0, 1]`.
fn score_rule(rule: &RoutingRule, scope: &Value) -> Result<Option<f64>, NodeError> {
    match rule.match_type {
        MatchType::Exact => {
            let hit = expr::evaluate_bool(&rule.condition, scope)?;
            Ok(hit.then_some(1.0))
        }
        MatchType::Contains => {
            let value = expr::evaluate(&rule.condition, scope)?;
            let expected = rule
                .expected_value
                .as_ref()
                .ok_or_else(|| err(format!("rule {} needs expectedValue", rule.id)))?;
            let hit = value_as_string(&value).contains(&value_as_string(expected));
            Ok(hit.then_some(1.0))
        }
        MatchType::Regex => {
            let value = expr::evaluate(&rule.condition, scope)?;
            let pattern = rule
                .expected_value
                .as_ref()
                .and_then(Value::as_str)
                .ok_or_else(|| err(format!("rule {} needs a string expectedValue", rule.id)))?;
            let re = compile_regex(pattern)?;
            Ok(re.is_match(&value_as_string(&value)).then_some(1.0))
        }
        MatchType::Range => {
            let value = expr::evaluate(&rule.condition, scope)?;
            let Some(actual) = value.as_f64().or_else(|| {
                value.as_str().and_then(|s| s.trim().parse::<f64>().ok())
            }) else {
                return Ok(None);
            };
            let expected = rule
                .expected_value
                .as_ref()
                .and_then(Value::as_f64)
                .ok_or_else(|| err(format!("rule {} needs a numeric expectedValue", rule.id)))?;
            let tolerance = rule.tolerance.unwrap_or(0.0);
            let diff = (actual - expected).abs();
            if diff > tolerance {
                return Ok(None);
            }
            // Closer is better; an exact hit scores 1.
            let score = if tolerance > 0.0 { 1.0 - diff / tolerance } else { 1.0 };
            Ok(Some(score.max(f64::MIN_POSITIVE)))
        }
        MatchType::Custom => {
            let matcher = rule
                .custom_matcher
                .as_deref()
                .ok_or_else(|| err(format!("rule {} needs customMatcher", rule.id)))?;
            let value = expr::evaluate(&rule.condition, scope)?;
            // The matcher sees the condition's value bound as `value`.
            let mut inner = scope.as_object().cloned().unwrap_or_default();
            inner.insert("value".to_string(), value);
            let hit = expr::evaluate_bool(matcher, &Value::Object(inner))?;
            Ok(hit.then_some(1.0))
        }
    }
}

/// Evaluate smart-router rules under the given strategy.
pub fn evaluate_smart_rules(
    rules: &[RoutingRule],
    strategy: RoutingStrategy,
    scope: &Value,
) -> Result<Option<RouteMatch>, NodeError> {
    let mut enabled: Vec<&RoutingRule> = rules.iter().filter(|r| r.enabled).collect();
    if enabled.is_empty() {
        return Ok(None);
    }
    // Higher priority first; stable for equal priorities.
    enabled.sort_by_key(|r| std::cmp::Reverse(r.priority.unwrap_or(0)));

    match strategy {
        RoutingStrategy::FirstMatch => {
            for rule in &enabled {
                if let Some(score) = score_rule(rule, scope)? {
                    return Ok(Some(RouteMatch {
                        target_node_id: rule.target_node_id.clone(),
                        rule_id: rule.id.clone(),
                        score,
                    }));
                }
            }
            Ok(None)
        }
        RoutingStrategy::BestMatch => {
            let mut best: Option<RouteMatch> = None;
            for rule in &enabled {
                if let Some(score) = score_rule(rule, scope)? {
                    let better = best.as_ref().map_or(true, |b| score > b.score);
                    if better {
                        best = Some(RouteMatch {
                            target_node_id: rule.target_node_id.clone(),
                            rule_id: rule.id.clone(),
                            score,
                        });
                    }
                }
            }
            Ok(best)
        }
        RoutingStrategy::WeightedScore => {
            let max_priority = enabled
                .iter()
                .map(|r| r.priority.unwrap_or(0))
                .max()
                .unwrap_or(0)
                .max(1) as f64;
            let mut best: Option<RouteMatch> = None;
            for rule in &enabled {
                if let Some(score) = score_rule(rule, scope)? {
                    let priority = rule.priority.unwrap_or(0).max(0) as f64 / max_priority;
                    let weight = rule.weight.unwrap_or(1.0);
                    let combined = (priority * 0.3 + score * 0.7) * weight;
                    let better = best.as_ref().map_or(true, |b| combined > b.score);
                    if better {
                        best = Some(RouteMatch {
                            target_node_id: rule.target_node_id.clone(),
                            rule_id: rule.id.clone(),
                            score: combined,
                        });
                    }
                }
            }
            Ok(best)
        }
    }
}

fn fold_case(s: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        s.to_string()
    } else {
        s.to_lowercase()
    }
}

fn value_rule_matches(
    rule: &ValueMatchRule,
    source: &Value,
    case_sensitive: bool,
) -> Result<bool, NodeError> {
    let source_str = fold_case(&value_as_string(source), case_sensitive);
    match rule.match_type {
        ValueMatchType::Exact => Ok(rule.match_values.iter().any(|mv| {
            if expr::loose_eq(mv, source) {
                return true;
            }
            fold_case(&value_as_string(mv), case_sensitive) == source_str
        })),
        ValueMatchType::Contains => Ok(rule
            .match_values
            .iter()
            .any(|mv| source_str.contains(&fold_case(&value_as_string(mv), case_sensitive)))),
        ValueMatchType::StartsWith => Ok(rule
            .match_values
            .iter()
            .any(|mv| source_str.starts_with(&fold_case(&value_as_string(mv), case_sensitive)))),
        ValueMatchType::EndsWith => Ok(rule
            .match_values
            .iter()
            .any(|mv| source_str.ends_with(&fold_case(&value_as_string(mv), case_sensitive)))),
        ValueMatchType::Regex => {
            let pattern = rule
                .pattern
                .as_deref()
                .ok_or_else(|| err(format!("rule {} needs pattern", rule.id)))?;
            let re = compile_regex(pattern)?;
            Ok(re.is_match(&value_as_string(source)))
        }
        ValueMatchType::Range => {
            let Some(n) = source
                .as_f64()
                .or_else(|| source.as_str().and_then(|s| s.trim().parse().ok()))
            else {
                return Ok(false);
            };
            let min_ok = rule.range_min.map_or(true, |min| n >= min);
            let max_ok = rule.range_max.map_or(true, |max| n <= max);
            Ok(min_ok && max_ok)
        }
    }
}

/// Evaluate a value-matcher configuration. Exact rules run in priority
/// order; a fuzzy pass runs only when nothing matched and fuzzy matching is
/// enabled. The default target is not applied here.
pub fn evaluate_value_matching(
    cfg: &ValueMatchingConfig,
    source: &Value,
) -> Result<Option<RouteMatch>, NodeError> {
    let mut enabled: Vec<&ValueMatchRule> =
        cfg.matching_rules.iter().filter(|r| r.enabled).collect();
    enabled.sort_by_key(|r| std::cmp::Reverse(r.priority));

    for rule in &enabled {
        if value_rule_matches(rule, source, cfg.case_sensitive)? {
            return Ok(Some(RouteMatch {
                target_node_id: rule.target_node_id.clone(),
                rule_id: rule.id.clone(),
                score: 1.0,
            }));
        }
    }

    if cfg.enable_fuzzy_match {
        let source_str = fold_case(&value_as_string(source), cfg.case_sensitive);
        let mut best: Option<RouteMatch> = None;
        for rule in &enabled {
            for mv in &rule.match_values {
                let candidate = fold_case(&value_as_string(mv), cfg.case_sensitive);
                let sim = similarity(&source_str, &candidate);
                if sim >= cfg.fuzzy_threshold {
                    let better = best.as_ref().map_or(true, |b| sim > b.score);
                    if better {
                        best = Some(RouteMatch {
                            target_node_id: rule.target_node_id.clone(),
                            rule_id: rule.id.clone(),
                            score: sim,
                        });
                    }
                }
            }
        }
        if best.is_some() {
            return Ok(best);
        }
    }

    Ok(None)
}

/// Normalized Levenshtein similarity in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}
