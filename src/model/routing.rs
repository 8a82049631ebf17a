//! Routing rule configuration for `condition` nodes.
//!
//! The three strategies (`simple`, `smart_router`, `value_matcher`) carry
//! different rule shapes; they deserialize from the node's `data` bag and are
//! evaluated by [`crate::routing`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    #[default]
    Simple,
    SmartRouter,
    ValueMatcher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    #[default]
    FirstMatch,
    BestMatch,
    WeightedScore,
}

/// How a smart-router rule matches its condition against the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// The rule's condition expression must evaluate truthy.
    #[default]
    Exact,
    /// The condition resolves to a value containing `expectedValue`.
    Contains,
    /// The condition resolves to a value matching the `expectedValue` regex.
    Regex,
    /// Numeric comparison against `expectedValue` within `tolerance`.
    Range,
    /// `customMatcher` expression evaluated with `value` bound in scope.
    Custom,
}

/// One smart-router rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub target_node_id: String,
    pub condition: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub match_type: MatchType,
    #[serde(default)]
    pub expected_value: Option<Value>,
    #[serde(default)]
    pub tolerance: Option<f64>,
    #[serde(default)]
    pub custom_matcher: Option<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueMatchType {
    Exact,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    Range,
}

/// One value-matcher rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMatchRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub target_node_id: String,
    #[serde(default)]
    pub match_values: Vec<Value>,
    pub match_type: ValueMatchType,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub range_min: Option<f64>,
    #[serde(default)]
    pub range_max: Option<f64>,
}

/// Configuration for the `value_matcher` condition type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMatchingConfig {
    pub source_field: String,
    pub matching_rules: Vec<ValueMatchRule>,
    #[serde(default)]
    pub default_node_id: Option<String>,
    #[serde(default)]
    pub enable_fuzzy_match: bool,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    #[serde(default)]
    pub case_sensitive: bool,
}

fn default_fuzzy_threshold() -> f64 {
    0.8
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_routing_rule_defaults() {
        let rule: RoutingRule = serde_json::from_value(json!({
            "id": "r1",
            "targetNodeId": "n1",
            "condition": "price > 100"
        }))
        .unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.match_type, MatchType::Exact);
        assert!(rule.priority.is_none());
    }

    #[test]
    fn test_value_matching_config() {
        let cfg: ValueMatchingConfig = serde_json::from_value(json!({
            "sourceField": "category",
            "matchingRules": [{
                "id": "m1",
                "targetNodeId": "n2",
                "matchValues": ["books"],
                "matchType": "exact",
                "priority": 10
            }],
            "enableFuzzyMatch": true
        }))
        .unwrap();
        assert_eq!(cfg.source_field, "category");
        assert!((cfg.fuzzy_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(cfg.matching_rules[0].match_type, ValueMatchType::Exact);
    }

    #[test]
    fn test_condition_type_wire_format() {
        let t: ConditionType = serde_json::from_str("\"smart_router\"").unwrap();
        assert_eq!(t, ConditionType::SmartRouter);
    }
}
