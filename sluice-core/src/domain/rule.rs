//! Rule definitions evaluated by the runner's observers

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::record::Record;

/// The full set of rules attached to a pipeline
///
/// `uuid` changes whenever the rules are edited; the rules loader uses it to
/// detect changes without diffing the definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinitions {
    pub uuid: String,
    #[serde(default)]
    pub metric_rules: Vec<MetricRuleDefinition>,
    #[serde(default)]
    pub data_rules: Vec<DataRuleDefinition>,
}

/// Pipeline metric a metric rule watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    BatchCount,
    InputRecords,
    OutputRecords,
    ErrorRecords,
    LastBatchMillis,
    MemoryUsageMb,
}

/// Comparison between an observed value and a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Equal,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::LessThan => value < threshold,
            Comparison::LessOrEqual => value <= threshold,
            Comparison::Equal => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

/// Alert when a pipeline metric crosses a threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRuleDefinition {
    pub id: String,
    pub metric: MetricKind,
    pub comparison: Comparison,
    pub threshold: f64,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

/// Condition a data rule checks against one field of a sampled record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum RuleCondition {
    Exists,
    Missing,
    Equals(JsonValue),
    GreaterThan(f64),
    LessThan(f64),
}

/// Sample the output of a stage and keep records matching a condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRuleDefinition {
    pub id: String,
    /// Stage whose output is sampled
    pub lane: String,
    /// `/`-separated path of the field the condition applies to
    pub field: String,
    pub condition: RuleCondition,
    /// Percentage (0-100) of the stage output that is sampled
    #[serde(default = "full_sampling")]
    pub sampling_percentage: f64,
    /// Matching records kept for retrieval, capped by the runner's global limit
    #[serde(default = "default_records_to_retain")]
    pub sampling_records_to_retain: usize,
    /// Number of matches that raises an alert; 0 disables alerting
    #[serde(default)]
    pub alert_threshold: u64,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl DataRuleDefinition {
    /// Evaluates the rule's condition against a record
    pub fn matches(&self, record: &Record) -> bool {
        let field = record.get(&self.field);
        match &self.condition {
            RuleCondition::Exists => field.is_some(),
            RuleCondition::Missing => field.is_none(),
            RuleCondition::Equals(expected) => field == Some(expected),
            RuleCondition::GreaterThan(threshold) => field
                .and_then(JsonValue::as_f64)
                .is_some_and(|v| v > *threshold),
            RuleCondition::LessThan(threshold) => field
                .and_then(JsonValue::as_f64)
                .is_some_and(|v| v < *threshold),
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

fn full_sampling() -> f64 {
    100.0
}

fn default_records_to_retain() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(condition: RuleCondition) -> DataRuleDefinition {
        DataRuleDefinition {
            id: "r1".to_string(),
            lane: "origin".to_string(),
            field: "/amount".to_string(),
            condition,
            sampling_percentage: 100.0,
            sampling_records_to_retain: 10,
            alert_threshold: 0,
            enabled: true,
        }
    }

    #[test]
    fn test_data_rule_conditions() {
        let record = Record::new("origin", "1", json!({ "amount": 42, "currency": "EUR" }));

        assert!(rule(RuleCondition::Exists).matches(&record));
        assert!(!rule(RuleCondition::Missing).matches(&record));
        assert!(rule(RuleCondition::Equals(json!(42))).matches(&record));
        assert!(rule(RuleCondition::GreaterThan(40.0)).matches(&record));
        assert!(!rule(RuleCondition::LessThan(40.0)).matches(&record));
    }

    #[test]
    fn test_non_numeric_field_never_compares() {
        let record = Record::new("origin", "1", json!({ "amount": "lots" }));
        assert!(!rule(RuleCondition::GreaterThan(0.0)).matches(&record));
    }

    #[test]
    fn test_rule_deserialization_defaults() {
        let rule: DataRuleDefinition = serde_json::from_value(json!({
            "id": "big-orders",
            "lane": "origin",
            "field": "/amount",
            "condition": { "op": "greater_than", "value": 100.0 }
        }))
        .unwrap();

        assert!(rule.enabled);
        assert_eq!(rule.sampling_percentage, 100.0);
        assert_eq!(rule.sampling_records_to_retain, 10);
        assert_eq!(rule.condition, RuleCondition::GreaterThan(100.0));
    }

    #[test]
    fn test_comparison() {
        assert!(Comparison::GreaterThan.holds(2.0, 1.0));
        assert!(!Comparison::LessThan.holds(2.0, 1.0));
        assert!(Comparison::Equal.holds(3.0, 3.0));
    }
}
