use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How documents lacking a group-by value are handled.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MissingFieldsStrategy {
    /// Group missing values under a `null` key component.
    #[default]
    Suppress,
    /// Emit one unsuppressed alert per document missing any group-by field.
    DoNotSuppress,
}

/// Suppression window length as configured on the rule (`{ value: 30, unit: "m" }`).
///
/// The unit is kept as text so an unknown unit surfaces as a validation error
/// at cycle start instead of a deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuppressionDurationV1 {
    pub value: u64,
    pub unit: String,
}

impl SuppressionDurationV1 {
    pub fn new(value: u64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuppressionPolicyV1 {
    pub group_by: Vec<String>,
    #[serde(default)]
    pub missing_fields_strategy: MissingFieldsStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<SuppressionDurationV1>,
}

impl SuppressionPolicyV1 {
    pub fn group_by<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            group_by: fields.into_iter().map(Into::into).collect(),
            missing_fields_strategy: MissingFieldsStrategy::default(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, value: u64, unit: &str) -> Self {
        self.duration = Some(SuppressionDurationV1::new(value, unit));
        self
    }

    pub fn with_missing_fields_strategy(mut self, strategy: MissingFieldsStrategy) -> Self {
        self.missing_fields_strategy = strategy;
        self
    }
}

/// The slice of a detection rule the suppression engine needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleConfigV1 {
    pub rule_id: String,
    /// Hard cap on alerts written per cycle. Falls back to the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_signals: Option<usize>,
    /// Field holding the timestamp used for search bounds and suppression windows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_override: Option<String>,
    /// Opaque query forwarded to the document source.
    #[serde(default)]
    pub query: Value,
    pub alert_suppression: SuppressionPolicyV1,
}

impl RuleConfigV1 {
    pub fn new(rule_id: impl Into<String>, alert_suppression: SuppressionPolicyV1) -> Self {
        Self {
            rule_id: rule_id.into(),
            max_signals: None,
            timestamp_override: None,
            query: Value::Null,
            alert_suppression,
        }
    }
}
