//! Suppression policy validation.
//!
//! Rule payloads arrive as loosely typed [`RuleConfigV1`]; a cycle only runs
//! against a [`ValidatedPolicy`].

use crate::{Result, SuppressionError};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use suppression_common::{MissingFieldsStrategy, RuleConfigV1, SuppressionDurationV1};

/// Comparison used when deciding whether a document still falls inside a
/// prior alert's suppression window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WindowBoundary {
    /// `timestamp - end <= duration`
    #[default]
    Inclusive,
    /// `timestamp - end < duration`
    Exclusive,
}

impl WindowBoundary {
    pub fn within(&self, delta: Duration, window: Duration) -> bool {
        match self {
            WindowBoundary::Inclusive => delta <= window,
            WindowBoundary::Exclusive => delta < window,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPolicy {
    pub rule_id: String,
    pub group_by: Vec<String>,
    pub strategy: MissingFieldsStrategy,
    /// `None` limits suppression to a single cycle.
    pub window: Option<Duration>,
    pub max_signals: usize,
    pub timestamp_override: Option<String>,
}

impl ValidatedPolicy {
    pub fn from_rule(rule: &RuleConfigV1, default_max_signals: usize) -> Result<Self> {
        if rule.rule_id.trim().is_empty() {
            return Err(SuppressionError::Validation("rule_id is empty".to_string()));
        }

        let suppression = &rule.alert_suppression;
        if suppression.group_by.is_empty() {
            return Err(SuppressionError::Validation(
                "group_by must name at least one field".to_string(),
            ));
        }
        if let Some(blank) = suppression.group_by.iter().position(|f| f.trim().is_empty()) {
            return Err(SuppressionError::Validation(format!(
                "group_by[{}] is blank",
                blank
            )));
        }

        let window = suppression
            .duration
            .as_ref()
            .map(parse_duration)
            .transpose()?;

        let max_signals = rule.max_signals.unwrap_or(default_max_signals);
        if max_signals == 0 {
            return Err(SuppressionError::Validation(
                "max_signals must be positive".to_string(),
            ));
        }

        Ok(Self {
            rule_id: rule.rule_id.clone(),
            group_by: suppression.group_by.clone(),
            strategy: suppression.missing_fields_strategy,
            window,
            max_signals,
            timestamp_override: rule
                .timestamp_override
                .clone()
                .filter(|field| !field.trim().is_empty()),
        })
    }

    pub fn timestamp_field(&self) -> &str {
        self.timestamp_override
            .as_deref()
            .unwrap_or(suppression_common::TIMESTAMP)
    }
}

fn parse_duration(duration: &SuppressionDurationV1) -> Result<Duration> {
    if duration.value == 0 {
        return Err(SuppressionError::Validation(
            "duration value must be positive".to_string(),
        ));
    }
    let value = i64::try_from(duration.value).map_err(|_| {
        SuppressionError::Validation(format!("duration value {} is too large", duration.value))
    })?;

    let seconds = match duration.unit.as_str() {
        "s" => Some(value),
        "m" => value.checked_mul(60),
        "h" => value.checked_mul(3600),
        other => {
            return Err(SuppressionError::Validation(format!(
                "unsupported duration unit '{}' (expected s, m or h)",
                other
            )))
        }
    };

    seconds
        .and_then(Duration::try_seconds)
        .ok_or_else(|| {
            SuppressionError::Validation(format!(
                "duration {}{} is out of range",
                duration.value, duration.unit
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use suppression_common::SuppressionPolicyV1;

    fn rule(policy: SuppressionPolicyV1) -> RuleConfigV1 {
        RuleConfigV1::new("rule-1", policy)
    }

    #[test]
    fn test_valid_policy_with_duration() {
        let policy = ValidatedPolicy::from_rule(
            &rule(SuppressionPolicyV1::group_by(["host.name"]).with_duration(300, "m")),
            100,
        )
        .unwrap();

        assert_eq!(policy.window, Some(Duration::minutes(300)));
        assert_eq!(policy.max_signals, 100);
        assert_eq!(policy.strategy, MissingFieldsStrategy::Suppress);
        assert_eq!(policy.timestamp_field(), "@timestamp");
    }

    #[test]
    fn test_units() {
        for (value, unit, expected) in [
            (30, "s", Duration::seconds(30)),
            (2, "h", Duration::hours(2)),
        ] {
            let policy = ValidatedPolicy::from_rule(
                &rule(SuppressionPolicyV1::group_by(["host.name"]).with_duration(value, unit)),
                100,
            )
            .unwrap();
            assert_eq!(policy.window, Some(expected));
        }
    }

    #[test]
    fn test_rejects_invalid_policies() {
        let cases = vec![
            rule(SuppressionPolicyV1::group_by(Vec::<String>::new())),
            rule(SuppressionPolicyV1::group_by(["host.name", " "])),
            rule(SuppressionPolicyV1::group_by(["host.name"]).with_duration(5, "d")),
            rule(SuppressionPolicyV1::group_by(["host.name"]).with_duration(0, "m")),
        ];

        for case in cases {
            match ValidatedPolicy::from_rule(&case, 100) {
                Err(SuppressionError::Validation(_)) => {}
                other => panic!("expected validation error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_zero_max_signals_is_invalid() {
        let mut config = rule(SuppressionPolicyV1::group_by(["host.name"]));
        config.max_signals = Some(0);
        assert!(matches!(
            ValidatedPolicy::from_rule(&config, 100),
            Err(SuppressionError::Validation(_))
        ));
    }

    #[test]
    fn test_window_boundary() {
        let window = Duration::minutes(30);
        assert!(WindowBoundary::Inclusive.within(Duration::minutes(30), window));
        assert!(!WindowBoundary::Exclusive.within(Duration::minutes(30), window));
        assert!(WindowBoundary::Exclusive.within(Duration::minutes(29), window));
        assert!(!WindowBoundary::Inclusive.within(Duration::minutes(31), window));
    }
}
