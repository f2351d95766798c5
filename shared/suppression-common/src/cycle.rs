use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::{MatchedDocument, TimeRange};
use crate::policy::RuleConfigV1;

/// Request to run one evaluation cycle for a rule.
///
/// `documents` are the search hits produced upstream; the engine only bounds
/// them by `time_range`, it never runs the query itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRequestV1 {
    pub schema_version: String,
    pub cycle_id: String,
    pub rule: RuleConfigV1,
    pub time_range: TimeRange,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub documents: Vec<MatchedDocument>,
}

impl CycleRequestV1 {
    pub fn new(rule: RuleConfigV1, time_range: TimeRange, documents: Vec<MatchedDocument>) -> Self {
        Self {
            schema_version: cycle_request_schema_version_v1(),
            cycle_id: Uuid::new_v4().to_string(),
            rule,
            time_range,
            requested_at: time_range.to,
            documents,
        }
    }
}

pub fn cycle_request_schema_version_v1() -> String {
    "suppression_cycle_request_v1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleErrorV1 {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
    pub message: String,
}

/// Outcome of one evaluation cycle, published for display by UI/API layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleSummaryV1 {
    pub schema_version: String,
    pub cycle_id: String,
    pub rule_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Documents returned by the source for this cycle.
    pub candidates: usize,
    /// Document contributions skipped because an earlier cycle already covered them.
    pub skipped_already_attributed: usize,
    pub alerts_created: usize,
    pub alerts_updated: usize,
    pub unsuppressed_created: usize,
    /// Documents folded into suppressed alerts during this cycle.
    pub suppressed_docs: u64,
    /// Groups or documents dropped once `max_signals` was reached.
    pub dropped_by_cap: usize,
    #[serde(default)]
    pub errors: Vec<CycleErrorV1>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub aborted: bool,
}

impl CycleSummaryV1 {
    pub fn new(cycle_id: impl Into<String>, rule_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: cycle_summary_schema_version_v1(),
            cycle_id: cycle_id.into(),
            rule_id: rule_id.into(),
            started_at,
            finished_at: started_at,
            candidates: 0,
            skipped_already_attributed: 0,
            alerts_created: 0,
            alerts_updated: 0,
            unsuppressed_created: 0,
            suppressed_docs: 0,
            dropped_by_cap: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            aborted: false,
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Alerts written by this cycle, created or updated.
    pub fn alerts_written(&self) -> usize {
        self.alerts_created + self.alerts_updated + self.unsuppressed_created
    }
}

pub fn cycle_summary_schema_version_v1() -> String {
    "suppression_cycle_summary_v1".to_string()
}

pub fn cycle_request_subject(rule_id: &str) -> String {
    format!("alerts.suppression.cycle.{}", rule_id)
}

pub fn cycle_summary_subject(rule_id: &str) -> String {
    format!("alerts.suppression.summary.{}", rule_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SuppressionPolicyV1;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_subjects() {
        assert_eq!(cycle_request_subject("rule-1"), "alerts.suppression.cycle.rule-1");
        assert_eq!(
            cycle_summary_subject("rule-1"),
            "alerts.suppression.summary.rule-1"
        );
    }

    #[test]
    fn test_request_defaults_documents() {
        let from = Utc.with_ymd_and_hms(2020, 10, 28, 4, 30, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2020, 10, 28, 5, 30, 0).unwrap();
        let request = CycleRequestV1::new(
            RuleConfigV1::new("rule-1", SuppressionPolicyV1::group_by(["host.name"])),
            TimeRange::new(from, to),
            vec![],
        );

        let mut value = serde_json::to_value(&request).unwrap();
        value.as_object_mut().unwrap().remove("documents");
        let decoded: CycleRequestV1 = serde_json::from_value(value).unwrap();

        assert_eq!(decoded.schema_version, "suppression_cycle_request_v1");
        assert_eq!(decoded.requested_at, to);
        assert!(decoded.documents.is_empty());
    }
}
