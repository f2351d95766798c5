use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::GroupKey;

// Output field names. External consumers read these verbatim.
pub const TIMESTAMP: &str = "@timestamp";
pub const ALERT_UUID: &str = "kibana.alert.uuid";
pub const ALERT_RULE_UUID: &str = "kibana.alert.rule.uuid";
pub const ALERT_INSTANCE_ID: &str = "kibana.alert.instance.id";
pub const ALERT_WORKFLOW_STATUS: &str = "kibana.alert.workflow_status";
pub const ALERT_ORIGINAL_TIME: &str = "kibana.alert.original_time";
pub const ALERT_LAST_DETECTED: &str = "kibana.alert.last_detected";
pub const ALERT_ANCESTORS_ID: &str = "kibana.alert.ancestors.id";
pub const ALERT_SUPPRESSION_TERMS: &str = "kibana.alert.suppression.terms";
pub const ALERT_SUPPRESSION_START: &str = "kibana.alert.suppression.start";
pub const ALERT_SUPPRESSION_END: &str = "kibana.alert.suppression.end";
pub const ALERT_SUPPRESSION_DOCS_COUNT: &str = "kibana.alert.suppression.docs_count";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Open,
    Closed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Open => "open",
            WorkflowStatus::Closed => "closed",
        }
    }
}

/// Shape-specific alert fields.
///
/// Unsuppressed alerts carry no suppression fields at all; they are not a
/// suppressed alert with a count of zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AlertBody {
    Suppressed {
        #[serde(rename = "kibana.alert.suppression.terms")]
        terms: GroupKey,
        #[serde(rename = "kibana.alert.suppression.start")]
        start: DateTime<Utc>,
        #[serde(rename = "kibana.alert.suppression.end")]
        end: DateTime<Utc>,
        #[serde(rename = "kibana.alert.suppression.docs_count")]
        docs_count: u64,
    },
    Unsuppressed {},
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRecord {
    #[serde(rename = "kibana.alert.uuid")]
    pub id: String,
    #[serde(rename = "kibana.alert.rule.uuid")]
    pub rule_id: String,
    #[serde(rename = "kibana.alert.instance.id")]
    pub instance_id: String,
    #[serde(rename = "kibana.alert.workflow_status")]
    pub workflow_status: WorkflowStatus,
    /// Creation time. Not moved by later updates.
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Raw `@timestamp` of the earliest contributing document.
    #[serde(rename = "kibana.alert.original_time")]
    pub original_time: DateTime<Utc>,
    #[serde(rename = "kibana.alert.last_detected")]
    pub last_detected: DateTime<Utc>,
    /// Id of the first contributing source document.
    #[serde(rename = "kibana.alert.ancestors.id")]
    pub source_document_id: String,
    /// Optimistic concurrency token, bumped on every store write.
    #[serde(rename = "_revision", default)]
    pub revision: u64,
    #[serde(flatten)]
    pub body: AlertBody,
}

impl AlertRecord {
    pub fn is_open(&self) -> bool {
        self.workflow_status == WorkflowStatus::Open
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self.body, AlertBody::Suppressed { .. })
    }

    pub fn terms(&self) -> Option<&GroupKey> {
        match &self.body {
            AlertBody::Suppressed { terms, .. } => Some(terms),
            AlertBody::Unsuppressed {} => None,
        }
    }

    /// `(start, end)` of the suppression window, if this alert is suppressed.
    pub fn suppression_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match &self.body {
            AlertBody::Suppressed { start, end, .. } => Some((*start, *end)),
            AlertBody::Unsuppressed {} => None,
        }
    }

    pub fn suppression_end(&self) -> Option<DateTime<Utc>> {
        self.suppression_window().map(|(_, end)| end)
    }

    pub fn docs_count(&self) -> Option<u64> {
        match &self.body {
            AlertBody::Suppressed { docs_count, .. } => Some(*docs_count),
            AlertBody::Unsuppressed {} => None,
        }
    }
}
