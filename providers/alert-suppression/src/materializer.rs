//! Turns cycle state into alert writes.

use crate::window::GroupWindow;
use chrono::{DateTime, Utc};
use sha2::Digest;
use suppression_common::{AlertBody, AlertRecord, GroupKey, WorkflowStatus};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertWriteOp {
    pub mode: WriteMode,
    pub record: AlertRecord,
    /// Revision the stored alert must still have for an update to apply.
    pub expected_revision: Option<u64>,
}

impl AlertWriteOp {
    pub fn alert_id(&self) -> &str {
        &self.record.id
    }
}

/// Alert capacity for one cycle (`max_signals`).
#[derive(Debug, Clone)]
pub struct AlertBudget {
    max: usize,
    used: usize,
    dropped: usize,
}

impl AlertBudget {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            used: 0,
            dropped: 0,
        }
    }

    /// Claims one alert slot. Returns false, and counts the drop, once the cap is reached.
    pub fn try_reserve(&mut self) -> bool {
        if self.used < self.max {
            self.used += 1;
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    pub fn remaining(&self) -> usize {
        self.max - self.used
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn exceeded(&self) -> bool {
        self.dropped > 0
    }
}

/// A document emitted as its own alert under `doNotSuppress`.
#[derive(Debug, Clone)]
pub struct UnsuppressedCandidate {
    pub alert_id: String,
    pub document_id: String,
    pub event_ts: DateTime<Utc>,
}

/// Builds alert writes for one rule and cycle.
pub struct AlertMaterializer {
    rule_id: String,
    cycle_time: DateTime<Utc>,
    budget: AlertBudget,
}

impl AlertMaterializer {
    pub fn new(rule_id: impl Into<String>, cycle_time: DateTime<Utc>, max_signals: usize) -> Self {
        Self {
            rule_id: rule_id.into(),
            cycle_time,
            budget: AlertBudget::new(max_signals),
        }
    }

    pub fn budget(&self) -> &AlertBudget {
        &self.budget
    }

    /// One create or update for a suppressed group, or `None` when the cap is reached.
    pub fn suppressed(&mut self, window: &GroupWindow) -> Option<AlertWriteOp> {
        if !self.budget.try_reserve() {
            return None;
        }
        Some(self.suppressed_write(window))
    }

    /// Rebuilds the write for an already budgeted group, e.g. after a conflict refresh.
    pub fn suppressed_write(&self, window: &GroupWindow) -> AlertWriteOp {
        let body = AlertBody::Suppressed {
            terms: window.key.clone(),
            start: window.start,
            end: window.end,
            docs_count: window.docs_count(),
        };

        match &window.base {
            Some(base) => AlertWriteOp {
                mode: WriteMode::Update,
                record: AlertRecord {
                    last_detected: self.cycle_time,
                    body,
                    ..base.clone()
                },
                expected_revision: Some(base.revision),
            },
            None => AlertWriteOp {
                mode: WriteMode::Create,
                record: AlertRecord {
                    id: suppressed_alert_id(&self.rule_id, &window.key, window.start),
                    rule_id: self.rule_id.clone(),
                    instance_id: alert_instance_id(&self.rule_id, &window.key),
                    workflow_status: WorkflowStatus::Open,
                    timestamp: self.cycle_time,
                    original_time: window.first_event_ts,
                    last_detected: self.cycle_time,
                    source_document_id: window.first_document_id.clone(),
                    revision: 0,
                    body,
                },
                expected_revision: None,
            },
        }
    }

    pub fn unsuppressed(&mut self, candidate: &UnsuppressedCandidate) -> Option<AlertWriteOp> {
        if !self.budget.try_reserve() {
            return None;
        }
        Some(AlertWriteOp {
            mode: WriteMode::Create,
            record: AlertRecord {
                id: candidate.alert_id.clone(),
                rule_id: self.rule_id.clone(),
                instance_id: candidate.alert_id.clone(),
                workflow_status: WorkflowStatus::Open,
                timestamp: self.cycle_time,
                original_time: candidate.event_ts,
                last_detected: self.cycle_time,
                source_document_id: candidate.document_id.clone(),
                revision: 0,
                body: AlertBody::Unsuppressed {},
            },
            expected_revision: None,
        })
    }
}

/// Identity of a suppressed alert: rule, group and window start.
pub fn suppressed_alert_id(rule_id: &str, key: &GroupKey, start: DateTime<Utc>) -> String {
    hashed_id(&[
        rule_id.as_bytes(),
        key.canonical().as_bytes(),
        start.to_rfc3339().as_bytes(),
    ])
}

/// Window-independent identity of a group, shared by all its alerts.
pub fn alert_instance_id(rule_id: &str, key: &GroupKey) -> String {
    hashed_id(&[rule_id.as_bytes(), key.canonical().as_bytes()])
}

/// Identity of an unsuppressed alert: rule and source document.
pub fn unsuppressed_alert_id(rule_id: &str, document_id: &str) -> String {
    hashed_id(&[rule_id.as_bytes(), b"unsuppressed", document_id.as_bytes()])
}

/// UUID v5 over the sha256 of length-prefixed parts, so part boundaries
/// cannot shift between different inputs.
fn hashed_id(parts: &[&[u8]]) -> String {
    let mut hasher = sha2::Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    let digest = hasher.finalize();
    Uuid::new_v5(&Uuid::NAMESPACE_URL, &digest[..]).to_string()
}
