use super::AlertStore;
use crate::materializer::{alert_instance_id, AlertWriteOp, WriteMode};
use crate::{Result, SuppressionError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use suppression_common::{AlertRecord, GroupKey, WorkflowStatus};
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    alerts: HashMap<String, AlertRecord>,
    /// (rule_id, instance_id) -> id of the most recent suppressed alert
    latest: HashMap<(String, String), String>,
}

/// In-process alert store with the same revision semantics as the Redis store.
#[derive(Clone, Default)]
pub struct MemoryAlertStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All alerts of a rule, ordered by creation time then id.
    pub async fn alerts_for_rule(&self, rule_id: &str) -> Vec<AlertRecord> {
        let guard = self.state.lock().await;
        let mut alerts: Vec<AlertRecord> = guard
            .alerts
            .values()
            .filter(|alert| alert.rule_id == rule_id)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| {
            a.original_time
                .cmp(&b.original_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        alerts
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.alerts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn read_alerts(
        &self,
        rule_id: &str,
        keys: &[GroupKey],
    ) -> Result<HashMap<GroupKey, AlertRecord>> {
        let guard = self.state.lock().await;
        let mut found = HashMap::new();
        for key in keys {
            let index_key = (rule_id.to_string(), alert_instance_id(rule_id, key));
            let Some(alert_id) = guard.latest.get(&index_key) else {
                continue;
            };
            if let Some(alert) = guard.alerts.get(alert_id) {
                found.insert(key.clone(), alert.clone());
            }
        }
        Ok(found)
    }

    async fn existing_alert_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let guard = self.state.lock().await;
        Ok(ids
            .iter()
            .filter(|id| guard.alerts.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn write_alert(&self, op: &AlertWriteOp) -> Result<AlertRecord> {
        let mut guard = self.state.lock().await;
        let mut record = op.record.clone();

        match op.mode {
            WriteMode::Create => {
                if guard.alerts.contains_key(&record.id) {
                    return Err(SuppressionError::WriteConflict {
                        alert_id: record.id,
                    });
                }
                record.revision = 1;
                if record.is_suppressed() {
                    guard.latest.insert(
                        (record.rule_id.clone(), record.instance_id.clone()),
                        record.id.clone(),
                    );
                }
            }
            WriteMode::Update => {
                let current = guard
                    .alerts
                    .get(&record.id)
                    .ok_or_else(|| SuppressionError::AlertNotFound(record.id.clone()))?;
                let expected = op.expected_revision.unwrap_or(record.revision);
                if current.revision != expected || !current.is_open() {
                    return Err(SuppressionError::WriteConflict {
                        alert_id: record.id,
                    });
                }
                record.revision = current.revision + 1;
            }
        }

        guard.alerts.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_alert(&self, alert_id: &str) -> Result<Option<AlertRecord>> {
        Ok(self.state.lock().await.alerts.get(alert_id).cloned())
    }

    async fn set_workflow_status(
        &self,
        alert_id: &str,
        status: WorkflowStatus,
    ) -> Result<AlertRecord> {
        let mut guard = self.state.lock().await;
        let alert = guard
            .alerts
            .get_mut(alert_id)
            .ok_or_else(|| SuppressionError::AlertNotFound(alert_id.to_string()))?;
        alert.workflow_status = status;
        alert.revision += 1;
        Ok(alert.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use suppression_common::{AlertBody, GroupTerm};

    fn key() -> GroupKey {
        GroupKey::new(vec![GroupTerm::present("host.name", "host-0")])
    }

    fn create_op(id: &str) -> AlertWriteOp {
        let ts = Utc.with_ymd_and_hms(2020, 10, 28, 5, 0, 0).unwrap();
        AlertWriteOp {
            mode: WriteMode::Create,
            record: AlertRecord {
                id: id.to_string(),
                rule_id: "rule-1".to_string(),
                instance_id: alert_instance_id("rule-1", &key()),
                workflow_status: WorkflowStatus::Open,
                timestamp: ts,
                original_time: ts,
                last_detected: ts,
                source_document_id: "d1".to_string(),
                revision: 0,
                body: AlertBody::Suppressed {
                    terms: key(),
                    start: ts,
                    end: ts,
                    docs_count: 0,
                },
            },
            expected_revision: None,
        }
    }

    #[tokio::test]
    async fn test_create_indexes_latest_alert() {
        let store = MemoryAlertStore::new();
        let stored = store.write_alert(&create_op("a-1")).await.unwrap();
        assert_eq!(stored.revision, 1);

        let found = store.read_alerts("rule-1", &[key()]).await.unwrap();
        assert_eq!(found.get(&key()).map(|a| a.id.as_str()), Some("a-1"));
        assert!(store.read_alerts("rule-2", &[key()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let store = MemoryAlertStore::new();
        store.write_alert(&create_op("a-1")).await.unwrap();
        let err = store.write_alert(&create_op("a-1")).await.unwrap_err();
        assert!(matches!(err, SuppressionError::WriteConflict { .. }));
    }

    #[tokio::test]
    async fn test_update_checks_revision_and_status() {
        let store = MemoryAlertStore::new();
        let stored = store.write_alert(&create_op("a-1")).await.unwrap();

        let stale = AlertWriteOp {
            mode: WriteMode::Update,
            record: stored.clone(),
            expected_revision: Some(7),
        };
        assert!(matches!(
            store.write_alert(&stale).await,
            Err(SuppressionError::WriteConflict { .. })
        ));

        let fresh = AlertWriteOp {
            expected_revision: Some(1),
            ..stale.clone()
        };
        assert_eq!(store.write_alert(&fresh).await.unwrap().revision, 2);

        store
            .set_workflow_status("a-1", WorkflowStatus::Closed)
            .await
            .unwrap();
        let after_close = AlertWriteOp {
            expected_revision: Some(3),
            ..stale
        };
        assert!(matches!(
            store.write_alert(&after_close).await,
            Err(SuppressionError::WriteConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_without_expected_revision_uses_record_revision() {
        let store = MemoryAlertStore::new();
        let stored = store.write_alert(&create_op("a-1")).await.unwrap();

        let update = AlertWriteOp {
            mode: WriteMode::Update,
            record: stored.clone(),
            expected_revision: None,
        };
        let updated = store.write_alert(&update).await.unwrap();
        assert_eq!(updated.revision, 2);

        // The record still carries revision 1, which is now stale.
        assert!(matches!(
            store.write_alert(&update).await,
            Err(SuppressionError::WriteConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_existing_alert_ids() {
        let store = MemoryAlertStore::new();
        store.write_alert(&create_op("a-1")).await.unwrap();
        let ids = vec!["a-1".to_string(), "a-2".to_string()];
        let existing = store.existing_alert_ids(&ids).await.unwrap();
        assert_eq!(existing, HashSet::from(["a-1".to_string()]));
    }
}
