//! One evaluation cycle of a rule:
//! FETCH_CANDIDATES -> DEDUP_AGAINST_PRIOR_ALERTS -> PER_DOCUMENT -> FLUSH.

use crate::group_key::extract_keys;
use crate::materializer::{
    unsuppressed_alert_id, AlertMaterializer, AlertWriteOp, UnsuppressedCandidate, WriteMode,
};
use crate::metrics::SuppressionMetrics;
use crate::policy::{ValidatedPolicy, WindowBoundary};
use crate::source::{DocumentSource, SearchRequest};
use crate::store::AlertStore;
use crate::window::{Contribution, GroupWindow, WindowTracker};
use crate::{Result, SuppressionEngineConfig, SuppressionError};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use suppression_common::{
    AlertRecord, CycleErrorV1, CycleSummaryV1, GroupKey, MatchedDocument, MissingFieldsStrategy,
    RuleConfigV1, TimeRange,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const MAX_SIGNALS_WARNING: &str =
    "This rule reached the maximum alert limit for the rule execution. Some alerts were not created.";

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub default_max_signals: usize,
    pub window_boundary: WindowBoundary,
    pub conflict_retries: u32,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&SuppressionEngineConfig::default())
    }
}

impl From<&SuppressionEngineConfig> for CoordinatorSettings {
    fn from(config: &SuppressionEngineConfig) -> Self {
        Self {
            default_max_signals: config.default_max_signals,
            window_boundary: config.window_boundary,
            conflict_retries: config.conflict_retries,
        }
    }
}

/// Documents and groups collected during the per-document phase.
struct CycleState {
    tracker: WindowTracker,
    unsuppressed: Vec<UnsuppressedCandidate>,
    skipped: usize,
}

pub struct RunCoordinator {
    store: Arc<dyn AlertStore>,
    source: Arc<dyn DocumentSource>,
    settings: CoordinatorSettings,
    metrics: Option<Arc<SuppressionMetrics>>,
}

impl RunCoordinator {
    pub fn new(
        store: Arc<dyn AlertStore>,
        source: Arc<dyn DocumentSource>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            store,
            source,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<SuppressionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs one cycle. Policy validation, search and store read failures
    /// abort the cycle with an error; per-group write failures are recorded in
    /// the summary and the cycle continues.
    pub async fn run_cycle(
        &self,
        rule: &RuleConfigV1,
        time_range: TimeRange,
        cycle_id: &str,
        cancel: &CancellationToken,
    ) -> Result<CycleSummaryV1> {
        let policy = ValidatedPolicy::from_rule(rule, self.settings.default_max_signals)?;
        let mut summary = CycleSummaryV1::new(cycle_id, &policy.rule_id, Utc::now());

        // FETCH_CANDIDATES
        let request = SearchRequest {
            query: rule.query.clone(),
            time_range,
            timestamp_field: policy.timestamp_field().to_string(),
        };
        let documents = self.source.search(&request).await?;
        summary.candidates = documents.len();
        debug!(
            "cycle {} for rule {}: {} candidate documents",
            cycle_id,
            policy.rule_id,
            documents.len()
        );

        // DEDUP_AGAINST_PRIOR_ALERTS + PER_DOCUMENT
        let state = self.admit_documents(&policy, &documents).await?;
        summary.skipped_already_attributed = state.skipped;

        // MATERIALIZE + FLUSH
        let mut materializer =
            AlertMaterializer::new(&policy.rule_id, time_range.to, policy.max_signals);
        let boundary_tracker = WindowTracker::new(policy.window, self.settings.window_boundary);

        let windows = state.tracker.into_windows();
        let mut pending: Vec<(AlertWriteOp, Option<GroupWindow>)> = Vec::new();
        for window in windows {
            if let Some(op) = materializer.suppressed(&window) {
                pending.push((op, Some(window)));
            }
        }
        for candidate in &state.unsuppressed {
            if let Some(op) = materializer.unsuppressed(candidate) {
                pending.push((op, None));
            }
        }

        summary.dropped_by_cap = materializer.budget().dropped();
        if materializer.budget().exceeded() {
            warn!(
                "rule {} reached max_signals={} in cycle {}; {} alerts not created",
                policy.rule_id,
                policy.max_signals,
                cycle_id,
                summary.dropped_by_cap
            );
            summary.warnings.push(MAX_SIGNALS_WARNING.to_string());
        } else if materializer.budget().remaining() == 0 {
            // Cap met exactly: nothing dropped, log only.
            warn!(
                "rule {} reached max_signals={} in cycle {} without dropping alerts",
                policy.rule_id, policy.max_signals, cycle_id
            );
        }

        for (op, window) in pending {
            if cancel.is_cancelled() {
                warn!("cycle {} cancelled before flush completed", cycle_id);
                summary.aborted = true;
                break;
            }

            match window {
                Some(window) => {
                    self.flush_suppressed(
                        &policy,
                        &materializer,
                        &boundary_tracker,
                        op,
                        window,
                        &mut summary,
                    )
                    .await
                }
                None => self.flush_unsuppressed(op, &mut summary).await,
            }
        }

        summary.finished_at = Utc::now();
        info!(
            "cycle {} for rule {} done: created={} updated={} unsuppressed={} skipped={} dropped={} errors={}",
            cycle_id,
            policy.rule_id,
            summary.alerts_created,
            summary.alerts_updated,
            summary.unsuppressed_created,
            summary.skipped_already_attributed,
            summary.dropped_by_cap,
            summary.errors.len()
        );

        if let Some(metrics) = &self.metrics {
            metrics.record_cycle(&summary);
        }

        Ok(summary)
    }

    async fn admit_documents(
        &self,
        policy: &ValidatedPolicy,
        documents: &[MatchedDocument],
    ) -> Result<CycleState> {
        let timestamp_override = policy.timestamp_override.as_deref();
        let keyed: Vec<Vec<GroupKey>> = documents
            .iter()
            .map(|doc| extract_keys(doc, &policy.group_by))
            .collect();

        let is_unsuppressed = |keys: &[GroupKey]| {
            policy.strategy == MissingFieldsStrategy::DoNotSuppress
                && keys.iter().any(GroupKey::has_missing)
        };

        let mut distinct_keys = Vec::new();
        let mut seen_keys = HashSet::new();
        let mut unsuppressed_ids = Vec::new();
        for (doc, keys) in documents.iter().zip(&keyed) {
            if is_unsuppressed(keys.as_slice()) {
                unsuppressed_ids.push(unsuppressed_alert_id(&policy.rule_id, &doc.id));
                continue;
            }
            for key in keys {
                if seen_keys.insert(key.clone()) {
                    distinct_keys.push(key.clone());
                }
            }
        }

        let prior: HashMap<GroupKey, AlertRecord> = if distinct_keys.is_empty() {
            HashMap::new()
        } else {
            self.store.read_alerts(&policy.rule_id, &distinct_keys).await?
        };
        let existing_unsuppressed = if unsuppressed_ids.is_empty() {
            HashSet::new()
        } else {
            self.store.existing_alert_ids(&unsuppressed_ids).await?
        };

        let mut state = CycleState {
            tracker: WindowTracker::new(policy.window, self.settings.window_boundary),
            unsuppressed: Vec::new(),
            skipped: 0,
        };
        let mut emitted = HashSet::new();

        for (doc, keys) in documents.iter().zip(keyed) {
            let suppression_ts = doc.suppression_timestamp(timestamp_override);

            if is_unsuppressed(keys.as_slice()) {
                let alert_id = unsuppressed_alert_id(&policy.rule_id, &doc.id);
                if existing_unsuppressed.contains(&alert_id) {
                    state.skipped += 1;
                } else if emitted.insert(alert_id.clone()) {
                    state.unsuppressed.push(UnsuppressedCandidate {
                        alert_id,
                        document_id: doc.id.clone(),
                        event_ts: doc.timestamp,
                    });
                }
                continue;
            }

            for key in keys {
                let existing = prior.get(&key);
                let already_attributed = existing
                    .and_then(AlertRecord::suppression_end)
                    .map_or(false, |end| end >= suppression_ts);
                if already_attributed {
                    state.skipped += 1;
                    continue;
                }

                state.tracker.admit(
                    &key,
                    Contribution {
                        document_id: &doc.id,
                        suppression_ts,
                        event_ts: doc.timestamp,
                    },
                    existing,
                );
            }
        }

        Ok(state)
    }

    async fn flush_suppressed(
        &self,
        policy: &ValidatedPolicy,
        materializer: &AlertMaterializer,
        tracker: &WindowTracker,
        mut op: AlertWriteOp,
        mut window: GroupWindow,
        summary: &mut CycleSummaryV1,
    ) {
        let mut attempt = 0;
        loop {
            match self.store.write_alert(&op).await {
                Ok(stored) => {
                    let prior_count = window
                        .base
                        .as_ref()
                        .and_then(AlertRecord::docs_count)
                        .unwrap_or(0);
                    summary.suppressed_docs +=
                        stored.docs_count().unwrap_or(0).saturating_sub(prior_count);
                    match op.mode {
                        WriteMode::Create => summary.alerts_created += 1,
                        WriteMode::Update => summary.alerts_updated += 1,
                    }
                    debug!("wrote alert {} for group {}", stored.id, window.key);
                    return;
                }
                Err(SuppressionError::WriteConflict { alert_id })
                    if attempt < self.settings.conflict_retries =>
                {
                    attempt += 1;
                    debug!(
                        "write conflict on alert {} (attempt {}), refreshing group {}",
                        alert_id, attempt, window.key
                    );
                    let refreshed = match self
                        .store
                        .read_alerts(&policy.rule_id, std::slice::from_ref(&window.key))
                        .await
                    {
                        Ok(refreshed) => refreshed,
                        Err(e) => {
                            record_error(summary, Some(&window.key), Some(&alert_id), &e);
                            return;
                        }
                    };
                    window = tracker.rebase(&window, refreshed.get(&window.key));
                    op = materializer.suppressed_write(&window);
                }
                Err(e) => {
                    record_error(summary, Some(&window.key), Some(op.alert_id()), &e);
                    return;
                }
            }
        }
    }

    async fn flush_unsuppressed(&self, op: AlertWriteOp, summary: &mut CycleSummaryV1) {
        match self.store.write_alert(&op).await {
            Ok(_) => summary.unsuppressed_created += 1,
            // Another writer already emitted this document's alert.
            Err(SuppressionError::WriteConflict { .. }) => summary.skipped_already_attributed += 1,
            Err(e) => record_error(summary, None, Some(op.alert_id()), &e),
        }
    }
}

fn record_error(
    summary: &mut CycleSummaryV1,
    group: Option<&GroupKey>,
    alert_id: Option<&str>,
    error: &SuppressionError,
) {
    warn!(
        "alert write failed for rule {} (group={:?}, alert={:?}): {}",
        summary.rule_id,
        group.map(GroupKey::canonical),
        alert_id,
        error
    );
    summary.errors.push(CycleErrorV1 {
        group: group.map(GroupKey::canonical),
        alert_id: alert_id.map(str::to_string),
        message: error.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InlineDocumentSource;
    use crate::store::MemoryAlertStore;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use serde_json::json;
    use suppression_common::{SuppressionPolicyV1, WorkflowStatus};
    use tokio::sync::Mutex;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 10, 28, h, m, s).unwrap()
    }

    fn host_doc(id: &str, host: &str, at: DateTime<Utc>) -> MatchedDocument {
        MatchedDocument::new(id, at).with_field("host.name", json!(host))
    }

    fn coordinator(store: Arc<dyn AlertStore>, docs: Vec<MatchedDocument>) -> RunCoordinator {
        RunCoordinator::new(
            store,
            Arc::new(InlineDocumentSource::new(docs)),
            CoordinatorSettings::default(),
        )
    }

    /// Store whose updates conflict a fixed number of times.
    struct ConflictingStore {
        inner: MemoryAlertStore,
        conflicts_left: Mutex<u32>,
    }

    #[async_trait]
    impl AlertStore for ConflictingStore {
        async fn read_alerts(
            &self,
            rule_id: &str,
            keys: &[GroupKey],
        ) -> Result<HashMap<GroupKey, AlertRecord>> {
            self.inner.read_alerts(rule_id, keys).await
        }

        async fn existing_alert_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
            self.inner.existing_alert_ids(ids).await
        }

        async fn write_alert(&self, op: &AlertWriteOp) -> Result<AlertRecord> {
            let mut left = self.conflicts_left.lock().await;
            if op.mode == WriteMode::Update && *left > 0 {
                *left -= 1;
                return Err(SuppressionError::WriteConflict {
                    alert_id: op.record.id.clone(),
                });
            }
            drop(left);
            self.inner.write_alert(op).await
        }

        async fn get_alert(&self, alert_id: &str) -> Result<Option<AlertRecord>> {
            self.inner.get_alert(alert_id).await
        }

        async fn set_workflow_status(
            &self,
            alert_id: &str,
            status: WorkflowStatus,
        ) -> Result<AlertRecord> {
            self.inner.set_workflow_status(alert_id, status).await
        }
    }

    #[tokio::test]
    async fn test_three_docs_collapse_into_one_alert() {
        let store = MemoryAlertStore::new();
        let docs = vec![
            host_doc("d1", "host-0", ts(5, 0, 0)),
            host_doc("d2", "host-0", ts(5, 0, 1)),
            host_doc("d3", "host-0", ts(5, 0, 2)),
        ];
        let rule = RuleConfigV1::new("rule-1", SuppressionPolicyV1::group_by(["host.name"]));

        let summary = coordinator(Arc::new(store.clone()), docs)
            .run_cycle(
                &rule,
                TimeRange::new(ts(4, 30, 0), ts(5, 30, 0)),
                "c-1",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.alerts_created, 1);
        assert_eq!(summary.suppressed_docs, 2);
        let alerts = store.alerts_for_rule("rule-1").await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].docs_count(), Some(2));
    }

    #[tokio::test]
    async fn test_invalid_policy_aborts_before_processing() {
        let store = MemoryAlertStore::new();
        let rule = RuleConfigV1::new(
            "rule-1",
            SuppressionPolicyV1::group_by(["host.name"]).with_duration(5, "w"),
        );

        let err = coordinator(Arc::new(store.clone()), vec![host_doc("d1", "host-0", ts(5, 0, 0))])
            .run_cycle(
                &rule,
                TimeRange::new(ts(4, 30, 0), ts(5, 30, 0)),
                "c-1",
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SuppressionError::Validation(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_writes_nothing_and_reports_aborted() {
        let store = MemoryAlertStore::new();
        let rule = RuleConfigV1::new("rule-1", SuppressionPolicyV1::group_by(["host.name"]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = coordinator(Arc::new(store.clone()), vec![host_doc("d1", "host-0", ts(5, 0, 0))])
            .run_cycle(&rule, TimeRange::new(ts(4, 30, 0), ts(5, 30, 0)), "c-1", &cancel)
            .await
            .unwrap();

        assert!(summary.aborted);
        assert_eq!(summary.alerts_created, 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_write_conflict_is_retried_with_refreshed_state() {
        let inner = MemoryAlertStore::new();
        let rule = RuleConfigV1::new(
            "rule-1",
            SuppressionPolicyV1::group_by(["host.name"]).with_duration(2, "h"),
        );
        coordinator(Arc::new(inner.clone()), vec![host_doc("d1", "host-0", ts(5, 0, 0))])
            .run_cycle(&rule, TimeRange::new(ts(4, 30, 0), ts(5, 30, 0)), "c-1", &CancellationToken::new())
            .await
            .unwrap();

        let store = Arc::new(ConflictingStore {
            inner: inner.clone(),
            conflicts_left: Mutex::new(1),
        });
        let summary = coordinator(store, vec![host_doc("d2", "host-0", ts(6, 0, 0))])
            .run_cycle(&rule, TimeRange::new(ts(5, 30, 0), ts(6, 30, 0)), "c-2", &CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.errors.is_empty());
        assert_eq!(summary.alerts_updated, 1);
        let alerts = inner.alerts_for_rule("rule-1").await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].docs_count(), Some(1));
    }

    #[tokio::test]
    async fn test_persistent_conflict_becomes_group_error() {
        let inner = MemoryAlertStore::new();
        let rule = RuleConfigV1::new(
            "rule-1",
            SuppressionPolicyV1::group_by(["host.name"]).with_duration(2, "h"),
        );
        coordinator(
            Arc::new(inner.clone()),
            vec![
                host_doc("d1", "host-0", ts(5, 0, 0)),
                host_doc("d2", "host-1", ts(5, 0, 0)),
            ],
        )
        .run_cycle(&rule, TimeRange::new(ts(4, 30, 0), ts(5, 30, 0)), "c-1", &CancellationToken::new())
        .await
        .unwrap();

        let store = Arc::new(ConflictingStore {
            inner: inner.clone(),
            conflicts_left: Mutex::new(2),
        });
        let summary = coordinator(
            store,
            vec![
                host_doc("d3", "host-0", ts(6, 0, 0)),
                host_doc("d4", "host-1", ts(6, 0, 0)),
            ],
        )
        .run_cycle(&rule, TimeRange::new(ts(5, 30, 0), ts(6, 30, 0)), "c-2", &CancellationToken::new())
        .await
        .unwrap();

        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].group.as_deref(), Some("host.name=\"host-0\""));
        assert_eq!(summary.alerts_updated, 1);
    }
}
