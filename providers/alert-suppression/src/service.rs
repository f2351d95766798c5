//! Cycle request handling with per-rule serialization.

use crate::coordinator::{CoordinatorSettings, RunCoordinator};
use crate::metrics::SuppressionMetrics;
use crate::nats_client::SummaryPublisher;
use crate::source::InlineDocumentSource;
use crate::store::AlertStore;
use crate::{Result, SuppressionError};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use suppression_common::{
    cycle_request_schema_version_v1, CycleErrorV1, CycleRequestV1, CycleSummaryV1,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct CycleService {
    store: Arc<dyn AlertStore>,
    publisher: Arc<dyn SummaryPublisher>,
    settings: CoordinatorSettings,
    metrics: Option<Arc<SuppressionMetrics>>,
    rule_locks: DashMap<String, Arc<Mutex<()>>>,
    shutdown: CancellationToken,
}

impl CycleService {
    pub fn new(
        store: Arc<dyn AlertStore>,
        publisher: Arc<dyn SummaryPublisher>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            store,
            publisher,
            settings,
            metrics: None,
            rule_locks: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<SuppressionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Cancels in-flight cycles at their next flush checkpoint.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn rule_lock(&self, rule_id: &str) -> Arc<Mutex<()>> {
        self.rule_locks
            .entry(rule_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs the cycle described by `request` and publishes its summary.
    ///
    /// Cycles of the same rule run one at a time; different rules run
    /// concurrently. A cycle that fails before processing still publishes an
    /// aborted summary carrying the error.
    pub async fn handle_request(&self, request: CycleRequestV1) -> Result<CycleSummaryV1> {
        if request.schema_version != cycle_request_schema_version_v1() {
            return Err(SuppressionError::Validation(format!(
                "unsupported cycle request schema {}",
                request.schema_version
            )));
        }

        let rule_id = request.rule.rule_id.clone();
        let lock = self.rule_lock(&rule_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.run_locked(request).await
        };
        drop(lock);
        self.release_rule_lock(&rule_id);
        outcome
    }

    /// Drops the rule's lock entry once no cycle holds or awaits it.
    fn release_rule_lock(&self, rule_id: &str) {
        self.rule_locks
            .remove_if(rule_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn run_locked(&self, request: CycleRequestV1) -> Result<CycleSummaryV1> {
        let rule_id = request.rule.rule_id.clone();
        info!(
            "running cycle {} for rule {} over [{}, {}] with {} documents",
            request.cycle_id,
            rule_id,
            request.time_range.from,
            request.time_range.to,
            request.documents.len()
        );

        let mut coordinator = RunCoordinator::new(
            self.store.clone(),
            Arc::new(InlineDocumentSource::new(request.documents)),
            self.settings.clone(),
        );
        if let Some(metrics) = &self.metrics {
            coordinator = coordinator.with_metrics(metrics.clone());
        }

        let cancel = self.shutdown.child_token();
        let outcome = coordinator
            .run_cycle(&request.rule, request.time_range, &request.cycle_id, &cancel)
            .await;

        let summary = match outcome {
            Ok(summary) => summary,
            Err(e) => {
                warn!("cycle {} for rule {} failed: {}", request.cycle_id, rule_id, e);
                if !e.is_retryable() {
                    let failed = failed_summary(&request.cycle_id, &rule_id, &e);
                    if let Err(publish_err) = self.publisher.publish_summary(&failed).await {
                        warn!("failed to publish failure summary: {}", publish_err);
                    }
                }
                return Err(e);
            }
        };

        self.publisher.publish_summary(&summary).await?;
        Ok(summary)
    }
}

fn failed_summary(cycle_id: &str, rule_id: &str, error: &SuppressionError) -> CycleSummaryV1 {
    let mut summary = CycleSummaryV1::new(cycle_id, rule_id, Utc::now());
    summary.aborted = true;
    summary.errors.push(CycleErrorV1 {
        group: None,
        alert_id: None,
        message: error.to_string(),
    });
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAlertStore;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use serde_json::json;
    use suppression_common::{MatchedDocument, RuleConfigV1, SuppressionPolicyV1, TimeRange};

    #[derive(Clone, Default)]
    struct TestPublisher {
        published: Arc<Mutex<Vec<CycleSummaryV1>>>,
    }

    #[async_trait]
    impl SummaryPublisher for TestPublisher {
        async fn publish_summary(&self, summary: &CycleSummaryV1) -> Result<()> {
            self.published.lock().await.push(summary.clone());
            Ok(())
        }
    }

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 10, 28, h, m, 0).unwrap()
    }

    fn request(rule: RuleConfigV1, docs: Vec<MatchedDocument>) -> CycleRequestV1 {
        CycleRequestV1::new(rule, TimeRange::new(ts(4, 30), ts(5, 30)), docs)
    }

    #[tokio::test]
    async fn test_handle_request_publishes_summary() {
        let store = MemoryAlertStore::new();
        let publisher = TestPublisher::default();
        let service = CycleService::new(
            Arc::new(store.clone()),
            Arc::new(publisher.clone()),
            CoordinatorSettings::default(),
        );

        let rule = RuleConfigV1::new("rule-1", SuppressionPolicyV1::group_by(["host.name"]));
        let docs = vec![
            MatchedDocument::new("d1", ts(5, 0)).with_field("host.name", json!("host-0")),
            MatchedDocument::new("d2", ts(5, 1)).with_field("host.name", json!("host-0")),
        ];

        let summary = service.handle_request(request(rule, docs)).await.unwrap();
        assert_eq!(summary.alerts_created, 1);

        let published = publisher.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0], summary);
    }

    #[tokio::test]
    async fn test_invalid_policy_publishes_aborted_summary() {
        let publisher = TestPublisher::default();
        let service = CycleService::new(
            Arc::new(MemoryAlertStore::new()),
            Arc::new(publisher.clone()),
            CoordinatorSettings::default(),
        );

        let rule = RuleConfigV1::new("rule-1", SuppressionPolicyV1::group_by(Vec::<String>::new()));
        let err = service.handle_request(request(rule, vec![])).await.unwrap_err();
        assert!(matches!(err, SuppressionError::Validation(_)));

        let published = publisher.published.lock().await;
        assert_eq!(published.len(), 1);
        assert!(published[0].aborted);
        assert_eq!(published[0].errors.len(), 1);
    }

    #[tokio::test]
    async fn test_same_rule_cycles_are_serialized() {
        let store = MemoryAlertStore::new();
        let service = Arc::new(CycleService::new(
            Arc::new(store.clone()),
            Arc::new(TestPublisher::default()),
            CoordinatorSettings::default(),
        ));

        // The same document delivered twice concurrently must yield one alert.
        let rule = RuleConfigV1::new("rule-1", SuppressionPolicyV1::group_by(["host.name"]));
        let doc = MatchedDocument::new("d1", ts(5, 0)).with_field("host.name", json!("host-0"));

        let a = {
            let service = service.clone();
            let req = request(rule.clone(), vec![doc.clone()]);
            tokio::spawn(async move { service.handle_request(req).await })
        };
        let b = {
            let service = service.clone();
            let req = request(rule.clone(), vec![doc.clone()]);
            tokio::spawn(async move { service.handle_request(req).await })
        };

        let first = a.await.unwrap().unwrap();
        let second = b.await.unwrap().unwrap();

        assert_eq!(first.alerts_created + second.alerts_created, 1);
        assert_eq!(
            first.skipped_already_attributed + second.skipped_already_attributed,
            1
        );
        assert!(first.errors.is_empty() && second.errors.is_empty());
        assert_eq!(store.alerts_for_rule("rule-1").await.len(), 1);
        assert!(service.rule_locks.is_empty());
    }

    #[tokio::test]
    async fn test_rule_locks_are_released_after_each_cycle() {
        let service = CycleService::new(
            Arc::new(MemoryAlertStore::new()),
            Arc::new(TestPublisher::default()),
            CoordinatorSettings::default(),
        );

        for i in 0..5 {
            let rule = RuleConfigV1::new(
                format!("rule-{}", i),
                SuppressionPolicyV1::group_by(["host.name"]),
            );
            service.handle_request(request(rule, vec![])).await.unwrap();
        }
        // A failing cycle releases its lock too.
        let invalid =
            RuleConfigV1::new("rule-x", SuppressionPolicyV1::group_by(Vec::<String>::new()));
        assert!(service.handle_request(request(invalid, vec![])).await.is_err());

        assert!(service.rule_locks.is_empty());
    }
}
