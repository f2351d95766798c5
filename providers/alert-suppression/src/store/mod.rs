//! Alert store interface and implementations.

mod memory;
mod redis;

pub use self::memory::MemoryAlertStore;
pub use self::redis::RedisAlertStore;

use crate::materializer::AlertWriteOp;
use crate::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use suppression_common::{AlertRecord, GroupKey, WorkflowStatus};

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Most recent alert per group key, whatever its workflow status.
    async fn read_alerts(
        &self,
        rule_id: &str,
        keys: &[GroupKey],
    ) -> Result<HashMap<GroupKey, AlertRecord>>;

    /// Subset of `ids` already present in the store.
    async fn existing_alert_ids(&self, ids: &[String]) -> Result<HashSet<String>>;

    /// Applies a create or update. Fails with `WriteConflict` when a create
    /// finds the id taken, or an update finds a different revision or a
    /// closed alert. Returns the stored record with its new revision.
    async fn write_alert(&self, op: &AlertWriteOp) -> Result<AlertRecord>;

    async fn get_alert(&self, alert_id: &str) -> Result<Option<AlertRecord>>;

    /// Triage transition. Closed alerts are never extended by later cycles.
    async fn set_workflow_status(
        &self,
        alert_id: &str,
        status: WorkflowStatus,
    ) -> Result<AlertRecord>;
}
