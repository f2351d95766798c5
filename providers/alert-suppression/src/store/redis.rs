use super::AlertStore;
use crate::materializer::{alert_instance_id, AlertWriteOp, WriteMode};
use crate::{RedisManager, Result, SuppressionError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use suppression_common::{AlertRecord, GroupKey, WorkflowStatus};
use tracing::debug;

// KEYS[1] = alert key, KEYS[2] = latest-per-group key (optional)
// ARGV[1] = record JSON, ARGV[2] = alert id
const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('SET', KEYS[1], ARGV[1])
if KEYS[2] then
  redis.call('SET', KEYS[2], ARGV[2])
end
return 1
"#;

// KEYS[1] = alert key
// ARGV[1] = expected revision, ARGV[2] = record JSON, ARGV[3] = '1' when the alert must be open
const COMPARE_AND_SET_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return -1
end
local decoded = cjson.decode(current)
if tonumber(decoded['_revision']) ~= tonumber(ARGV[1]) then
  return 0
end
if ARGV[3] == '1' and decoded['kibana.alert.workflow_status'] ~= 'open' then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

/// Redis-backed alert store.
///
/// Layout:
/// - `{prefix}:alert:{alert_id}` holds the alert JSON (with `_revision`)
/// - `{prefix}:latest:{rule_id}:{instance_id}` holds the id of the group's most recent alert
pub struct RedisAlertStore {
    redis: Arc<RedisManager>,
    key_prefix: String,
    create_script: redis::Script,
    cas_script: redis::Script,
}

impl RedisAlertStore {
    pub fn new(redis: Arc<RedisManager>, key_prefix: impl Into<String>) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.into(),
            create_script: redis::Script::new(CREATE_SCRIPT),
            cas_script: redis::Script::new(COMPARE_AND_SET_SCRIPT),
        }
    }

    fn alert_key(&self, alert_id: &str) -> String {
        format!("{}:alert:{}", self.key_prefix, alert_id)
    }

    fn latest_key(&self, rule_id: &str, instance_id: &str) -> String {
        format!("{}:latest:{}:{}", self.key_prefix, rule_id, instance_id)
    }

    async fn mget(&self, keys: Vec<String>) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.redis
            .execute_with_retry(|mut conn| {
                let keys = keys.clone();
                async move {
                    redis::cmd("MGET")
                        .arg(&keys)
                        .query_async::<_, Vec<Option<String>>>(&mut conn)
                        .await
                }
            })
            .await
    }

    async fn create(&self, record: &AlertRecord) -> Result<AlertRecord> {
        let mut stored = record.clone();
        stored.revision = 1;
        let payload = serde_json::to_string(&stored)?;

        let mut invocation = self.create_script.prepare_invoke();
        invocation.key(self.alert_key(&stored.id));
        if stored.is_suppressed() {
            invocation.key(self.latest_key(&stored.rule_id, &stored.instance_id));
        }
        invocation.arg(&payload).arg(&stored.id);

        let mut conn = self.redis.get_connection().await?;
        let created: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| SuppressionError::LuaScriptExecution(e.to_string()))?;

        if created == 1 {
            Ok(stored)
        } else {
            Err(SuppressionError::WriteConflict {
                alert_id: stored.id,
            })
        }
    }

    async fn compare_and_set(
        &self,
        record: &AlertRecord,
        expected_revision: u64,
        require_open: bool,
    ) -> Result<AlertRecord> {
        let mut stored = record.clone();
        stored.revision = expected_revision + 1;
        let payload = serde_json::to_string(&stored)?;

        let mut conn = self.redis.get_connection().await?;
        let outcome: i64 = self
            .cas_script
            .key(self.alert_key(&stored.id))
            .arg(expected_revision)
            .arg(&payload)
            .arg(if require_open { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await
            .map_err(|e| SuppressionError::LuaScriptExecution(e.to_string()))?;

        match outcome {
            1 => Ok(stored),
            0 => Err(SuppressionError::WriteConflict {
                alert_id: stored.id,
            }),
            _ => Err(SuppressionError::AlertNotFound(stored.id)),
        }
    }
}

#[async_trait]
impl AlertStore for RedisAlertStore {
    async fn read_alerts(
        &self,
        rule_id: &str,
        keys: &[GroupKey],
    ) -> Result<HashMap<GroupKey, AlertRecord>> {
        let latest_keys = keys
            .iter()
            .map(|key| self.latest_key(rule_id, &alert_instance_id(rule_id, key)))
            .collect();
        let latest_ids = self.mget(latest_keys).await?;

        let mut wanted = Vec::new();
        let mut alert_keys = Vec::new();
        for (key, alert_id) in keys.iter().zip(latest_ids) {
            if let Some(alert_id) = alert_id {
                alert_keys.push(self.alert_key(&alert_id));
                wanted.push(key.clone());
            }
        }

        let raw_alerts = self.mget(alert_keys).await?;
        let mut found = HashMap::with_capacity(wanted.len());
        for (key, raw) in wanted.into_iter().zip(raw_alerts) {
            let Some(raw) = raw else {
                continue;
            };
            let alert: AlertRecord = serde_json::from_str(&raw)?;
            found.insert(key, alert);
        }

        debug!(
            "read {} prior alerts for rule {} ({} keys)",
            found.len(),
            rule_id,
            keys.len()
        );
        Ok(found)
    }

    async fn existing_alert_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| self.alert_key(id)).collect();
        let flags: Vec<bool> = self
            .redis
            .execute_with_retry(|mut conn| {
                let keys = keys.clone();
                async move {
                    let mut pipe = redis::pipe();
                    for key in &keys {
                        pipe.exists(key);
                    }
                    pipe.query_async::<_, Vec<bool>>(&mut conn).await
                }
            })
            .await?;

        Ok(ids
            .iter()
            .zip(flags)
            .filter(|(_, exists)| *exists)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn write_alert(&self, op: &AlertWriteOp) -> Result<AlertRecord> {
        match op.mode {
            WriteMode::Create => self.create(&op.record).await,
            WriteMode::Update => {
                let expected = op.expected_revision.unwrap_or(op.record.revision);
                self.compare_and_set(&op.record, expected, true).await
            }
        }
    }

    async fn get_alert(&self, alert_id: &str) -> Result<Option<AlertRecord>> {
        let raw = self.mget(vec![self.alert_key(alert_id)]).await?;
        match raw.into_iter().next().flatten() {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_workflow_status(
        &self,
        alert_id: &str,
        status: WorkflowStatus,
    ) -> Result<AlertRecord> {
        let mut alert = self
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| SuppressionError::AlertNotFound(alert_id.to_string()))?;
        let expected = alert.revision;
        alert.workflow_status = status;
        self.compare_and_set(&alert, expected, false).await
    }
}
