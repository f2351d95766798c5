//! Error types for the Alert Suppression Provider

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SuppressionError {
    /// Malformed suppression policy. Fatal for the cycle.
    #[error("Invalid suppression policy: {0}")]
    Validation(String),

    /// The stored alert changed (or was closed) between read and write.
    #[error("Write conflict on alert {alert_id}")]
    WriteConflict { alert_id: String },

    #[error("Redis connection error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Lua script execution error: {0}")]
    LuaScriptExecution(String),

    #[error("Document search failed: {0}")]
    Search(String),

    #[error("NATS connection error: {0}")]
    NatsConnection(String),

    #[error("NATS publish error: {0}")]
    NatsPublish(String),

    #[error("Alert not found: {0}")]
    AlertNotFound(String),
}

impl SuppressionError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SuppressionError::Redis(_)
                | SuppressionError::WriteConflict { .. }
                | SuppressionError::LuaScriptExecution(_)
                | SuppressionError::Search(_)
                | SuppressionError::NatsConnection(_)
                | SuppressionError::NatsPublish(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_not_retryable() {
        assert!(!SuppressionError::Validation("empty group_by".to_string()).is_retryable());
        assert!(!SuppressionError::AlertNotFound("a-1".to_string()).is_retryable());
    }

    #[test]
    fn test_write_conflict_is_retryable() {
        let err = SuppressionError::WriteConflict {
            alert_id: "a-1".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Write conflict on alert a-1");
    }
}
