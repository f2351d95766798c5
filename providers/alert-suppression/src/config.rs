//! Configuration for the Alert Suppression Provider

use crate::policy::WindowBoundary;
use serde::{Deserialize, Serialize};

/// Configuration for the Alert Suppression Provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuppressionEngineConfig {
    /// Redis connection URL (alert store)
    pub redis_url: String,

    /// NATS connection URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// NATS JetStream stream name for cycle requests
    #[serde(default = "default_stream_name")]
    pub nats_stream_name: String,

    /// Prefix for every alert store key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Cap applied when a rule does not set `max_signals`
    #[serde(default = "default_max_signals")]
    pub default_max_signals: usize,

    /// Whether a document exactly `duration` past the alert end still extends it
    #[serde(default)]
    pub window_boundary: WindowBoundary,

    /// Retries with refreshed state after a write conflict
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,

    /// Redis connection pool size
    #[serde(default = "default_pool_size")]
    pub redis_pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,

    /// Number of retry attempts for transient Redis failures
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay between retries in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl SuppressionEngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Load configuration from wasmCloud properties HashMap
    ///
    /// Preferred when running as a wasmCloud provider; the properties come
    /// from HostData.config in the WADM manifest.
    pub fn from_properties(
        props: &std::collections::HashMap<String, String>,
    ) -> Result<Self, String> {
        let redis_url = props
            .get("redis_url")
            .cloned()
            .ok_or_else(|| "redis_url is required".to_string())?;

        let nats_url = props
            .get("nats_url")
            .cloned()
            .unwrap_or_else(default_nats_url);

        let nats_stream_name = props
            .get("nats_stream_name")
            .cloned()
            .unwrap_or_else(default_stream_name);

        let key_prefix = props
            .get("key_prefix")
            .cloned()
            .unwrap_or_else(default_key_prefix);

        let default_max_signals = props
            .get("default_max_signals")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_max_signals);

        let window_boundary = match props.get("window_boundary").map(String::as_str) {
            None => WindowBoundary::default(),
            Some("inclusive") => WindowBoundary::Inclusive,
            Some("exclusive") => WindowBoundary::Exclusive,
            Some(other) => return Err(format!("unknown window_boundary: {}", other)),
        };

        let conflict_retries = props
            .get("conflict_retries")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_conflict_retries);

        let redis_pool_size = props
            .get("redis_pool_size")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_pool_size);

        let connection_timeout_ms = props
            .get("connection_timeout_ms")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_connection_timeout);

        let retry_attempts = props
            .get("retry_attempts")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_retry_attempts);

        let retry_delay_ms = props
            .get("retry_delay_ms")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_retry_delay);

        Ok(Self {
            redis_url,
            nats_url,
            nats_stream_name,
            key_prefix,
            default_max_signals,
            window_boundary,
            conflict_retries,
            redis_pool_size,
            connection_timeout_ms,
            retry_attempts,
            retry_delay_ms,
        })
    }
}

impl Default for SuppressionEngineConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            nats_url: default_nats_url(),
            nats_stream_name: default_stream_name(),
            key_prefix: default_key_prefix(),
            default_max_signals: default_max_signals(),
            window_boundary: WindowBoundary::default(),
            conflict_retries: default_conflict_retries(),
            redis_pool_size: default_pool_size(),
            connection_timeout_ms: default_connection_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_stream_name() -> String {
    "ALERT_SUPPRESSION_CYCLES".to_string()
}

fn default_key_prefix() -> String {
    "suppression".to_string()
}

fn default_max_signals() -> usize {
    100
}

fn default_conflict_retries() -> u32 {
    1
}

fn default_pool_size() -> usize {
    10
}

fn default_connection_timeout() -> u64 {
    5000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    100
}
