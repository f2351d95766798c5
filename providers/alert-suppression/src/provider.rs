use crate::coordinator::CoordinatorSettings;
use crate::metrics::SuppressionMetrics;
use crate::service::CycleService;
use crate::store::RedisAlertStore;
use crate::{NatsClient, RedisManager, Result, SuppressionEngineConfig, SuppressionError};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use suppression_common::CycleRequestV1;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wasmcloud_provider_sdk::Provider;

/// Alert Suppression Provider (wasmCloud capability provider)
pub struct AlertSuppressionProvider {
    config: SuppressionEngineConfig,
    redis: Arc<RedisManager>,
    nats: Arc<NatsClient>,
    service: Arc<CycleService>,
    metrics: Arc<SuppressionMetrics>,
    consumer_task: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl AlertSuppressionProvider {
    pub async fn from_host_data(host_data: wasmcloud_provider_sdk::HostData) -> Result<Self> {
        let config = if !host_data.config.is_empty() {
            SuppressionEngineConfig::from_properties(&host_data.config)
                .map_err(|e| SuppressionError::Configuration(format!("Config error: {}", e)))?
        } else {
            SuppressionEngineConfig::from_env().unwrap_or_default()
        };

        Self::new(config).await
    }

    pub async fn new(config: SuppressionEngineConfig) -> Result<Self> {
        info!("Initializing Alert Suppression Provider");

        let redis = Arc::new(RedisManager::new(&config).await?);
        let nats =
            Arc::new(NatsClient::new(&config.nats_url, config.nats_stream_name.clone()).await?);
        let store = Arc::new(RedisAlertStore::new(redis.clone(), config.key_prefix.clone()));
        let metrics = Arc::new(SuppressionMetrics::new()?);

        let service = Arc::new(
            CycleService::new(store, nats.clone(), CoordinatorSettings::from(&config))
                .with_metrics(metrics.clone()),
        );

        let provider = Self {
            config,
            redis,
            nats,
            service,
            metrics,
            consumer_task: Arc::new(RwLock::new(None)),
        };

        provider.start_cycle_consumer().await?;

        Ok(provider)
    }

    pub fn config(&self) -> &SuppressionEngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<SuppressionMetrics> {
        self.metrics.clone()
    }

    pub fn redis(&self) -> Arc<RedisManager> {
        self.redis.clone()
    }

    async fn start_cycle_consumer(&self) -> Result<()> {
        let mut subscriber = self.nats.subscribe_to_cycle_requests().await?;
        let service = self.service.clone();

        let handle = tokio::spawn(async move {
            while let Some(msg_result) = subscriber.next().await {
                let msg = match msg_result {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("Failed to receive cycle message: {}", e);
                        continue;
                    }
                };

                let subject = msg.subject.as_str().to_string();
                let result = match serde_json::from_slice::<CycleRequestV1>(&msg.payload) {
                    Ok(request) => service.handle_request(request).await.map(|_| ()),
                    Err(e) => Err(SuppressionError::Serialization(e)),
                };

                match result {
                    Ok(()) => {
                        if let Err(e) = msg.ack().await {
                            warn!("Failed to ack cycle message: {}", e);
                        }
                    }
                    Err(e) if e.is_retryable() => {
                        warn!("Cycle {} failed, requesting redelivery: {}", subject, e);
                        if let Err(nak) = msg
                            .ack_with(async_nats::jetstream::AckKind::Nak(None))
                            .await
                        {
                            warn!("Failed to NAK cycle message: {}", nak);
                        }
                    }
                    Err(e) => {
                        // Redelivery cannot fix a malformed request or policy.
                        warn!("Dropping cycle message {}: {}", subject, e);
                        if let Err(e) = msg.ack_with(async_nats::jetstream::AckKind::Term).await {
                            warn!("Failed to terminate cycle message: {}", e);
                        }
                    }
                }
            }
        });

        *self.consumer_task.write().await = Some(handle);
        Ok(())
    }

    /// Token that cancels in-flight cycles at their next flush checkpoint.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.service.shutdown_token()
    }
}

// Provider trait implementation for wasmCloud SDK v0.16 (default impls)
#[async_trait]
impl Provider for AlertSuppressionProvider {}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmcloud_provider_sdk::Provider;

    #[test]
    fn test_provider_traits() {
        fn assert_provider<T: Provider>() {}
        assert_provider::<AlertSuppressionProvider>();
    }
}
