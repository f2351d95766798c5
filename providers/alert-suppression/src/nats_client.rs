use crate::{Result, SuppressionError};
use async_nats::jetstream;
use async_nats::Client;
use async_trait::async_trait;
use suppression_common::{cycle_summary_subject, CycleSummaryV1};
use tracing::{debug, info, warn};

const CYCLE_REQUEST_SUBJECTS: &str = "alerts.suppression.cycle.>";
const CONSUMER_NAME: &str = "alert-suppression-provider";

#[async_trait]
pub trait SummaryPublisher: Send + Sync {
    async fn publish_summary(&self, summary: &CycleSummaryV1) -> Result<()>;
}

/// NATS JetStream client for the suppression engine.
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    jetstream: jetstream::Context,
    stream_name: String,
}

impl NatsClient {
    pub async fn new(nats_url: &str, stream_name: String) -> Result<Self> {
        info!("Connecting to NATS at {}", nats_url);

        let client = async_nats::connect(nats_url).await.map_err(|e| {
            SuppressionError::NatsConnection(format!("Failed to connect to NATS: {}", e))
        })?;

        let jetstream = jetstream::new(client.clone());
        Self::ensure_cycles_stream(&jetstream, &stream_name).await?;

        Ok(Self {
            client,
            jetstream,
            stream_name,
        })
    }

    async fn ensure_cycles_stream(js: &jetstream::Context, stream_name: &str) -> Result<()> {
        let stream_config = jetstream::stream::Config {
            name: stream_name.to_string(),
            description: Some("Alert suppression cycle requests".to_string()),
            subjects: vec![CYCLE_REQUEST_SUBJECTS.to_string()],
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            storage: jetstream::stream::StorageType::File,
            max_messages: 500_000,
            max_bytes: 5_368_709_120,
            max_age: std::time::Duration::from_secs(86400),
            max_message_size: 8_388_608,
            duplicate_window: std::time::Duration::from_secs(300),
            allow_rollup: false,
            deny_delete: false,
            deny_purge: false,
            ..Default::default()
        };

        match js.get_stream(stream_name).await {
            Ok(_) => {
                debug!("Cycle stream {} already exists", stream_name);
            }
            Err(_) => {
                info!("Creating cycle stream: {}", stream_name);
                js.create_stream(stream_config).await.map_err(|e| {
                    SuppressionError::Configuration(format!(
                        "Failed to create stream {}: {}",
                        stream_name, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    pub async fn subscribe_to_cycle_requests(&self) -> Result<jetstream::consumer::pull::Stream> {
        info!("Setting up subscription for suppression cycle requests");

        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| {
                SuppressionError::NatsConnection(format!("Failed to get stream: {}", e))
            })?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(CONSUMER_NAME.to_string()),
            description: Some("Alert suppression consumer for cycle requests".to_string()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            // Large cycles can take a while to flush.
            ack_wait: std::time::Duration::from_secs(120),
            max_deliver: 5,
            filter_subject: CYCLE_REQUEST_SUBJECTS.to_string(),
            replay_policy: jetstream::consumer::ReplayPolicy::Instant,
            ..Default::default()
        };

        let consumer = create_or_get_consumer(
            || stream.create_consumer(consumer_config),
            || stream.get_consumer(CONSUMER_NAME),
        )
        .await?;

        let messages = consumer.messages().await.map_err(|e| {
            SuppressionError::NatsConnection(format!("Failed to create message stream: {}", e))
        })?;

        Ok(messages)
    }

    /// Summaries are informational and go out on core NATS, not the work-queue stream.
    pub async fn publish_summary(&self, summary: &CycleSummaryV1) -> Result<()> {
        let subject = cycle_summary_subject(&summary.rule_id);
        let bytes = serde_json::to_vec(summary)?;

        let mut headers = async_nats::HeaderMap::new();
        headers.insert("cycle-id", summary.cycle_id.as_str());
        headers.insert("rule-id", summary.rule_id.as_str());

        self.client
            .publish_with_headers(subject, headers, bytes.into())
            .await
            .map_err(|e| {
                SuppressionError::NatsPublish(format!(
                    "Failed to publish summary for cycle {}: {}",
                    summary.cycle_id, e
                ))
            })?;

        if !summary.errors.is_empty() {
            warn!(
                "cycle {} summary published with {} errors",
                summary.cycle_id,
                summary.errors.len()
            );
        }
        Ok(())
    }
}

async fn create_or_get_consumer<T, CreateErr, GetErr, CreateFut, GetFut, CreateFn, GetFn>(
    create: CreateFn,
    get: GetFn,
) -> Result<T>
where
    CreateFn: FnOnce() -> CreateFut,
    GetFn: FnOnce() -> GetFut,
    CreateFut: std::future::Future<Output = std::result::Result<T, CreateErr>>,
    GetFut: std::future::Future<Output = std::result::Result<T, GetErr>>,
    CreateErr: std::fmt::Display,
    GetErr: std::fmt::Display,
{
    match create().await {
        Ok(consumer) => Ok(consumer),
        Err(create_err) => match get().await {
            Ok(consumer) => Ok(consumer),
            Err(get_err) => Err(SuppressionError::Configuration(format!(
                "Failed to create consumer: {create_err}; failed to get existing consumer: {get_err}"
            ))),
        },
    }
}

#[async_trait]
impl SummaryPublisher for NatsClient {
    async fn publish_summary(&self, summary: &CycleSummaryV1) -> Result<()> {
        NatsClient::publish_summary(self, summary).await
    }
}
