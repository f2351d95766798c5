//! Alert Suppression Provider
//!
//! Folds the documents matched by one rule evaluation cycle into suppressed
//! alerts keyed by the rule's group-by values, extending still-open alerts
//! whose window covers the new documents and skipping documents already
//! attributed to an alert.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod group_key;
pub mod materializer;
pub mod metrics;
pub mod nats_client;
pub mod policy;
pub mod provider;
pub mod redis_ops;
pub mod service;
pub mod source;
pub mod store;
pub mod window;

pub use config::SuppressionEngineConfig;
pub use coordinator::{CoordinatorSettings, RunCoordinator, MAX_SIGNALS_WARNING};
pub use error::SuppressionError;
pub use materializer::{AlertMaterializer, AlertWriteOp, WriteMode};
pub use metrics::SuppressionMetrics;
pub use nats_client::{NatsClient, SummaryPublisher};
pub use policy::{ValidatedPolicy, WindowBoundary};
pub use provider::AlertSuppressionProvider;
pub use redis_ops::RedisManager;
pub use service::CycleService;
pub use source::{DocumentSource, InlineDocumentSource, SearchRequest};
pub use store::{AlertStore, MemoryAlertStore, RedisAlertStore};
pub use window::WindowTracker;

// Re-export Result type for convenience
pub type Result<T> = std::result::Result<T, SuppressionError>;
