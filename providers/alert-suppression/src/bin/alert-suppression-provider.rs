//! # Alert Suppression wasmCloud Provider Binary
//!
//! Entry point for the Alert Suppression capability provider.
//! Consumes cycle requests from JetStream and publishes cycle summaries.

use anyhow::{Context, Result};
use tracing::info;
use wasmcloud_provider_sdk::{load_host_data, run_provider};

use alert_suppression_provider::AlertSuppressionProvider;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("alert_suppression_provider=info".parse()?),
        )
        .init();

    info!("Starting Alert Suppression Provider for wasmCloud");

    let host_data = load_host_data().context("Failed to load wasmCloud host data")?;

    info!("Provider ID: {}", host_data.provider_key);
    info!("Config entries: {}", host_data.config.len());

    let provider = AlertSuppressionProvider::from_host_data(host_data.clone())
        .await
        .context("Failed to create Alert Suppression provider")?;
    let shutdown = provider.shutdown_token();

    info!("Provider ready - consuming suppression cycle requests");
    let handler = run_provider(provider, "alert-suppression-provider")
        .await
        .context("Provider runtime error")?;
    handler.await;

    // Stop any cycle still flushing so its summary reports it as aborted.
    shutdown.cancel();

    info!("Alert Suppression Provider shutdown complete");
    Ok(())
}
