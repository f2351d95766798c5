//! Redis operations manager with connection pooling and retry logic

use crate::{Result, SuppressionEngineConfig, SuppressionError};
use deadpool_redis::{Config, Pool, PoolConfig, Runtime, Timeouts};
use std::time::Duration;
use tracing::{debug, error, info};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Redis connection manager with pooling
pub struct RedisManager {
    pool: Pool,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl RedisManager {
    /// Create new Redis manager with connection pool
    pub async fn new(config: &SuppressionEngineConfig) -> Result<Self> {
        let mut redis_config = Config::from_url(&config.redis_url);
        let timeout = Some(Duration::from_millis(config.connection_timeout_ms));
        redis_config.pool = Some(PoolConfig {
            max_size: config.redis_pool_size,
            timeouts: Timeouts {
                wait: timeout,
                create: timeout,
                recycle: timeout,
            },
            ..Default::default()
        });

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| SuppressionError::Configuration(format!("Failed to create pool: {}", e)))?;

        let mut conn = pool.get().await.map_err(pool_error)?;

        // Ping to verify connection
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!(
            "Redis connection pool initialized with {} connections",
            config.redis_pool_size
        );

        Ok(Self {
            pool,
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    /// Get connection from pool
    pub async fn get_connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool.get().await.map_err(pool_error)
    }

    /// Execute a Redis operation, retrying transient failures with exponential backoff
    pub async fn execute_with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(deadpool_redis::Connection) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.retry_attempts {
            if attempt > 0 {
                let delay = backoff_delay(self.retry_delay, attempt);
                debug!("Retry attempt {} after {:?}", attempt, delay);
                tokio::time::sleep(delay).await;
            }

            match self.get_connection().await {
                Ok(conn) => match operation(conn).await {
                    Ok(result) => return Ok(result),
                    Err(e) => {
                        error!("Redis operation failed on attempt {}: {}", attempt + 1, e);
                        let retryable = is_transient(&e);
                        last_error = Some(SuppressionError::Redis(e));
                        if !retryable {
                            break;
                        }
                    }
                },
                Err(e) => {
                    error!("Failed to get connection on attempt {}: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SuppressionError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "All retry attempts exhausted",
            )))
        }))
    }

    /// Get pool statistics
    pub fn pool_status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }
}

fn pool_error(e: deadpool_redis::PoolError) -> SuppressionError {
    SuppressionError::Redis(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "Failed to get connection from pool",
        e.to_string(),
    )))
}

/// Exponential backoff for retry `attempt` (1-based), capped at [`MAX_RETRY_DELAY`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

fn is_transient(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
}

/// Pool status information
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}
