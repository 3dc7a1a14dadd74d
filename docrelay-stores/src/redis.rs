// Copyright 2025 Docrelay Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Redis checkpoint store.
//!
//! Each checkpoint is one BSON-encoded [`CheckpointRecord`] stored under
//!
//! ```text
//! docrelay:checkpoint:{database}:{collection}
//! ```
//!
//! Connections come from a `deadpool-redis` pool. Transient failures
//! (I/O and response errors) are retried with exponential backoff before the
//! operation is reported as a connection error.
//!
//! # Example
//!
//! ```rust,no_run
//! use docrelay_core::checkpoint::{CheckpointKey, CheckpointStore};
//! use docrelay_stores::redis::{RedisCheckpointStore, RedisConfig};
//! use bson::doc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisConfig::builder()
//!     .url("redis://localhost:6379")
//!     .pool_size(4)
//!     .build()?;
//!
//! let store = RedisCheckpointStore::new(config).await?;
//! let key = CheckpointKey::new("shop", "orders");
//! store.set_last_processed(&key, Some(&doc! { "_data": "82" })).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bson::Document;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use docrelay_core::checkpoint::{CheckpointError, CheckpointKey, CheckpointRecord, CheckpointStore};
use redis::{AsyncCommands, RedisError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Key prefix for all docrelay checkpoints in Redis.
const KEY_PREFIX: &str = "docrelay:checkpoint";

/// Maximum number of retry attempts for transient Redis errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const BASE_RETRY_DELAY_MS: u64 = 100;

/// Configuration for [`RedisCheckpointStore`].
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL, e.g. `redis://localhost:6379` or `rediss://...`
    pub url: String,

    /// Connection pool size (default: 4)
    pub pool_size: usize,

    /// Optional expiry applied on every write
    pub ttl: Option<Duration>,

    /// Connection timeout (default: 5 seconds)
    pub connection_timeout: Duration,

    /// Maximum number of retries for transient errors (default: 3)
    pub max_retries: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 4,
            ttl: None,
            connection_timeout: Duration::from_secs(5),
            max_retries: MAX_RETRIES,
        }
    }
}

impl RedisConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> RedisConfigBuilder {
        RedisConfigBuilder::default()
    }
}

/// Builder for [`RedisConfig`] with validation.
#[derive(Debug, Default)]
pub struct RedisConfigBuilder {
    url: Option<String>,
    pool_size: Option<usize>,
    ttl: Option<Duration>,
    connection_timeout: Option<Duration>,
    max_retries: Option<u32>,
}

impl RedisConfigBuilder {
    /// Sets the Redis connection URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the connection pool size.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Sets an expiry for stored checkpoints.
    ///
    /// A checkpoint that expires makes the next run start from the current
    /// end of the change history.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets the maximum number of retries for transient errors.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is missing or the pool size is zero.
    pub fn build(self) -> Result<RedisConfig, CheckpointError> {
        let url = self
            .url
            .ok_or_else(|| CheckpointError::Other("Redis URL is required".to_string()))?;

        let pool_size = self.pool_size.unwrap_or(4);
        if pool_size == 0 {
            return Err(CheckpointError::Other(
                "Pool size must be greater than 0".to_string(),
            ));
        }

        Ok(RedisConfig {
            url,
            pool_size,
            ttl: self.ttl,
            connection_timeout: self.connection_timeout.unwrap_or(Duration::from_secs(5)),
            max_retries: self.max_retries.unwrap_or(MAX_RETRIES),
        })
    }
}

/// Checkpoint store backed by Redis.
#[derive(Clone)]
pub struct RedisCheckpointStore {
    pool: Pool,
    config: RedisConfig,
}

impl RedisCheckpointStore {
    /// Creates the pool and verifies connectivity with `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Connection`] when the pool cannot be created
    /// or the server does not answer.
    pub async fn new(config: RedisConfig) -> Result<Self, CheckpointError> {
        let mut pool_config = PoolConfig::from_url(&config.url);
        if let Some(pool) = pool_config.pool.as_mut() {
            pool.max_size = config.pool_size;
            pool.timeouts.wait = Some(config.connection_timeout);
            pool.timeouts.create = Some(config.connection_timeout);
            pool.timeouts.recycle = Some(config.connection_timeout);
        }

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CheckpointError::Connection(format!("Failed to create pool: {e}")))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| CheckpointError::Connection(format!("Failed to connect to Redis: {e}")))?;

        redis::cmd("PING")
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| CheckpointError::Connection(format!("Redis PING failed: {e}")))?;

        info!(pool_size = config.pool_size, "Redis checkpoint store ready");
        Ok(Self { pool, config })
    }

    fn make_key(key: &CheckpointKey) -> String {
        format!("{KEY_PREFIX}:{}:{}", key.database, key.collection)
    }

    async fn with_retry<F, T, Fut>(&self, operation: F) -> Result<T, CheckpointError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RedisError>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::is_retryable(&e) && retries < self.config.max_retries => {
                    retries += 1;
                    let delay = Duration::from_millis(BASE_RETRY_DELAY_MS * 2_u64.pow(retries - 1));
                    warn!(
                        attempt = retries,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Redis operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(retries, error = %e, "Redis operation failed");
                    return Err(CheckpointError::Connection(format!(
                        "Redis operation failed: {e}"
                    )));
                }
            }
        }
    }

    fn is_retryable(error: &RedisError) -> bool {
        matches!(
            error.kind(),
            redis::ErrorKind::IoError | redis::ErrorKind::ResponseError
        )
    }

    fn encode(record: &CheckpointRecord) -> Result<Vec<u8>, CheckpointError> {
        bson::to_vec(record).map_err(|e| {
            CheckpointError::Serialization(format!("Failed to encode checkpoint: {e}"))
        })
    }

    fn decode(bytes: &[u8]) -> Result<CheckpointRecord, CheckpointError> {
        bson::from_slice(bytes).map_err(|e| {
            CheckpointError::Serialization(format!("Failed to decode checkpoint: {e}"))
        })
    }

    async fn write(
        &self,
        redis_key: &str,
        value: Vec<u8>,
        only_if_absent: bool,
    ) -> Result<(), CheckpointError> {
        let pool = self.pool.clone();
        let ttl = self.config.ttl;

        self.with_retry::<_, (), _>(|| {
            let pool = pool.clone();
            let value = value.clone();
            async move {
                let mut conn = pool.get().await.map_err(pool_error)?;
                let mut cmd = redis::cmd("SET");
                cmd.arg(redis_key).arg(value);
                if let Some(ttl) = ttl {
                    cmd.arg("EX").arg(ttl.as_secs().max(1));
                }
                if only_if_absent {
                    cmd.arg("NX");
                }
                // NX answers nil when the key already exists.
                cmd.query_async::<Option<String>>(&mut *conn).await.map(|_| ())
            }
        })
        .await
    }
}

fn pool_error(e: deadpool_redis::PoolError) -> RedisError {
    RedisError::from((
        redis::ErrorKind::IoError,
        "Failed to get connection from pool",
        e.to_string(),
    ))
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn get_last_processed(
        &self,
        key: &CheckpointKey,
    ) -> Result<Option<Document>, CheckpointError> {
        let redis_key = Self::make_key(key);
        let pool = self.pool.clone();

        let bytes: Option<Vec<u8>> = self
            .with_retry(|| {
                let pool = pool.clone();
                let redis_key = redis_key.clone();
                async move {
                    let mut conn = pool.get().await.map_err(pool_error)?;
                    conn.get(&redis_key).await
                }
            })
            .await?;

        if let Some(data) = bytes {
            let record = Self::decode(&data)?;
            debug!(key = %key, found = record.last_processed.is_some(), "Read checkpoint");
            return Ok(record.last_processed);
        }

        let bootstrap = Self::encode(&CheckpointRecord::bootstrap(key))?;
        self.write(&redis_key, bootstrap, true).await?;
        info!(key = %key, "Created empty checkpoint record");
        Ok(None)
    }

    async fn set_last_processed(
        &self,
        key: &CheckpointKey,
        token: Option<&Document>,
    ) -> Result<(), CheckpointError> {
        let mut record = CheckpointRecord::bootstrap(key);
        record.last_processed = token.cloned();

        self.write(&Self::make_key(key), Self::encode(&record)?, false)
            .await?;
        debug!(key = %key, cleared = token.is_none(), "Wrote checkpoint");
        Ok(())
    }

    async fn close(&self) -> Result<(), CheckpointError> {
        debug!("Closing Redis checkpoint store");
        self.pool.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_make_key() {
        assert_eq!(
            RedisCheckpointStore::make_key(&CheckpointKey::new("shop", "orders")),
            "docrelay:checkpoint:shop:orders"
        );
    }

    #[test]
    fn test_config_builder() {
        let config = RedisConfig::builder()
            .url("redis://cache:6379")
            .pool_size(8)
            .ttl(Duration::from_secs(3600))
            .max_retries(5)
            .build()
            .unwrap();

        assert_eq!(config.url, "redis://cache:6379");
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.ttl, Some(Duration::from_secs(3600)));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_builder_missing_url() {
        assert!(RedisConfig::builder().build().is_err());
    }

    #[test]
    fn test_config_builder_zero_pool_size() {
        let result = RedisConfig::builder().url("redis://x").pool_size(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_record_encoding() {
        let mut record = CheckpointRecord::bootstrap(&CheckpointKey::new("shop", "orders"));
        record.last_processed = Some(doc! { "_data": "8263" });

        let bytes = RedisCheckpointStore::encode(&record).unwrap();
        assert_eq!(RedisCheckpointStore::decode(&bytes).unwrap(), record);
        assert!(RedisCheckpointStore::decode(b"not bson").is_err());
    }
}
