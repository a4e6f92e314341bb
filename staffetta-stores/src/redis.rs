// Copyright 2025 Staffetta Contributors
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

//! Redis-backed offset store for distributed deployments.
//!
//! Persists [`Checkpoint`]s in Redis so checkpoints survive restarts and
//! can be shared across connector instances.
//!
//! # Features
//!
//! - **Connection pooling** via `deadpool-redis`
//! - **Optional TTL** so abandoned connector scopes expire
//! - **Retry logic** with exponential backoff on transient errors
//!
//! # Key Pattern
//!
//! Checkpoints are stored under:
//!
//! ```text
//! staffetta:checkpoint:{scope}:{partition}
//! ```
//!
//! where `{scope}` is the connector name (or `-` for unscoped
//! connectors). Scopes must not contain `:`.
//!
//! # Example
//!
//! ```rust,no_run
//! use staffetta_core::offset::{Checkpoint, OffsetStore};
//! use staffetta_stores::redis::{RedisConfig, RedisOffsetStore};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisConfig::builder()
//!     .url("redis://localhost:6379")
//!     .pool_size(10)
//!     .ttl(Duration::from_secs(7 * 24 * 60 * 60))
//!     .build()?;
//!
//! let store = RedisOffsetStore::new(config).await?;
//! let checkpoint = Checkpoint { partition: 0, partition_uuid: 1, seqno: 42 };
//! store.save(Some("my-connector"), &checkpoint).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::{AsyncCommands, RedisError};
use staffetta_core::offset::{Checkpoint, OffsetStore, OffsetStoreError};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Key prefix for all Staffetta checkpoints in Redis.
const KEY_PREFIX: &str = "staffetta:checkpoint";

/// Placeholder scope segment for unscoped connectors.
const UNSCOPED: &str = "-";

/// Maximum number of retry attempts for transient Redis errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const BASE_RETRY_DELAY_MS: u64 = 100;

/// Configuration for the Redis-backed offset store.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., `redis://localhost:6379`).
    pub url: String,

    /// Connection pool size (default: 10).
    pub pool_size: usize,

    /// Optional TTL for checkpoints. If set, a scope's checkpoints expire
    /// after this duration without writes.
    pub ttl: Option<Duration>,

    /// Connection timeout (default: 5 seconds).
    pub connection_timeout: Duration,

    /// Maximum retries for transient errors (default: 3).
    pub max_retries: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
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
    ///
    /// # Formats
    ///
    /// - Standalone: `redis://localhost:6379`
    /// - With auth: `redis://:password@localhost:6379`
    /// - With database: `redis://localhost:6379/0`
    /// - TLS: `rediss://localhost:6380`
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the connection pool size. Default: 10.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Sets the checkpoint TTL. If unset, checkpoints never expire.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the connection timeout. Default: 5 seconds.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets the maximum retries for transient errors. Default: 3.
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
    pub fn build(self) -> Result<RedisConfig, OffsetStoreError> {
        let url = self
            .url
            .ok_or_else(|| OffsetStoreError::Other("Redis URL is required".to_string()))?;

        let pool_size = self.pool_size.unwrap_or(10);
        if pool_size == 0 {
            return Err(OffsetStoreError::Other(
                "pool size must be greater than 0".to_string(),
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

/// Redis-backed [`OffsetStore`].
///
/// `Send + Sync`; the underlying pool handles concurrent access, so one
/// store can be shared by all partition workers.
#[derive(Clone)]
pub struct RedisOffsetStore {
    pool: Pool,
    config: RedisConfig,
}

impl RedisOffsetStore {
    /// Creates a store, verifying connectivity with a `PING`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created or Redis is
    /// unreachable.
    pub async fn new(config: RedisConfig) -> Result<Self, OffsetStoreError> {
        debug!(url = %config.url, pool_size = config.pool_size, "initializing Redis offset store");

        let mut pool_config = PoolConfig::from_url(&config.url);
        if let Some(pool) = pool_config.pool.as_mut() {
            pool.max_size = config.pool_size;
            pool.timeouts.wait = Some(config.connection_timeout);
            pool.timeouts.create = Some(config.connection_timeout);
            pool.timeouts.recycle = Some(config.connection_timeout);
        }

        let pool = pool_config.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            error!(error = %e, "failed to create Redis connection pool");
            OffsetStoreError::Connection(format!("failed to create pool: {e}"))
        })?;

        let mut conn = pool.get().await.map_err(|e| {
            OffsetStoreError::Connection(format!("failed to connect to Redis: {e}"))
        })?;
        redis::cmd("PING")
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| {
                OffsetStoreError::Connection(format!("Redis connection test failed: {e}"))
            })?;

        debug!("Redis offset store initialized");
        Ok(Self { pool, config })
    }

    /// Key for one `(scope, partition)` pair.
    fn make_key(scope: Option<&str>, partition: u16) -> String {
        format!("{}:{}:{}", KEY_PREFIX, scope.unwrap_or(UNSCOPED), partition)
    }

    /// Match pattern for all of a scope's checkpoints.
    fn scope_pattern(scope: Option<&str>) -> String {
        format!("{}:{}:*", KEY_PREFIX, scope.unwrap_or(UNSCOPED))
    }

    /// Partition id parsed back out of a checkpoint key.
    fn partition_from_key(key: &str) -> Option<u16> {
        key.rsplit(':').next()?.parse().ok()
    }

    fn serialize(checkpoint: &Checkpoint) -> Result<Vec<u8>, OffsetStoreError> {
        serde_json::to_vec(checkpoint).map_err(|e| {
            OffsetStoreError::Serialization(format!("failed to serialize checkpoint: {e}"))
        })
    }

    fn deserialize(bytes: &[u8]) -> Result<Checkpoint, OffsetStoreError> {
        serde_json::from_slice(bytes).map_err(|e| {
            OffsetStoreError::Serialization(format!("failed to deserialize checkpoint: {e}"))
        })
    }

    /// Executes a Redis operation with retry on transient errors.
    async fn with_retry<F, T, Fut>(&self, operation: F) -> Result<T, OffsetStoreError>
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
                    let delay =
                        Duration::from_millis(BASE_RETRY_DELAY_MS * 2_u64.pow(retries - 1));
                    warn!(
                        attempt = retries,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Redis operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(retries, error = %e, "Redis operation failed");
                    return Err(OffsetStoreError::Connection(format!(
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

    fn pool_error(e: impl std::fmt::Display) -> RedisError {
        RedisError::from((
            redis::ErrorKind::IoError,
            "failed to get connection from pool",
            e.to_string(),
        ))
    }
}

#[async_trait]
impl OffsetStore for RedisOffsetStore {
    async fn load(
        &self,
        scope: Option<&str>,
        partition: u16,
    ) -> Result<Option<Checkpoint>, OffsetStoreError> {
        let key = Self::make_key(scope, partition);
        let pool = self.pool.clone();

        let bytes: Option<Vec<u8>> = self
            .with_retry(|| {
                let key = key.clone();
                let pool = pool.clone();
                async move {
                    let mut conn = pool.get().await.map_err(Self::pool_error)?;
                    conn.get(&key).await
                }
            })
            .await?;

        bytes.as_deref().map(Self::deserialize).transpose()
    }

    async fn save(
        &self,
        scope: Option<&str>,
        checkpoint: &Checkpoint,
    ) -> Result<(), OffsetStoreError> {
        let key = Self::make_key(scope, checkpoint.partition);
        let value = Self::serialize(checkpoint)?;
        let pool = self.pool.clone();
        let ttl = self.config.ttl;

        self.with_retry::<_, (), _>(|| {
            let key = key.clone();
            let value = value.clone();
            let pool = pool.clone();
            async move {
                let mut conn = pool.get().await.map_err(Self::pool_error)?;
                if let Some(ttl) = ttl {
                    conn.set_ex(&key, &value, ttl.as_secs()).await
                } else {
                    conn.set(&key, &value).await
                }
            }
        })
        .await?;

        debug!(key = %key, seqno = checkpoint.seqno, "checkpoint saved");
        Ok(())
    }

    async fn delete(&self, scope: Option<&str>, partition: u16) -> Result<(), OffsetStoreError> {
        let key = Self::make_key(scope, partition);
        let pool = self.pool.clone();

        self.with_retry::<_, (), _>(|| {
            let key = key.clone();
            let pool = pool.clone();
            async move {
                let mut conn = pool.get().await.map_err(Self::pool_error)?;
                conn.del(&key).await
            }
        })
        .await?;

        debug!(key = %key, "checkpoint deleted");
        Ok(())
    }

    async fn list(
        &self,
        scope: Option<&str>,
    ) -> Result<HashMap<u16, Checkpoint>, OffsetStoreError> {
        let pattern = Self::scope_pattern(scope);
        let pool = self.pool.clone();

        // KEYS is acceptable here: checkpoint keys are bounded by the
        // partition count of the source (at most a few thousand).
        let keys: Vec<String> = self
            .with_retry(|| {
                let pattern = pattern.clone();
                let pool = pool.clone();
                async move {
                    let mut conn = pool.get().await.map_err(Self::pool_error)?;
                    conn.keys(&pattern).await
                }
            })
            .await?;

        let mut checkpoints = HashMap::with_capacity(keys.len());
        for key in keys {
            let Some(partition) = Self::partition_from_key(&key) else {
                warn!(key = %key, "skipping malformed checkpoint key");
                continue;
            };
            if let Some(checkpoint) = self.load(scope, partition).await? {
                checkpoints.insert(partition, checkpoint);
            }
        }
        Ok(checkpoints)
    }

    async fn close(&self) -> Result<(), OffsetStoreError> {
        // deadpool closes connections on drop; nothing to flush.
        debug!("closing Redis offset store");
        Ok(())
    }
}
