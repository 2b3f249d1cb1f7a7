//! Redis storage driver for the idempotent request engine.
//!
//! # Architecture
//!
//! Records are stored as JSON strings:
//! - **Key**: `{prefix}{storage_key}`, prefix defaults to `idempotency:`
//! - **TTL**: optional; without one, records live until deleted
//! - **Creation**: `SET ... NX`, so concurrent first requests agree on one record
//!
//! # Example
//!
//! ```no_run
//! use idempotent_request_redis::RedisStorageDriver;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = RedisStorageDriver::new("redis://127.0.0.1:6379")
//!     .await?
//!     .with_ttl(Duration::from_secs(24 * 60 * 60));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use idempotent_request_core::{DriverError, IdempotentRecord, StorageDriver, StorageKey};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default key namespace.
pub const DEFAULT_KEY_PREFIX: &str = "idempotency:";

/// `Redis`-backed [`StorageDriver`].
///
/// Clones share the same `ConnectionManager`.
#[derive(Clone)]
pub struct RedisStorageDriver {
    conn_manager: ConnectionManager,
    key_prefix: String,
    ttl_seconds: Option<u64>,
}

impl RedisStorageDriver {
    /// Connect to `Redis` at `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Backend`] if the URL is malformed or the
    /// connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, DriverError> {
        let client = Client::open(redis_url)
            .map_err(|e| DriverError::Backend(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            DriverError::Backend(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!("RedisStorageDriver initialized successfully");

        Ok(Self::from_manager(conn_manager))
    }

    /// Use an existing connection manager.
    #[must_use]
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            ttl_seconds: None,
        }
    }

    /// Namespace every key with `prefix`.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Expire records `ttl` after their last write.
    ///
    /// An expired record is indistinguishable from one that never existed,
    /// including a record still locked by a crashed request.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_seconds = Some(ttl.as_secs().max(1));
        self
    }

    fn record_key(prefix: &str, storage_key: &StorageKey) -> String {
        format!("{prefix}{storage_key}")
    }

    async fn fetch(
        &self,
        storage_key: &StorageKey,
    ) -> Result<Option<IdempotentRecord>, DriverError> {
        let mut conn = self.conn_manager.clone();
        let key = Self::record_key(&self.key_prefix, storage_key);

        let bytes: Option<Vec<u8>> = conn
            .get(&key)
            .await
            .map_err(|e| DriverError::Backend(format!("Failed to read record: {e}")))?;

        bytes.as_deref().map(decode).transpose()
    }

    async fn store(&self, record: IdempotentRecord) -> Result<(), DriverError> {
        let mut conn = self.conn_manager.clone();
        let key = Self::record_key(&self.key_prefix, record.storage_key());
        let bytes = encode(&record)?;

        let _: () = match self.ttl_seconds {
            Some(ttl_seconds) => conn.set_ex(&key, bytes, ttl_seconds).await,
            None => conn.set(&key, bytes).await,
        }
        .map_err(|e| DriverError::Backend(format!("Failed to store record: {e}")))?;

        tracing::trace!(key = %key, state = record.state_name(), "Stored record in Redis");
        Ok(())
    }

    async fn store_new(&self, record: IdempotentRecord) -> Result<bool, DriverError> {
        let mut conn = self.conn_manager.clone();
        let key = Self::record_key(&self.key_prefix, record.storage_key());
        let bytes = encode(&record)?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(bytes).arg("NX");
        if let Some(ttl_seconds) = self.ttl_seconds {
            cmd.arg("EX").arg(ttl_seconds);
        }

        // "OK" when written, nil when the key already existed.
        let reply: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| DriverError::Backend(format!("Failed to create record: {e}")))?;

        Ok(reply.is_some())
    }
}

fn encode(record: &IdempotentRecord) -> Result<Vec<u8>, DriverError> {
    serde_json::to_vec(record).map_err(|e| DriverError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<IdempotentRecord, DriverError> {
    serde_json::from_slice(bytes).map_err(|e| DriverError::CorruptRecord(e.to_string()))
}

impl std::fmt::Debug for RedisStorageDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorageDriver")
            .field("key_prefix", &self.key_prefix)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl StorageDriver for RedisStorageDriver {
    fn get<'a>(
        &'a self,
        storage_key: &'a StorageKey,
    ) -> Pin<Box<dyn Future<Output = Result<Option<IdempotentRecord>, DriverError>> + Send + 'a>> {
        Box::pin(self.fetch(storage_key))
    }

    fn save(
        &self,
        record: IdempotentRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>> {
        Box::pin(self.store(record))
    }

    fn insert_if_absent(
        &self,
        record: IdempotentRecord,
    ) -> Pin<Box<dyn Future<Output = Result<bool, DriverError>> + Send + '_>> {
        Box::pin(self.store_new(record))
    }
}
