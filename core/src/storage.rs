//! Storage driver contract and the record store built on top of it.
//!
//! Drivers only know how to read and replace whole records. The
//! [`RecordStore`] turns that into the three operations the engine needs:
//! find-or-create, lock acquisition, and set-response-and-unlock. Every
//! write is a full-record replace; there are no partial field updates.
//!
//! # Atomicity
//!
//! The create step of [`RecordStore::find_or_create`] is only as atomic as
//! [`StorageDriver::insert_if_absent`]. The default implementation composes
//! `get` + `save` and leaves a race window between simultaneous first
//! requests; production drivers should override it with a conditional put
//! or a unique constraint. Lock acquisition is a plain save and relies on
//! the backend's read-after-write consistency.

use crate::clock::Clock;
use crate::error::{DriverError, StorageError, StorageOperation};
use crate::identity::RequestIdentity;
use crate::record::{IdempotentRecord, ProcessingRecord, StorageKey, UnprocessedRecord};
use crate::response::SerializedResponse;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Persistence backend for idempotent request records.
///
/// Persistence policies such as TTL and cleanup belong to the driver.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so drivers can be injected as
/// `Arc<dyn StorageDriver>`.
pub trait StorageDriver: Send + Sync {
    /// Load the record stored under `storage_key`, if any.
    fn get<'a>(
        &'a self,
        storage_key: &'a StorageKey,
    ) -> Pin<Box<dyn Future<Output = Result<Option<IdempotentRecord>, DriverError>> + Send + 'a>>;

    /// Store `record`, replacing any record under the same key.
    fn save(
        &self,
        record: IdempotentRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>>;

    /// Store `record` only if no record exists under its key.
    ///
    /// Returns `true` if the record was written. The default implementation
    /// is not atomic; override it when the backend offers insert-if-absent.
    fn insert_if_absent(
        &self,
        record: IdempotentRecord,
    ) -> Pin<Box<dyn Future<Output = Result<bool, DriverError>> + Send + '_>> {
        Box::pin(async move {
            if self.get(record.storage_key()).await?.is_some() {
                return Ok(false);
            }
            self.save(record).await?;
            Ok(true)
        })
    }
}

/// Result of [`RecordStore::find_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindOrCreate {
    /// No record existed; a new unprocessed record was stored.
    Created(UnprocessedRecord),
    /// A record already existed and was left untouched.
    Found(IdempotentRecord),
}

impl FindOrCreate {
    /// Whether this call created the record.
    #[must_use]
    pub const fn created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Record store: safe record transitions over a raw [`StorageDriver`].
///
/// Driver failures are wrapped in [`StorageError`] naming the operation and
/// the storage key, with the driver error preserved as the source.
#[derive(Clone)]
pub struct RecordStore {
    driver: Arc<dyn StorageDriver>,
    clock: Arc<dyn Clock>,
}

impl RecordStore {
    /// Create a record store over `driver`, stamping locks with `clock`.
    #[must_use]
    pub fn new(driver: Arc<dyn StorageDriver>, clock: Arc<dyn Clock>) -> Self {
        Self { driver, clock }
    }

    /// Find the record for `storage_key`, or create an unprocessed one.
    ///
    /// An existing record is returned as-is and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] with [`StorageOperation::FindOrCreate`] if the
    /// driver fails.
    pub async fn find_or_create(
        &self,
        identity: RequestIdentity,
        storage_key: StorageKey,
    ) -> Result<FindOrCreate, StorageError> {
        let wrap = |source| {
            StorageError::new(StorageOperation::FindOrCreate, storage_key.clone(), source)
        };

        if let Some(existing) = self.driver.get(&storage_key).await.map_err(wrap)? {
            return Ok(FindOrCreate::Found(existing));
        }

        let record = UnprocessedRecord::new(identity, storage_key.clone());
        let inserted = self
            .driver
            .insert_if_absent(record.clone().into())
            .await
            .map_err(wrap)?;
        if inserted {
            tracing::debug!(
                storage_key = %storage_key,
                "Created unprocessed idempotent request"
            );
            return Ok(FindOrCreate::Created(record));
        }

        // Another request created the record between our read and write.
        tracing::debug!(storage_key = %storage_key, "Lost create race, reloading record");
        match self.driver.get(&storage_key).await.map_err(wrap)? {
            Some(existing) => Ok(FindOrCreate::Found(existing)),
            None => Err(wrap(DriverError::Backend(
                "record reported as existing but could not be read back".to_string(),
            ))),
        }
    }

    /// Lock `record` for processing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] with [`StorageOperation::AcquireLock`] if the
    /// driver fails.
    pub async fn acquire_lock(
        &self,
        record: UnprocessedRecord,
    ) -> Result<ProcessingRecord, StorageError> {
        let locked = record.lock(self.clock.now());
        self.driver.save(locked.clone().into()).await.map_err(|source| {
            StorageError::new(StorageOperation::AcquireLock, locked.storage_key().clone(), source)
        })?;

        tracing::debug!(
            storage_key = %locked.storage_key(),
            locked_at = %locked.locked_at(),
            "Acquired lock for idempotent request"
        );
        Ok(locked)
    }

    /// Store `response` and release the lock on `record`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] with [`StorageOperation::SetResponseAndUnlock`]
    /// if the driver fails. The record then stays locked: no retry or unlock
    /// is attempted and the key remains blocked until an operator clears it.
    pub async fn set_response_and_unlock(
        &self,
        record: ProcessingRecord,
        response: SerializedResponse,
    ) -> Result<(), StorageError> {
        let storage_key = record.storage_key().clone();
        let status = response.status;
        self.driver
            .save(record.complete(response).into())
            .await
            .map_err(|source| {
                StorageError::new(
                    StorageOperation::SetResponseAndUnlock,
                    storage_key.clone(),
                    source,
                )
            })?;

        tracing::debug!(
            storage_key = %storage_key,
            status,
            "Stored response and released lock"
        );
        Ok(())
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").finish_non_exhaustive()
    }
}
