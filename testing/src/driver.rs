//! In-memory storage drivers for testing.
//!
//! - [`InMemoryStorageDriver`]: `HashMap`-based record storage with an atomic
//!   insert-if-absent, plus call counters for "no write happened" assertions
//! - [`FailingStorageDriver`]: wraps the in-memory driver and fails chosen operations

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

use idempotent_request_core::{DriverError, IdempotentRecord, StorageDriver, StorageKey};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory storage driver for fast, deterministic testing.
///
/// Clones share the same map, so a test can keep a handle for inspection
/// while the engine owns another.
///
/// # Example
///
/// ```
/// use idempotent_request_testing::InMemoryStorageDriver;
/// use idempotent_request_core::{StorageDriver, StorageKey};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let driver = InMemoryStorageDriver::new();
/// assert!(driver.get(&StorageKey::new("missing")).await?.is_none());
/// assert!(driver.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStorageDriver {
    records: Arc<RwLock<HashMap<StorageKey, IdempotentRecord>>>,
    gets: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryStorageDriver {
    /// Create a new empty driver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing the write counter.
    pub fn insert(&self, record: IdempotentRecord) {
        self.records
            .write()
            .unwrap()
            .insert(record.storage_key().clone(), record);
    }

    /// Current record under `storage_key`.
    #[must_use]
    pub fn record(&self, storage_key: &str) -> Option<IdempotentRecord> {
        self.records
            .read()
            .unwrap()
            .get(&StorageKey::new(storage_key))
            .cloned()
    }

    /// All stored records.
    #[must_use]
    pub fn records(&self) -> Vec<IdempotentRecord> {
        self.records.read().unwrap().values().cloned().collect()
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Check if the driver holds no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Number of `get` calls so far.
    #[must_use]
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of successful writes (`save` and `insert_if_absent`) so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Remove all records and reset counters (for test isolation)
    pub fn clear(&self) {
        self.records.write().unwrap().clear();
        self.gets.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }
}

impl StorageDriver for InMemoryStorageDriver {
    fn get<'a>(
        &'a self,
        storage_key: &'a StorageKey,
    ) -> Pin<Box<dyn Future<Output = Result<Option<IdempotentRecord>, DriverError>> + Send + 'a>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let record = self.records.read().unwrap().get(storage_key).cloned();
        Box::pin(async move { Ok(record) })
    }

    fn save(
        &self,
        record: IdempotentRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records
            .write()
            .unwrap()
            .insert(record.storage_key().clone(), record);
        Box::pin(async move { Ok(()) })
    }

    fn insert_if_absent(
        &self,
        record: IdempotentRecord,
    ) -> Pin<Box<dyn Future<Output = Result<bool, DriverError>> + Send + '_>> {
        let inserted = {
            let mut records = self.records.write().unwrap();
            if records.contains_key(record.storage_key()) {
                false
            } else {
                records.insert(record.storage_key().clone(), record);
                true
            }
        };
        if inserted {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Box::pin(async move { Ok(inserted) })
    }
}

/// Driver operation that [`FailingStorageDriver`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Every `get`.
    Get,
    /// Creating an unprocessed record.
    Create,
    /// Saving a processing record (lock acquisition).
    Lock,
    /// Saving a processed record (response + unlock).
    Unlock,
}

/// Driver that fails selected operations and delegates the rest.
///
/// # Example
///
/// ```
/// use idempotent_request_testing::{FailingStorageDriver, InMemoryStorageDriver};
/// use idempotent_request_testing::FailurePoint;
///
/// let inner = InMemoryStorageDriver::new();
/// let driver = FailingStorageDriver::new(inner.clone()).fail_on(FailurePoint::Unlock);
/// ```
#[derive(Clone, Debug)]
pub struct FailingStorageDriver {
    inner: InMemoryStorageDriver,
    failures: Vec<FailurePoint>,
}

impl FailingStorageDriver {
    /// Wrap `inner`; nothing fails until [`fail_on`](Self::fail_on) is called.
    #[must_use]
    pub const fn new(inner: InMemoryStorageDriver) -> Self {
        Self {
            inner,
            failures: Vec::new(),
        }
    }

    /// Fail every call hitting `point`.
    #[must_use]
    pub fn fail_on(mut self, point: FailurePoint) -> Self {
        self.failures.push(point);
        self
    }

    fn fails(&self, point: FailurePoint) -> bool {
        self.failures.contains(&point)
    }

    fn failure(point: FailurePoint) -> DriverError {
        DriverError::Backend(format!("injected failure at {point:?}"))
    }

    const fn save_point(record: &IdempotentRecord) -> FailurePoint {
        match record {
            IdempotentRecord::Unprocessed(_) => FailurePoint::Create,
            IdempotentRecord::Processing(_) => FailurePoint::Lock,
            IdempotentRecord::Processed(_) => FailurePoint::Unlock,
        }
    }
}

impl StorageDriver for FailingStorageDriver {
    fn get<'a>(
        &'a self,
        storage_key: &'a StorageKey,
    ) -> Pin<Box<dyn Future<Output = Result<Option<IdempotentRecord>, DriverError>> + Send + 'a>> {
        if self.fails(FailurePoint::Get) {
            return Box::pin(async { Err(Self::failure(FailurePoint::Get)) });
        }
        self.inner.get(storage_key)
    }

    fn save(
        &self,
        record: IdempotentRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + '_>> {
        let point = Self::save_point(&record);
        if self.fails(point) {
            return Box::pin(async move { Err(Self::failure(point)) });
        }
        self.inner.save(record)
    }

    fn insert_if_absent(
        &self,
        record: IdempotentRecord,
    ) -> Pin<Box<dyn Future<Output = Result<bool, DriverError>> + Send + '_>> {
        if self.fails(FailurePoint::Create) {
            return Box::pin(async { Err(Self::failure(FailurePoint::Create)) });
        }
        self.inner.insert_if_absent(record)
    }
}
