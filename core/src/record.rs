//! Stored idempotent request records.
//!
//! A record moves through three states:
//!
//! ```text
//! Unprocessed ──acquire_lock──▶ Processing ──set_response_and_unlock──▶ Processed
//! (no lock, no response)        (locked_at)                             (response)
//! ```
//!
//! Each state is its own type, so a record carrying both a lock and a
//! response cannot be constructed. State transitions are only performed by
//! the [`RecordStore`](crate::storage::RecordStore).

use crate::error::DriverError;
use crate::identity::RequestIdentity;
use crate::response::SerializedResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend lookup key for a record.
///
/// Must contain the idempotency key as a substring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    /// Wrap a key string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key embeds `idempotency_key`.
    #[must_use]
    pub fn embeds(&self, idempotency_key: &str) -> bool {
        self.0.contains(idempotency_key)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StorageKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for StorageKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Newly created record: no attempt has locked it yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnprocessedRecord {
    identity: RequestIdentity,
    storage_key: StorageKey,
}

impl UnprocessedRecord {
    /// Create a record for a request seen for the first time.
    #[must_use]
    pub const fn new(identity: RequestIdentity, storage_key: StorageKey) -> Self {
        Self {
            identity,
            storage_key,
        }
    }

    /// Identity of the request that created the record.
    #[must_use]
    pub const fn identity(&self) -> &RequestIdentity {
        &self.identity
    }

    /// Storage key of the record.
    #[must_use]
    pub const fn storage_key(&self) -> &StorageKey {
        &self.storage_key
    }

    pub(crate) fn lock(self, locked_at: DateTime<Utc>) -> ProcessingRecord {
        ProcessingRecord {
            identity: self.identity,
            storage_key: self.storage_key,
            locked_at,
        }
    }
}

/// An execution is in flight, or died without recording a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    identity: RequestIdentity,
    storage_key: StorageKey,
    locked_at: DateTime<Utc>,
}

impl ProcessingRecord {
    /// Identity of the request holding the lock.
    #[must_use]
    pub const fn identity(&self) -> &RequestIdentity {
        &self.identity
    }

    /// Storage key of the record.
    #[must_use]
    pub const fn storage_key(&self) -> &StorageKey {
        &self.storage_key
    }

    /// When the lock was acquired.
    #[must_use]
    pub const fn locked_at(&self) -> DateTime<Utc> {
        self.locked_at
    }

    pub(crate) fn complete(self, response: SerializedResponse) -> ProcessedRecord {
        ProcessedRecord {
            identity: self.identity,
            storage_key: self.storage_key,
            response,
        }
    }
}

/// Terminal state: the response can be replayed indefinitely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    identity: RequestIdentity,
    storage_key: StorageKey,
    response: SerializedResponse,
}

impl ProcessedRecord {
    /// Identity of the request that produced the response.
    #[must_use]
    pub const fn identity(&self) -> &RequestIdentity {
        &self.identity
    }

    /// Storage key of the record.
    #[must_use]
    pub const fn storage_key(&self) -> &StorageKey {
        &self.storage_key
    }

    /// The captured response.
    #[must_use]
    pub const fn response(&self) -> &SerializedResponse {
        &self.response
    }
}

/// A stored record in any of its three states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IdempotentRecord {
    /// Created, never locked.
    Unprocessed(UnprocessedRecord),
    /// Locked by an execution.
    Processing(ProcessingRecord),
    /// Completed with a stored response.
    Processed(ProcessedRecord),
}

impl IdempotentRecord {
    /// Rebuild a record from flat storage columns.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::CorruptRecord`] when both `locked_at` and
    /// `response` are set, which no valid transition produces.
    pub fn from_parts(
        identity: RequestIdentity,
        storage_key: StorageKey,
        locked_at: Option<DateTime<Utc>>,
        response: Option<SerializedResponse>,
    ) -> Result<Self, DriverError> {
        match (locked_at, response) {
            (None, None) => Ok(Self::Unprocessed(UnprocessedRecord::new(identity, storage_key))),
            (Some(locked_at), None) => Ok(Self::Processing(ProcessingRecord {
                identity,
                storage_key,
                locked_at,
            })),
            (None, Some(response)) => Ok(Self::Processed(ProcessedRecord {
                identity,
                storage_key,
                response,
            })),
            (Some(_), Some(_)) => Err(DriverError::CorruptRecord(format!(
                "record {storage_key} is both locked and has a stored response"
            ))),
        }
    }

    /// Identity stored with the record.
    #[must_use]
    pub const fn identity(&self) -> &RequestIdentity {
        match self {
            Self::Unprocessed(r) => r.identity(),
            Self::Processing(r) => r.identity(),
            Self::Processed(r) => r.identity(),
        }
    }

    /// Storage key of the record.
    #[must_use]
    pub const fn storage_key(&self) -> &StorageKey {
        match self {
            Self::Unprocessed(r) => r.storage_key(),
            Self::Processing(r) => r.storage_key(),
            Self::Processed(r) => r.storage_key(),
        }
    }

    /// Lock timestamp, set only while processing.
    #[must_use]
    pub const fn locked_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Processing(r) => Some(r.locked_at()),
            Self::Unprocessed(_) | Self::Processed(_) => None,
        }
    }

    /// Stored response, set only once processed.
    #[must_use]
    pub const fn response(&self) -> Option<&SerializedResponse> {
        match self {
            Self::Processed(r) => Some(r.response()),
            Self::Unprocessed(_) | Self::Processing(_) => None,
        }
    }

    /// Short state name for logs.
    #[must_use]
    pub const fn state_name(&self) -> &'static str {
        match self {
            Self::Unprocessed(_) => "unprocessed",
            Self::Processing(_) => "processing",
            Self::Processed(_) => "processed",
        }
    }
}

impl From<UnprocessedRecord> for IdempotentRecord {
    fn from(record: UnprocessedRecord) -> Self {
        Self::Unprocessed(record)
    }
}

impl From<ProcessingRecord> for IdempotentRecord {
    fn from(record: ProcessingRecord) -> Self {
        Self::Processing(record)
    }
}

impl From<ProcessedRecord> for IdempotentRecord {
    fn from(record: ProcessedRecord) -> Self {
        Self::Processed(record)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::response::BodyEncoding;
    use std::collections::BTreeMap;

    fn identity() -> RequestIdentity {
        RequestIdentity::new("POST", "/api/hello", "key-1", None)
    }

    fn response() -> SerializedResponse {
        SerializedResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers: BTreeMap::new(),
            body: "ok".to_string(),
            body_encoding: BodyEncoding::Utf8,
        }
    }

    #[test]
    fn test_storage_key_embeds() {
        let key = StorageKey::new("/api/hello-key-1");
        assert!(key.embeds("key-1"));
        assert!(!key.embeds("key-2"));
    }

    #[test]
    fn test_from_parts_maps_each_state() {
        let key = StorageKey::new("key-1");
        let now = Utc::now();

        let unprocessed =
            IdempotentRecord::from_parts(identity(), key.clone(), None, None).unwrap();
        assert_eq!(unprocessed.state_name(), "unprocessed");

        let processing =
            IdempotentRecord::from_parts(identity(), key.clone(), Some(now), None).unwrap();
        assert_eq!(processing.locked_at(), Some(now));
        assert!(processing.response().is_none());

        let processed =
            IdempotentRecord::from_parts(identity(), key, None, Some(response())).unwrap();
        assert_eq!(processed.response(), Some(&response()));
        assert!(processed.locked_at().is_none());
    }

    #[test]
    fn test_from_parts_rejects_locked_with_response() {
        let result = IdempotentRecord::from_parts(
            identity(),
            StorageKey::new("key-1"),
            Some(Utc::now()),
            Some(response()),
        );
        assert!(matches!(result, Err(DriverError::CorruptRecord(_))));
    }

    #[test]
    fn test_transitions_keep_identity_and_key() {
        let record = UnprocessedRecord::new(identity(), StorageKey::new("key-1"));
        let locked = record.lock(Utc::now());
        assert_eq!(locked.storage_key().as_str(), "key-1");

        let done = locked.complete(response());
        assert_eq!(done.identity(), &identity());
        assert_eq!(done.response().status, 200);
    }

    #[test]
    fn test_record_json_carries_state_tag() {
        let record: IdempotentRecord =
            UnprocessedRecord::new(identity(), StorageKey::new("key-1")).into();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["state"], "unprocessed");
        assert_eq!(json["storage_key"], "key-1");

        let back: IdempotentRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
