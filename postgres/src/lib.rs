//! `PostgreSQL` storage driver for the idempotent request engine.
//!
//! Records live in a single table keyed by storage key. Creation uses
//! `INSERT ... ON CONFLICT DO NOTHING`, so concurrent first requests for the
//! same key agree on exactly one record; every other write is an upsert.
//!
//! # Example
//!
//! ```ignore
//! use idempotent_request_postgres::PostgresStorageDriver;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = PostgresStorageDriver::new("postgres://localhost/mydb").await?;
//!     driver.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use idempotent_request_core::{
    DriverError, Fingerprint, IdempotentRecord, RequestIdentity, SerializedResponse, StorageDriver,
    StorageKey,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

/// Name of the table holding idempotent request records.
pub const TABLE_NAME: &str = "idempotent_requests";

/// `PostgreSQL`-backed [`StorageDriver`].
///
/// # Example
///
/// ```no_run
/// use idempotent_request_postgres::PostgresStorageDriver;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let driver = PostgresStorageDriver::from_pool(pool);
/// driver.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresStorageDriver {
    pool: PgPool,
}

/// One record flattened into table columns.
#[derive(Debug, Clone, PartialEq)]
struct Columns {
    storage_key: String,
    request_method: String,
    request_path: String,
    idempotency_key: String,
    fingerprint: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    response: Option<SerializedResponse>,
}

impl Columns {
    fn from_record(record: &IdempotentRecord) -> Self {
        let identity = record.identity();
        Self {
            storage_key: record.storage_key().as_str().to_string(),
            request_method: identity.method().to_string(),
            request_path: identity.path().to_string(),
            idempotency_key: identity.idempotency_key().to_string(),
            fingerprint: identity.fingerprint().map(|f| f.as_str().to_string()),
            locked_at: record.locked_at(),
            response: record.response().cloned(),
        }
    }

    fn from_row(row: &PgRow) -> Result<Self, DriverError> {
        let corrupt = |e: sqlx::Error| DriverError::CorruptRecord(e.to_string());
        let response: Option<Json<SerializedResponse>> = row.try_get("response").map_err(corrupt)?;

        Ok(Self {
            storage_key: row.try_get("storage_key").map_err(corrupt)?,
            request_method: row.try_get("request_method").map_err(corrupt)?,
            request_path: row.try_get("request_path").map_err(corrupt)?,
            idempotency_key: row.try_get("idempotency_key").map_err(corrupt)?,
            fingerprint: row.try_get("fingerprint").map_err(corrupt)?,
            locked_at: row.try_get("locked_at").map_err(corrupt)?,
            response: response.map(|Json(response)| response),
        })
    }

    fn into_record(self) -> Result<IdempotentRecord, DriverError> {
        IdempotentRecord::from_parts(
            RequestIdentity::new(
                self.request_method,
                self.request_path,
                self.idempotency_key,
                self.fingerprint.map(Fingerprint::new),
            ),
            StorageKey::new(self.storage_key),
            self.locked_at,
            self.response,
        )
    }
}

fn backend(e: sqlx::Error) -> DriverError {
    DriverError::Backend(e.to_string())
}

impl PostgresStorageDriver {
    /// Connect to the database at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Backend`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, DriverError> {
        let pool = PgPool::connect(database_url).await.map_err(backend)?;
        Ok(Self::from_pool(pool))
    }

    /// Use an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the records table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Backend`] if the statement fails.
    pub async fn migrate(&self) -> Result<(), DriverError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS idempotent_requests (
                storage_key TEXT PRIMARY KEY,
                request_method TEXT NOT NULL,
                request_path TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                fingerprint TEXT,
                locked_at TIMESTAMPTZ,
                response JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        tracing::info!(table = TABLE_NAME, "Idempotent request table ready");
        Ok(())
    }

    async fn fetch(
        &self,
        storage_key: &StorageKey,
    ) -> Result<Option<IdempotentRecord>, DriverError> {
        let row = sqlx::query(
            r"
            SELECT storage_key, request_method, request_path, idempotency_key,
                   fingerprint, locked_at, response
            FROM idempotent_requests
            WHERE storage_key = $1
            ",
        )
        .bind(storage_key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(|row| Columns::from_row(&row)?.into_record())
            .transpose()
    }

    async fn upsert(&self, record: IdempotentRecord) -> Result<(), DriverError> {
        let columns = Columns::from_record(&record);
        sqlx::query(
            r"
            INSERT INTO idempotent_requests (
                storage_key, request_method, request_path, idempotency_key,
                fingerprint, locked_at, response
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (storage_key) DO UPDATE SET
                request_method = EXCLUDED.request_method,
                request_path = EXCLUDED.request_path,
                idempotency_key = EXCLUDED.idempotency_key,
                fingerprint = EXCLUDED.fingerprint,
                locked_at = EXCLUDED.locked_at,
                response = EXCLUDED.response
            ",
        )
        .bind(&columns.storage_key)
        .bind(&columns.request_method)
        .bind(&columns.request_path)
        .bind(&columns.idempotency_key)
        .bind(&columns.fingerprint)
        .bind(columns.locked_at)
        .bind(columns.response.as_ref().map(Json))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        tracing::trace!(
            storage_key = %columns.storage_key,
            state = record.state_name(),
            "Saved record"
        );
        Ok(())
    }

    async fn insert_new(&self, record: IdempotentRecord) -> Result<bool, DriverError> {
        let columns = Columns::from_record(&record);
        let result = sqlx::query(
            r"
            INSERT INTO idempotent_requests (
                storage_key, request_method, request_path, idempotency_key,
                fingerprint, locked_at, response
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (storage_key) DO NOTHING
            ",
        )
        .bind(&columns.storage_key)
        .bind(&columns.request_method)
        .bind(&columns.request_path)
        .bind(&columns.idempotency_key)
        .bind(&columns.fingerprint)
        .bind(columns.locked_at)
        .bind(columns.response.as_ref().map(Json))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() == 1)
    }
}

impl StorageDriver for PostgresStorageDriver {
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
        Box::pin(self.upsert(record))
    }

    fn insert_if_absent(
        &self,
        record: IdempotentRecord,
    ) -> Pin<Box<dyn Future<Output = Result<bool, DriverError>> + Send + '_>> {
        Box::pin(self.insert_new(record))
    }
}
