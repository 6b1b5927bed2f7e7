//! Append-only ledger of published model versions
//!
//! Queries distinguish a confirmed-empty ledger (`Ok(None)`) from a failed
//! query (`Err`), so callers never mistake an outage for an empty registry.

use super::StoreError;
use crate::models::ModelVersionRecord;
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::info;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Most recently uploaded record
    async fn latest_by_upload_date(&self) -> Result<Option<ModelVersionRecord>, StoreError>;

    /// Record with the highest version number
    async fn latest_by_version(&self) -> Result<Option<ModelVersionRecord>, StoreError>;

    async fn insert(&self, record: &ModelVersionRecord) -> Result<(), StoreError>;

    /// Every record, ordered by version
    async fn all(&self) -> Result<Vec<ModelVersionRecord>, StoreError>;
}

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS model_versions (
    version INTEGER NOT NULL,
    upload_date INTEGER NOT NULL,
    model_file_url TEXT NOT NULL,
    checksum TEXT
)";

const SELECT_COLUMNS: &str = "SELECT version, upload_date, model_file_url, checksum FROM model_versions";

type LedgerRow = (i64, i64, String, Option<String>);

fn record_from_row((version, upload_date, model_file_url, checksum): LedgerRow) -> Result<ModelVersionRecord, StoreError> {
    let version = u32::try_from(version)
        .map_err(|_| StoreError::InvalidRow(format!("version {} out of range", version)))?;
    let upload_date = DateTime::from_timestamp_micros(upload_date)
        .ok_or_else(|| StoreError::InvalidRow(format!("upload_date {} out of range", upload_date)))?;

    Ok(ModelVersionRecord {
        version,
        upload_date,
        model_file_url,
        checksum,
    })
}

/// Ledger backed by a SQLite database through a shared connection pool
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open the pool and create the ledger table if missing
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every in-memory connection is a separate database, so keep exactly one alive
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        info!("Ledger table ready");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_first(&self, order_by: &str) -> Result<Option<ModelVersionRecord>, StoreError> {
        let sql = format!("{} ORDER BY {} LIMIT 1", SELECT_COLUMNS, order_by);
        sqlx::query_as::<_, LedgerRow>(&sql)
            .fetch_optional(&self.pool)
            .await?
            .map(record_from_row)
            .transpose()
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn latest_by_upload_date(&self) -> Result<Option<ModelVersionRecord>, StoreError> {
        self.fetch_first("upload_date DESC, rowid DESC").await
    }

    async fn latest_by_version(&self) -> Result<Option<ModelVersionRecord>, StoreError> {
        self.fetch_first("version DESC, rowid DESC").await
    }

    async fn insert(&self, record: &ModelVersionRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO model_versions (version, upload_date, model_file_url, checksum) VALUES (?, ?, ?, ?)",
        )
        .bind(i64::from(record.version))
        .bind(record.upload_date.timestamp_micros())
        .bind(record.model_file_url.as_str())
        .bind(record.checksum.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<ModelVersionRecord>, StoreError> {
        let sql = format!("{} ORDER BY version ASC, rowid ASC", SELECT_COLUMNS);
        sqlx::query_as::<_, LedgerRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(record_from_row)
            .collect()
    }
}

/// In-process ledger, used for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: RwLock<Vec<ModelVersionRecord>>,
    unavailable: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, simulating an outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory ledger".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn latest_by_upload_date(&self) -> Result<Option<ModelVersionRecord>, StoreError> {
        self.check_available()?;
        // max_by keeps the last of equal elements, i.e. the latest insert
        Ok(self
            .records
            .read()
            .await
            .iter()
            .max_by(|a, b| a.upload_date.cmp(&b.upload_date))
            .cloned())
    }

    async fn latest_by_version(&self) -> Result<Option<ModelVersionRecord>, StoreError> {
        self.check_available()?;
        Ok(self
            .records
            .read()
            .await
            .iter()
            .max_by_key(|r| r.version)
            .cloned())
    }

    async fn insert(&self, record: &ModelVersionRecord) -> Result<(), StoreError> {
        self.check_available()?;
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn all(&self) -> Result<Vec<ModelVersionRecord>, StoreError> {
        self.check_available()?;
        let mut records = self.records.read().await.clone();
        records.sort_by_key(|r| r.version);
        Ok(records)
    }
}
