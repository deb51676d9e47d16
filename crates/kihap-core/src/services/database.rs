//! Shared database service wrapper used by the sync engine and the CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::db::{
    ApplyOutcome, Database, LibSqlRecordRepository, LibSqlWatermarkRepository, RecordRepository,
    WatermarkRepository,
};
use crate::models::{SyncConflict, SyncRecord, SyncTable, Watermark};
use crate::Result;

/// Thread-safe handle to the local store.
///
/// Every operation takes the lock for its whole duration, which makes the
/// local store single-writer: a batch apply never interleaves with another
/// write.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Opening local store at {}", db_path.display());
        let db = Database::open(&db_path).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Backing file, `None` for in-memory stores.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Stored watermark for a table, epoch when never synchronized.
    pub async fn watermark(&self, table: SyncTable) -> Result<Watermark> {
        let db = self.db.lock().await;
        let repo = LibSqlWatermarkRepository::new(db.connection());
        repo.get(table).await
    }

    /// Advance the watermark for a table. Older values are ignored.
    pub async fn set_watermark(&self, table: SyncTable, watermark: Watermark) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlWatermarkRepository::new(db.connection());
        repo.set(table, watermark).await
    }

    /// Forget a table's watermark so the next round pulls everything.
    pub async fn reset_watermark(&self, table: SyncTable) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlWatermarkRepository::new(db.connection());
        repo.reset(table).await
    }

    /// Watermarks of every syncable table, in pass order.
    pub async fn watermarks(&self) -> Result<Vec<(SyncTable, Watermark)>> {
        let db = self.db.lock().await;
        let repo = LibSqlWatermarkRepository::new(db.connection());
        let mut watermarks = Vec::with_capacity(SyncTable::ALL.len());
        for table in SyncTable::ALL {
            watermarks.push((table, repo.get(table).await?));
        }
        Ok(watermarks)
    }

    /// Local rows changed strictly after `since`.
    pub async fn changed_since(
        &self,
        table: SyncTable,
        since: Watermark,
    ) -> Result<Vec<SyncRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.changed_since(table, since).await
    }

    /// Apply a remote batch in one transaction with last-write-wins.
    pub async fn apply_remote_batch(
        &self,
        table: SyncTable,
        records: &[SyncRecord],
    ) -> Result<ApplyOutcome> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.apply_remote_batch(table, records).await
    }

    /// Write a row on behalf of the application layer.
    pub async fn upsert_record(&self, record: &SyncRecord) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.upsert(record).await
    }

    /// Fetch a row by id.
    pub async fn get_record(&self, table: SyncTable, id: &str) -> Result<Option<SyncRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.get(table, id).await
    }

    /// Log local rows the remote store kept its own newer copy of.
    pub async fn record_push_conflicts(&self, conflicts: &[(SyncRecord, Watermark)]) -> Result<()> {
        if conflicts.is_empty() {
            return Ok(());
        }
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.record_push_conflicts(conflicts).await
    }

    /// Delete logged conflicts older than `retention`.
    pub async fn prune_conflicts(&self, retention: Duration) -> Result<u64> {
        let cutoff = Watermark::now().rewind(retention);
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.prune_conflicts(cutoff).await
    }

    /// List recently resolved sync conflicts.
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.list_conflicts(limit).await
    }
}
