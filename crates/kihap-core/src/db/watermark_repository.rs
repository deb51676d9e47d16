//! Watermark repository implementation

use crate::error::Result;
use crate::models::{SyncTable, Watermark};
use libsql::Connection;

/// Trait for per-table watermark storage (async)
#[allow(async_fn_in_trait)]
pub trait WatermarkRepository {
    /// Stored watermark for `table`, or [`Watermark::EPOCH`] when none exists
    async fn get(&self, table: SyncTable) -> Result<Watermark>;

    /// Upsert the watermark for `table`. Never moves it backwards.
    async fn set(&self, table: SyncTable, watermark: Watermark) -> Result<()>;

    /// Forget the watermark so the next round pulls the full table
    async fn reset(&self, table: SyncTable) -> Result<()>;
}

/// libSQL implementation of `WatermarkRepository`, backed by `sync_meta`
pub struct LibSqlWatermarkRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlWatermarkRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl WatermarkRepository for LibSqlWatermarkRepository<'_> {
    async fn get(&self, table: SyncTable) -> Result<Watermark> {
        let key = table.watermark_key();
        let mut rows = self
            .conn
            .query("SELECT value FROM sync_meta WHERE key = ?1", [key.as_str()])
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(Watermark::EPOCH);
        };
        let value: String = row.get(0)?;

        match Watermark::parse(&value) {
            Ok(watermark) => Ok(watermark),
            Err(error) => {
                tracing::warn!("Ignoring unreadable watermark {key}={value}: {error}");
                Ok(Watermark::EPOCH)
            }
        }
    }

    async fn set(&self, table: SyncTable, watermark: Watermark) -> Result<()> {
        let key = table.watermark_key();
        let value = watermark.to_iso_string();
        self.conn
            .execute(
                "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value
                 WHERE julianday(sync_meta.value) IS NULL
                    OR julianday(excluded.value) >= julianday(sync_meta.value)",
                [key.as_str(), value.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn reset(&self, table: SyncTable) -> Result<()> {
        let key = table.watermark_key();
        self.conn
            .execute("DELETE FROM sync_meta WHERE key = ?1", [key.as_str()])
            .await?;
        Ok(())
    }
}
