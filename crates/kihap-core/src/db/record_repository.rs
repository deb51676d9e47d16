//! Syncable record repository implementation

use chrono::{SecondsFormat, Utc};

use crate::error::{Error, Result};
use crate::models::{ConflictDirection, SyncConflict, SyncRecord, SyncTable, Watermark};
use libsql::Connection;

/// Rows written and rejected while applying a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub applied: usize,
    pub skipped: usize,
}

/// Trait for record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// Rows of `table` whose `updated_at` is strictly after `since`, oldest first
    async fn changed_since(&self, table: SyncTable, since: Watermark) -> Result<Vec<SyncRecord>>;

    /// Apply remote rows in one transaction with last-write-wins
    async fn apply_remote_batch(
        &self,
        table: SyncTable,
        records: &[SyncRecord],
    ) -> Result<ApplyOutcome>;

    /// Unconditional write of an application-layer change
    async fn upsert(&self, record: &SyncRecord) -> Result<()>;

    /// Fetch a single row by id
    async fn get(&self, table: SyncTable, id: &str) -> Result<Option<SyncRecord>>;

    /// Log local rows withheld from the remote store
    async fn record_push_conflicts(&self, conflicts: &[(SyncRecord, Watermark)]) -> Result<()>;

    /// Most recently resolved conflicts first
    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>>;

    /// Delete conflicts resolved before `resolved_before`, returning how many
    async fn prune_conflicts(&self, resolved_before: Watermark) -> Result<u64>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn collect_records(
        table: SyncTable,
        mut rows: libsql::Rows,
    ) -> Result<Vec<SyncRecord>> {
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(SyncRecord::from_sql_row(table, &row)?);
        }
        Ok(records)
    }

    /// Apply every row of the batch; the caller owns the transaction.
    async fn apply_rows(&self, table: SyncTable, records: &[SyncRecord]) -> Result<ApplyOutcome> {
        let upsert_sql = table.schema().conditional_upsert_sql();
        let conflict_sql = format!(
            "INSERT INTO sync_conflicts (
                table_name, record_id, kept_updated_at, rejected_updated_at,
                resolved_at, direction, strategy
             )
             SELECT ?1, id, updated_at, ?2, ?3, 'pull', 'lww' FROM {}
             WHERE id = ?4 AND julianday(updated_at) > julianday(?2)",
            table.name()
        );
        let resolved_at = now_iso();
        let mut outcome = ApplyOutcome::default();

        for record in records {
            if record.table != table {
                return Err(Error::InvalidRecord(format!(
                    "{} row {} found in {table} batch",
                    record.table, record.id
                )));
            }

            let changed = self.conn.execute(&upsert_sql, record.to_sql_params()?).await?;
            if changed > 0 {
                outcome.applied += 1;
                continue;
            }

            // Equal timestamps mean the same version arrived again; only a
            // strictly newer local row is logged.
            outcome.skipped += 1;
            let rejected = record
                .updated_at
                .to_rfc3339_opts(SecondsFormat::AutoSi, true);
            self.conn
                .execute(
                    &conflict_sql,
                    [
                        table.name(),
                        rejected.as_str(),
                        resolved_at.as_str(),
                        record.id.as_str(),
                    ],
                )
                .await?;
        }

        Ok(outcome)
    }
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn changed_since(&self, table: SyncTable, since: Watermark) -> Result<Vec<SyncRecord>> {
        let schema = table.schema();
        let sql = format!(
            "SELECT {} FROM {}
             WHERE julianday(updated_at) > julianday(?1)
             ORDER BY julianday(updated_at) ASC, id ASC",
            schema.select_list(),
            schema.name
        );
        let rows = self.conn.query(&sql, [since.to_iso_string()]).await?;
        Self::collect_records(table, rows).await
    }

    async fn apply_remote_batch(
        &self,
        table: SyncTable,
        records: &[SyncRecord],
    ) -> Result<ApplyOutcome> {
        if records.is_empty() {
            return Ok(ApplyOutcome::default());
        }

        self.conn.execute("BEGIN IMMEDIATE TRANSACTION", ()).await?;

        let outcome = match self.apply_rows(table, records).await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(error);
            }
        };

        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        Ok(outcome)
    }

    async fn upsert(&self, record: &SyncRecord) -> Result<()> {
        self.conn
            .execute(&record.table.schema().upsert_sql(), record.to_sql_params()?)
            .await?;
        Ok(())
    }

    async fn get(&self, table: SyncTable, id: &str) -> Result<Option<SyncRecord>> {
        let schema = table.schema();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            schema.select_list(),
            schema.name,
            schema.primary_key
        );
        let rows = self.conn.query(&sql, [id]).await?;
        Ok(Self::collect_records(table, rows).await?.pop())
    }

    async fn record_push_conflicts(&self, conflicts: &[(SyncRecord, Watermark)]) -> Result<()> {
        let resolved_at = now_iso();
        for (record, remote_updated_at) in conflicts {
            let rejected = record
                .updated_at
                .to_rfc3339_opts(SecondsFormat::AutoSi, true);
            let kept = remote_updated_at.to_iso_string();
            self.conn
                .execute(
                    "INSERT INTO sync_conflicts (
                        table_name, record_id, kept_updated_at, rejected_updated_at,
                        resolved_at, direction, strategy
                     ) VALUES (?1, ?2, ?3, ?4, ?5, 'push', 'lww')",
                    [
                        record.table.name(),
                        record.id.as_str(),
                        kept.as_str(),
                        rejected.as_str(),
                        resolved_at.as_str(),
                    ],
                )
                .await?;
        }
        Ok(())
    }

    async fn prune_conflicts(&self, resolved_before: Watermark) -> Result<u64> {
        let cutoff = resolved_before.to_iso_string();
        Ok(self
            .conn
            .execute(
                "DELETE FROM sync_conflicts WHERE julianday(resolved_at) < julianday(?1)",
                [cutoff.as_str()],
            )
            .await?)
    }

    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, table_name, record_id, kept_updated_at, rejected_updated_at,
                        resolved_at, direction, strategy
                 FROM sync_conflicts
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?1",
                [i64::try_from(limit).unwrap_or(i64::MAX)],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            let direction: String = row.get(6)?;
            conflicts.push(SyncConflict {
                id: row.get(0)?,
                table_name: row.get(1)?,
                record_id: row.get(2)?,
                kept_updated_at: row.get(3)?,
                rejected_updated_at: row.get(4)?,
                resolved_at: row.get(5)?,
                direction: ConflictDirection::parse(&direction).ok_or_else(|| {
                    Error::Database(format!("unknown conflict direction `{direction}`"))
                })?,
                strategy: row.get(7)?,
            });
        }
        Ok(conflicts)
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
