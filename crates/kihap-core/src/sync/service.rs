//! Sync rounds and passes over every table

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::config::{FailurePolicy, SyncOptions};
use crate::error::{Error, ErrorKind, Result};
use crate::models::{PassReport, SyncResult, SyncTable, TableOutcome, TableStatus, Watermark};
use crate::remote::RemoteStore;
use crate::services::DatabaseService;

use super::cancel::CancelToken;
use super::puller::ChangePuller;
use super::reconciler::Reconciler;

/// Owns both stores and runs sync rounds between them.
///
/// Construct it once at startup and share it (usually behind an `Arc`) with
/// whatever drives it.
pub struct SyncService<R> {
    local: DatabaseService,
    remote: R,
    options: SyncOptions,
    running: Arc<Mutex<HashSet<SyncTable>>>,
}

/// Marks a table as having a round in flight until dropped.
struct RoundGuard {
    table: SyncTable,
    running: Arc<Mutex<HashSet<SyncTable>>>,
}

impl Drop for RoundGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.table);
    }
}

impl<R: RemoteStore> SyncService<R> {
    pub fn new(local: DatabaseService, remote: R, options: SyncOptions) -> Self {
        Self {
            local,
            remote,
            options,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub const fn local(&self) -> &DatabaseService {
        &self.local
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    pub const fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn claim(&self, table: SyncTable) -> Option<RoundGuard> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        running.insert(table).then(|| RoundGuard {
            table,
            running: Arc::clone(&self.running),
        })
    }

    /// Run one round for a table by its name.
    pub async fn sync_table_by_name(&self, name: &str, cancel: &CancelToken) -> Result<SyncResult> {
        let table: SyncTable = name.parse()?;
        self.sync_table(table, cancel).await
    }

    /// Run one round for a table: pull both deltas, reconcile them, and
    /// advance the watermark.
    ///
    /// Fails with `RoundInProgress` when a round for the same table is
    /// already running.
    pub async fn sync_table(&self, table: SyncTable, cancel: &CancelToken) -> Result<SyncResult> {
        let Some(_guard) = self.claim(table) else {
            return Err(Error::RoundInProgress(table));
        };
        cancel.check()?;

        let round_start = Watermark::now();
        let stored = self.local.watermark(table).await?;
        let since = stored.rewind(self.options.watermark_lookback);

        let puller = ChangePuller::new(&self.local, &self.remote, &self.options);
        let remote_changes = puller.pull_remote(table, since, cancel).await?;
        let local_changes = puller.pull_local(table, since).await?;

        Reconciler::new(&self.local, &self.remote, &self.options)
            .reconcile(table, round_start, &remote_changes, &local_changes, cancel)
            .await
    }

    /// Run one round for a table and report it as a pass would.
    ///
    /// A busy table is reported as skipped rather than failed.
    pub async fn table_outcome(&self, table: SyncTable, cancel: &CancelToken) -> TableOutcome {
        let started = Instant::now();
        let status = match self.sync_table(table, cancel).await {
            Ok(result) => TableStatus::Synced(result),
            Err(Error::RoundInProgress(_)) => {
                tracing::warn!("Skipping {table}: previous round still running");
                TableStatus::Skipped {
                    reason: "round already running".to_string(),
                }
            }
            Err(error) => {
                tracing::error!("Sync round for {table} failed: {error}");
                TableStatus::Failed {
                    kind: error.kind(),
                    message: error.to_string(),
                }
            }
        };
        TableOutcome {
            table,
            status,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Run one pass over every table in order and report each outcome.
    ///
    /// Under `FailurePolicy::Isolate` a failed table does not stop the pass.
    /// Under `FailurePolicy::FailFast`, and always after cancellation, the
    /// remaining tables are reported as not attempted. Conflicts older than
    /// the retention window are pruned at the end of every pass.
    pub async fn sync_all(&self, cancel: &CancelToken) -> PassReport {
        let pass_id = Uuid::now_v7();
        let started_at = Utc::now();
        let mut outcomes = Vec::with_capacity(SyncTable::ALL.len());
        let mut halted = false;

        for table in SyncTable::ALL {
            if halted {
                outcomes.push(TableOutcome {
                    table,
                    status: TableStatus::NotAttempted,
                    duration_ms: 0,
                });
                continue;
            }

            let outcome = self.table_outcome(table, cancel).await;
            if let TableStatus::Failed { kind, .. } = &outcome.status {
                halted = *kind == ErrorKind::Cancelled
                    || self.options.failure_policy == FailurePolicy::FailFast;
            }
            outcomes.push(outcome);
        }

        match self.local.prune_conflicts(self.options.conflict_retention).await {
            Ok(0) => {}
            Ok(pruned) => tracing::debug!("Pruned {pruned} expired sync conflicts"),
            Err(error) => tracing::warn!("Failed to prune sync conflicts: {error}"),
        }

        let report = PassReport {
            pass_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        let totals = report.totals();
        tracing::info!(
            "Sync pass {pass_id} finished: {} failed, {} remote rows applied, {} local rows pushed",
            report.failures().count(),
            totals.remote_applied,
            totals.local_applied
        );
        report
    }
}
