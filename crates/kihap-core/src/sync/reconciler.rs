//! Applies both deltas of a round and advances the watermark

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::{RemotePushPolicy, SyncOptions};
use crate::error::Result;
use crate::models::{SyncRecord, SyncResult, SyncTable, Watermark};
use crate::remote::RemoteStore;
use crate::services::DatabaseService;

use super::cancel::{bounded, CancelToken};

/// Moves one round's deltas across and advances the table's watermark.
///
/// Steps run in a fixed order: the remote batch is applied locally in one
/// transaction, local changes are pushed in one upsert call, and only then is
/// the watermark set to the round start. Any failure returns early and leaves
/// the watermark where it was, so the next round retries the same window.
pub struct Reconciler<'a, R> {
    local: &'a DatabaseService,
    remote: &'a R,
    options: &'a SyncOptions,
}

impl<'a, R: RemoteStore> Reconciler<'a, R> {
    pub const fn new(local: &'a DatabaseService, remote: &'a R, options: &'a SyncOptions) -> Self {
        Self {
            local,
            remote,
            options,
        }
    }

    pub async fn reconcile(
        &self,
        table: SyncTable,
        round_start: Watermark,
        remote_changes: &[SyncRecord],
        local_changes: &[SyncRecord],
        cancel: &CancelToken,
    ) -> Result<SyncResult> {
        let mut result = SyncResult::default();

        if !remote_changes.is_empty() {
            cancel.check()?;
            let applied = self.local.apply_remote_batch(table, remote_changes).await?;
            result.remote_applied = applied.applied;
            result.remote_skipped = applied.skipped;
        }

        if !local_changes.is_empty() {
            let (pushed, withheld) = self
                .push_local(table, remote_changes, local_changes, cancel)
                .await?;
            result.local_applied = pushed;
            result.local_skipped = withheld;
        }

        self.local.set_watermark(table, round_start).await?;

        tracing::debug!(
            "{table}: applied {}/{} remote rows, pushed {}/{} local rows",
            result.remote_applied,
            remote_changes.len(),
            result.local_applied,
            local_changes.len()
        );
        Ok(result)
    }

    /// Push local rows the remote store does not already hold a newer or
    /// equal version of. Returns pushed and withheld counts.
    async fn push_local(
        &self,
        table: SyncTable,
        remote_changes: &[SyncRecord],
        local_changes: &[SyncRecord],
        cancel: &CancelToken,
    ) -> Result<(usize, usize)> {
        // Rows pulled this round already lost to the remote copy locally.
        let mut remote_versions: HashMap<String, DateTime<Utc>> = remote_changes
            .iter()
            .map(|record| (record.id.clone(), record.updated_at))
            .collect();

        if self.options.push_policy == RemotePushPolicy::NewerOnly {
            let ids: Vec<String> = local_changes.iter().map(|record| record.id.clone()).collect();
            let current = bounded(
                "remote version lookup",
                self.options.request_timeout,
                cancel,
                self.remote.fetch_versions(table, &ids),
            )
            .await?;
            remote_versions.extend(current);
        }

        let mut outgoing = Vec::with_capacity(local_changes.len());
        let mut conflicts = Vec::new();
        let mut withheld = 0;
        for record in local_changes {
            match remote_versions.get(&record.id) {
                Some(remote) if *remote >= record.updated_at => {
                    withheld += 1;
                    if *remote > record.updated_at {
                        conflicts.push((record.clone(), Watermark::from_datetime(*remote)));
                    }
                }
                _ => outgoing.push(record.clone()),
            }
        }

        if !outgoing.is_empty() {
            bounded(
                "remote upsert",
                self.options.request_timeout,
                cancel,
                self.remote.upsert(table, &outgoing),
            )
            .await?;
        }

        if !conflicts.is_empty() {
            tracing::warn!(
                "{table}: kept {} newer remote rows over local changes",
                conflicts.len()
            );
            self.local.record_push_conflicts(&conflicts).await?;
        }

        Ok((outgoing.len(), withheld))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::ConflictDirection;
    use crate::remote::{MemoryRemoteStore, RemoteFault, RemoteOperation};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn lead(id: &str, status: &str, updated_at: &str) -> SyncRecord {
        SyncRecord::from_json(
            SyncTable::Leads,
            json!({ "id": id, "status": status, "updated_at": updated_at }),
        )
        .unwrap()
    }

    fn round_start() -> Watermark {
        Watermark::parse("2024-06-01T00:00:00Z").unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reconcile_moves_both_deltas_and_sets_watermark() {
        let local = DatabaseService::open_in_memory().await.unwrap();
        let remote = MemoryRemoteStore::new();
        let options = SyncOptions::default();
        let reconciler = Reconciler::new(&local, &remote, &options);

        let incoming = lead("R1", "novo", "2024-01-02T00:00:00Z");
        let outgoing = lead("L1", "contato", "2024-01-03T00:00:00Z");
        local.upsert_record(&outgoing).await.unwrap();

        let result = reconciler
            .reconcile(
                SyncTable::Leads,
                round_start(),
                std::slice::from_ref(&incoming),
                std::slice::from_ref(&outgoing),
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert_eq!(
            result,
            SyncResult {
                remote_applied: 1,
                remote_skipped: 0,
                local_applied: 1,
                local_skipped: 0,
            }
        );
        assert_eq!(
            local.get_record(SyncTable::Leads, "R1").await.unwrap(),
            Some(incoming)
        );
        assert_eq!(remote.get(SyncTable::Leads, "L1").await, Some(outgoing));
        assert_eq!(local.watermark(SyncTable::Leads).await.unwrap(), round_start());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn newer_only_withholds_stale_local_rows() {
        let local = DatabaseService::open_in_memory().await.unwrap();
        let remote = MemoryRemoteStore::new();
        let options = SyncOptions::default();
        remote.insert(lead("L1", "matriculado", "2024-02-01T00:00:00Z")).await;

        let stale = lead("L1", "contato", "2024-01-03T00:00:00Z");
        let result = Reconciler::new(&local, &remote, &options)
            .reconcile(
                SyncTable::Leads,
                round_start(),
                &[],
                std::slice::from_ref(&stale),
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert_eq!(result.local_applied, 0);
        assert_eq!(result.local_skipped, 1);
        let kept = remote.get(SyncTable::Leads, "L1").await.unwrap();
        assert_eq!(kept.get("status"), Some(&json!("matriculado")));

        let conflicts = local.list_conflicts(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].direction, ConflictDirection::Push);
        assert_eq!(conflicts[0].record_id, "L1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overwrite_policy_pushes_unconditionally() {
        let local = DatabaseService::open_in_memory().await.unwrap();
        let remote = MemoryRemoteStore::new();
        let options = SyncOptions {
            push_policy: RemotePushPolicy::Overwrite,
            ..SyncOptions::default()
        };
        remote.insert(lead("L1", "matriculado", "2024-02-01T00:00:00Z")).await;

        let stale = lead("L1", "contato", "2024-01-03T00:00:00Z");
        Reconciler::new(&local, &remote, &options)
            .reconcile(
                SyncTable::Leads,
                round_start(),
                &[],
                std::slice::from_ref(&stale),
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert_eq!(remote.get(SyncTable::Leads, "L1").await, Some(stale));
        assert!(!remote
            .calls()
            .await
            .iter()
            .any(|(operation, _)| *operation == RemoteOperation::FetchVersions));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rows_superseded_by_the_pulled_batch_are_not_pushed_back() {
        let local = DatabaseService::open_in_memory().await.unwrap();
        let remote = MemoryRemoteStore::new();
        let options = SyncOptions {
            push_policy: RemotePushPolicy::Overwrite,
            ..SyncOptions::default()
        };

        let local_copy = lead("L1", "contato", "2024-01-03T00:00:00Z");
        let remote_copy = lead("L1", "perdido", "2024-01-04T00:00:00Z");
        local.upsert_record(&local_copy).await.unwrap();
        remote.insert(remote_copy.clone()).await;

        let result = Reconciler::new(&local, &remote, &options)
            .reconcile(
                SyncTable::Leads,
                round_start(),
                std::slice::from_ref(&remote_copy),
                std::slice::from_ref(&local_copy),
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert_eq!(result.remote_applied, 1);
        assert_eq!(result.local_skipped, 1);
        assert_eq!(
            local.get_record(SyncTable::Leads, "L1").await.unwrap(),
            Some(remote_copy.clone())
        );
        assert_eq!(remote.get(SyncTable::Leads, "L1").await, Some(remote_copy));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_push_keeps_watermark_but_commits_remote_batch() {
        let local = DatabaseService::open_in_memory().await.unwrap();
        let remote = MemoryRemoteStore::new();
        let options = SyncOptions::default();
        remote
            .inject_fault(
                SyncTable::Leads,
                RemoteOperation::Upsert,
                RemoteFault::Unavailable("HTTP 503".to_string()),
            )
            .await;

        let incoming = lead("R1", "novo", "2024-01-02T00:00:00Z");
        let outgoing = lead("L1", "contato", "2024-01-03T00:00:00Z");
        let error = Reconciler::new(&local, &remote, &options)
            .reconcile(
                SyncTable::Leads,
                round_start(),
                std::slice::from_ref(&incoming),
                std::slice::from_ref(&outgoing),
                &CancelToken::never(),
            )
            .await
            .unwrap_err();

        assert!(matches!(error, Error::RemoteUnavailable(_)));
        assert_eq!(
            local.watermark(SyncTable::Leads).await.unwrap(),
            Watermark::EPOCH
        );
        // The remote batch stays committed; the retry reapplies it as a no-op
        assert!(local
            .get_record(SyncTable::Leads, "R1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_round_still_advances_watermark() {
        let local = DatabaseService::open_in_memory().await.unwrap();
        let remote = MemoryRemoteStore::new();
        let options = SyncOptions::default();

        let result = Reconciler::new(&local, &remote, &options)
            .reconcile(
                SyncTable::Units,
                round_start(),
                &[],
                &[],
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert_eq!(result, SyncResult::default());
        assert!(remote.calls().await.is_empty());
        assert_eq!(local.watermark(SyncTable::Units).await.unwrap(), round_start());
    }
}
