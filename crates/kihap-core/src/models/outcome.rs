//! Sync round and pass reporting

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::table::SyncTable;
use crate::error::ErrorKind;

/// Row counts of one completed sync round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    /// Remote rows written into the local store
    pub remote_applied: usize,
    /// Remote rows rejected because the local copy was at least as new
    pub remote_skipped: usize,
    /// Local rows pushed to the remote store
    pub local_applied: usize,
    /// Local rows withheld because the remote copy was at least as new
    pub local_skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    Synced(SyncResult),
    Skipped { reason: String },
    Failed { kind: ErrorKind, message: String },
    /// A previous table failed under the fail-fast policy
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableOutcome {
    pub table: SyncTable,
    #[serde(flatten)]
    pub status: TableStatus,
    pub duration_ms: u64,
}

impl TableOutcome {
    pub const fn is_failure(&self) -> bool {
        matches!(self.status, TableStatus::Failed { .. })
    }
}

/// Result of one pass over every syncable table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<TableOutcome>,
}

impl PassReport {
    /// True when no table failed. Skipped and not-attempted tables are not failures.
    pub fn is_success(&self) -> bool {
        !self.outcomes.iter().any(TableOutcome::is_failure)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TableOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.is_failure())
    }

    pub fn outcome(&self, table: SyncTable) -> Option<&TableOutcome> {
        self.outcomes.iter().find(|outcome| outcome.table == table)
    }

    /// Totals across every synced table.
    pub fn totals(&self) -> SyncResult {
        self.outcomes
            .iter()
            .filter_map(|outcome| match outcome.status {
                TableStatus::Synced(result) => Some(result),
                _ => None,
            })
            .fold(SyncResult::default(), |total, result| SyncResult {
                remote_applied: total.remote_applied + result.remote_applied,
                remote_skipped: total.remote_skipped + result.remote_skipped,
                local_applied: total.local_applied + result.local_applied,
                local_skipped: total.local_skipped + result.local_skipped,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn outcome(table: SyncTable, status: TableStatus) -> TableOutcome {
        TableOutcome {
            table,
            status,
            duration_ms: 1,
        }
    }

    #[test]
    fn report_summarizes_outcomes() {
        let report = PassReport {
            pass_id: Uuid::now_v7(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcomes: vec![
                outcome(
                    SyncTable::Leads,
                    TableStatus::Synced(SyncResult {
                        remote_applied: 2,
                        local_applied: 1,
                        ..SyncResult::default()
                    }),
                ),
                outcome(
                    SyncTable::Students,
                    TableStatus::Failed {
                        kind: ErrorKind::RemoteUnavailable,
                        message: "HTTP 503".to_string(),
                    },
                ),
                outcome(SyncTable::Users, TableStatus::NotAttempted),
            ],
        };

        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.totals().remote_applied, 2);
        assert_eq!(
            report.outcome(SyncTable::Users).map(|o| &o.status),
            Some(&TableStatus::NotAttempted)
        );
    }

    #[test]
    fn outcome_serializes_flat() {
        let value = serde_json::to_value(outcome(
            SyncTable::Units,
            TableStatus::Skipped {
                reason: "round already running".to_string(),
            },
        ))
        .unwrap();
        assert_eq!(value["table"], "units");
        assert_eq!(value["status"], "skipped");
        assert_eq!(value["reason"], "round already running");
    }
}
