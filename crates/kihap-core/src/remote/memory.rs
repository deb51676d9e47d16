//! In-process remote store

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{PageCursor, RemoteStore};
use crate::error::{Error, Result};
use crate::models::{SyncRecord, SyncTable};

/// The calls a [`RemoteStore`] serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOperation {
    Select,
    FetchVersions,
    Upsert,
}

/// Failure injected into a table's remote calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFault {
    /// The call fails with `RemoteUnavailable`
    Unavailable(String),
    /// The call never completes
    Hang,
    /// The call succeeds after a delay
    Delay(Duration),
}

/// Rows per page served by `select_page` unless configured otherwise.
const DEFAULT_PAGE_SIZE: usize = 1_000;

#[derive(Debug, Default)]
struct State {
    tables: HashMap<SyncTable, BTreeMap<String, SyncRecord>>,
    faults: HashMap<(SyncTable, RemoteOperation), RemoteFault>,
    calls: Vec<(RemoteOperation, SyncTable)>,
}

/// Remote store kept in memory. Upserts overwrite unconditionally, like a
/// PostgREST `merge-duplicates` upsert, and pages are capped like a server
/// with `max-rows` set.
#[derive(Debug, Clone)]
pub struct MemoryRemoteStore {
    state: Arc<Mutex<State>>,
    page_size: usize,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve at most `page_size` rows per `select_page` call.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Store a row as if another client had written it.
    pub async fn insert(&self, record: SyncRecord) {
        let mut state = self.state.lock().await;
        state
            .tables
            .entry(record.table)
            .or_default()
            .insert(record.id.clone(), record);
    }

    pub async fn get(&self, table: SyncTable, id: &str) -> Option<SyncRecord> {
        let state = self.state.lock().await;
        state.tables.get(&table)?.get(id).cloned()
    }

    /// Every row of a table, ordered by id.
    pub async fn records(&self, table: SyncTable) -> Vec<SyncRecord> {
        let state = self.state.lock().await;
        state
            .tables
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Make one operation on one table fail until cleared.
    pub async fn inject_fault(
        &self,
        table: SyncTable,
        operation: RemoteOperation,
        fault: RemoteFault,
    ) {
        let mut state = self.state.lock().await;
        state.faults.insert((table, operation), fault);
    }

    /// Make every operation on a table fail with `RemoteUnavailable`.
    pub async fn fail_table(&self, table: SyncTable, message: &str) {
        for operation in [
            RemoteOperation::Select,
            RemoteOperation::FetchVersions,
            RemoteOperation::Upsert,
        ] {
            self.inject_fault(table, operation, RemoteFault::Unavailable(message.to_string()))
                .await;
        }
    }

    pub async fn clear_faults(&self) {
        self.state.lock().await.faults.clear();
    }

    /// Calls received so far, in order.
    pub async fn calls(&self) -> Vec<(RemoteOperation, SyncTable)> {
        self.state.lock().await.calls.clone()
    }

    /// Record the call and apply any injected fault.
    async fn enter(&self, table: SyncTable, operation: RemoteOperation) -> Result<()> {
        let fault = {
            let mut state = self.state.lock().await;
            state.calls.push((operation, table));
            state.faults.get(&(table, operation)).cloned()
        };

        match fault {
            None => Ok(()),
            Some(RemoteFault::Unavailable(message)) => Err(Error::RemoteUnavailable(message)),
            Some(RemoteFault::Hang) => std::future::pending().await,
            Some(RemoteFault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

impl RemoteStore for MemoryRemoteStore {
    async fn select_page(&self, table: SyncTable, cursor: &PageCursor) -> Result<Vec<SyncRecord>> {
        self.enter(table, RemoteOperation::Select).await?;

        let state = self.state.lock().await;
        let mut changed: Vec<SyncRecord> = state
            .tables
            .get(&table)
            .map(|rows| {
                rows.values()
                    .filter(|record| cursor.admits(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        changed.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        changed.truncate(self.page_size);
        Ok(changed)
    }

    async fn fetch_versions(
        &self,
        table: SyncTable,
        ids: &[String],
    ) -> Result<HashMap<String, DateTime<Utc>>> {
        self.enter(table, RemoteOperation::FetchVersions).await?;

        let state = self.state.lock().await;
        let Some(rows) = state.tables.get(&table) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id).map(|record| (id.clone(), record.updated_at)))
            .collect())
    }

    async fn upsert(&self, table: SyncTable, records: &[SyncRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.enter(table, RemoteOperation::Upsert).await?;

        if let Some(record) = records.iter().find(|record| record.table != table) {
            return Err(Error::InvalidRecord(format!(
                "{} row {} sent to {table}",
                record.table, record.id
            )));
        }

        let mut state = self.state.lock().await;
        let rows = state.tables.entry(table).or_default();
        for record in records {
            rows.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }
}
