//! Remote store access
//!
//! The sync engine talks to the hosted database through [`RemoteStore`].
//! [`SupabaseRestClient`] is the production implementation over PostgREST;
//! [`MemoryRemoteStore`] is an in-process stand-in with fault injection.

mod memory;
mod postgrest;

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{SyncRecord, SyncTable, Watermark};

pub use memory::{MemoryRemoteStore, RemoteFault, RemoteOperation};
pub use postgrest::SupabaseRestClient;

/// Position in a table's `(updated_at, id)` order from which the next page
/// of changed rows starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// Rows with `updated_at` strictly after the watermark
    Since(Watermark),
    /// Rows ordered strictly after the last row of the previous page
    After {
        updated_at: DateTime<Utc>,
        id: String,
    },
}

impl PageCursor {
    /// Cursor positioned on `record`, so the next page starts after it.
    pub fn after(record: &SyncRecord) -> Self {
        Self::After {
            updated_at: record.updated_at,
            id: record.id.clone(),
        }
    }

    /// True when `record` lies strictly past this cursor.
    pub fn admits(&self, record: &SyncRecord) -> bool {
        match self {
            Self::Since(since) => record.updated_at > since.as_datetime(),
            Self::After { updated_at, id } => {
                (record.updated_at, record.id.as_str()) > (*updated_at, id.as_str())
            }
        }
    }
}

/// Remote copy of the syncable tables.
pub trait RemoteStore: Send + Sync {
    /// One page of rows of `table` past `cursor`, ordered by
    /// `(updated_at, id)`. The page may hold fewer rows than the store's page
    /// size even when more follow; only an empty page ends a pull.
    fn select_page(
        &self,
        table: SyncTable,
        cursor: &PageCursor,
    ) -> impl Future<Output = Result<Vec<SyncRecord>>> + Send;

    /// Current `updated_at` of each id that exists remotely. Missing ids are absent.
    fn fetch_versions(
        &self,
        table: SyncTable,
        ids: &[String],
    ) -> impl Future<Output = Result<HashMap<String, DateTime<Utc>>>> + Send;

    /// Insert or overwrite rows keyed by `id`, as one request.
    fn upsert(
        &self,
        table: SyncTable,
        records: &[SyncRecord],
    ) -> impl Future<Output = Result<()>> + Send;
}
