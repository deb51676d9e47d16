//! Delta computation for one table

use crate::config::SyncOptions;
use crate::error::{Error, Result};
use crate::models::{SyncRecord, SyncTable, Watermark};
use crate::remote::{PageCursor, RemoteStore};
use crate::services::DatabaseService;

use super::cancel::{bounded, CancelToken};

/// Reads the rows changed since a watermark on both sides.
pub struct ChangePuller<'a, R> {
    local: &'a DatabaseService,
    remote: &'a R,
    options: &'a SyncOptions,
}

impl<'a, R: RemoteStore> ChangePuller<'a, R> {
    pub const fn new(local: &'a DatabaseService, remote: &'a R, options: &'a SyncOptions) -> Self {
        Self {
            local,
            remote,
            options,
        }
    }

    /// Remote rows with `updated_at` strictly after `since`.
    ///
    /// Pages are requested after the last `(updated_at, id)` seen until one
    /// comes back empty, so rows edited mid-pull are fetched again rather than
    /// skipped. Each page is bounded by the request timeout on its own.
    pub async fn pull_remote(
        &self,
        table: SyncTable,
        since: Watermark,
        cancel: &CancelToken,
    ) -> Result<Vec<SyncRecord>> {
        let mut records = Vec::new();
        let mut cursor = PageCursor::Since(since);
        let mut pages = 0_usize;

        loop {
            let page = bounded(
                "remote select",
                self.options.request_timeout,
                cancel,
                self.remote.select_page(table, &cursor),
            )
            .await?;
            let Some(last) = page.last() else {
                break;
            };
            if !cursor.admits(last) {
                return Err(Error::RemoteUnavailable(format!(
                    "{table} page did not advance past {cursor:?}"
                )));
            }

            cursor = PageCursor::after(last);
            records.extend(page);
            pages += 1;
        }

        tracing::debug!(
            "Pulled {} remote {table} rows in {pages} pages since {since}",
            records.len()
        );
        Ok(records)
    }

    /// Local rows with `updated_at` strictly after `since`, compared as
    /// instants rather than strings.
    pub async fn pull_local(&self, table: SyncTable, since: Watermark) -> Result<Vec<SyncRecord>> {
        self.local.changed_since(table, since).await
    }
}
