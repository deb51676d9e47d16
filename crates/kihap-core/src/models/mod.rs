//! Data models for Kihap sync

mod outcome;
mod record;
mod sync_conflict;
mod table;
mod watermark;

pub use outcome::{PassReport, SyncResult, TableOutcome, TableStatus};
pub use record::{parse_timestamp, SyncRecord};
pub use sync_conflict::{ConflictDirection, SyncConflict};
pub use table::{Column, ColumnKind, SyncTable, TableSchema};
pub use watermark::Watermark;
