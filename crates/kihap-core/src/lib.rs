//! kihap-core - Core library for Kihap sync
//!
//! Keeps the academy tables of the local libSQL store and the hosted Supabase
//! database in step, using per-table watermarks and last-write-wins on
//! `updated_at`.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod sync;

pub use config::{FailurePolicy, RemotePushPolicy, RemoteSettings, SyncOptions, SyncSettings};
pub use error::{Error, ErrorKind, Result};
pub use models::{PassReport, SyncRecord, SyncResult, SyncTable, TableStatus, Watermark};
pub use remote::{MemoryRemoteStore, RemoteStore, SupabaseRestClient};
pub use services::DatabaseService;
pub use sync::{CancelHandle, CancelToken, SchedulerHandle, SyncScheduler, SyncService};
