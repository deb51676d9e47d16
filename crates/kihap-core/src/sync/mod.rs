//! Bidirectional sync engine
//!
//! A round synchronizes one table: remote and local deltas since the table's
//! watermark are pulled, the remote delta is applied locally under
//! last-write-wins, the local delta is pushed, and the watermark moves to the
//! time the round started. A pass runs a round for every table in
//! [`SyncTable::ALL`](crate::models::SyncTable::ALL) order.

mod cancel;
mod puller;
mod reconciler;
mod scheduler;
mod service;

pub use cancel::{bounded, CancelHandle, CancelToken};
pub use puller::ChangePuller;
pub use reconciler::Reconciler;
pub use scheduler::{SchedulerHandle, SyncScheduler};
pub use service::SyncService;
