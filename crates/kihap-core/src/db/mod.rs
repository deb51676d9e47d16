//! Local libSQL store

mod connection;
mod migrations;
mod record_repository;
mod watermark_repository;

pub use connection::Database;
pub use record_repository::{ApplyOutcome, LibSqlRecordRepository, RecordRepository};
pub use watermark_repository::{LibSqlWatermarkRepository, WatermarkRepository};
