//! Error types for kihap-core

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SyncTable;

/// Result type alias using kihap-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in kihap-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Remote store could not be reached or rejected the request
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// libSQL error from the local store
    #[error("Local storage error: {0}")]
    LocalStorage(#[from] libsql::Error),

    /// Local store failure that did not originate in libSQL
    #[error("Database error: {0}")]
    Database(String),

    /// Sync requested for a table without a schema mapping
    #[error("Unsupported table: {0}")]
    UnsupportedTable(String),

    /// A remote call exceeded its time bound
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Another round for the same table has not finished yet
    #[error("Sync round already running for {0}")]
    RoundInProgress(SyncTable),

    /// The round observed a cancellation request
    #[error("Sync round cancelled")]
    Cancelled,

    /// A row could not be mapped onto its table schema
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout {
                operation: "remote request",
                after: Duration::ZERO,
            };
        }
        Self::RemoteUnavailable(error.to_string().replace('\n', " ").trim().to_string())
    }
}

/// Coarse failure category carried in sync reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RemoteUnavailable,
    LocalStorage,
    UnsupportedTable,
    Timeout,
    RoundInProgress,
    Cancelled,
    InvalidRecord,
    Config,
}

impl Error {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RemoteUnavailable(_) => ErrorKind::RemoteUnavailable,
            Self::LocalStorage(_) | Self::Database(_) | Self::Io(_) => ErrorKind::LocalStorage,
            Self::UnsupportedTable(_) => ErrorKind::UnsupportedTable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RoundInProgress(_) => ErrorKind::RoundInProgress,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidRecord(_) | Self::Serialization(_) => ErrorKind::InvalidRecord,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_groups_local_failures() {
        assert_eq!(
            Error::Database("disk full".to_string()).kind(),
            ErrorKind::LocalStorage
        );
        assert_eq!(
            Error::Io(std::io::Error::other("boom")).kind(),
            ErrorKind::LocalStorage
        );
    }

    #[test]
    fn timeout_message_names_operation() {
        let error = Error::Timeout {
            operation: "pull remote leads",
            after: Duration::from_secs(30),
        };
        assert_eq!(error.to_string(), "pull remote leads timed out after 30s");
        assert_eq!(error.kind(), ErrorKind::Timeout);
    }
}
