//! Sync conflict model

use serde::{Deserialize, Serialize};

/// Which way the rejected write was travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDirection {
    /// Remote row rejected by the local store
    Pull,
    /// Local row withheld from the remote store
    Push,
}

impl ConflictDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pull" => Some(Self::Pull),
            "push" => Some(Self::Push),
            _ => None,
        }
    }
}

/// Recorded sync conflict resolved by strategy (e.g., LWW)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Table of the conflicting record
    pub table_name: String,
    /// Record involved in the conflict
    pub record_id: String,
    /// Timestamp of the copy that was kept
    pub kept_updated_at: String,
    /// Timestamp of the write that was rejected
    pub rejected_updated_at: String,
    /// Resolution time (ISO-8601)
    pub resolved_at: String,
    pub direction: ConflictDirection,
    /// Resolution strategy name
    pub strategy: String,
}
