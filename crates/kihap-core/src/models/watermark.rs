//! Per-table sync watermark

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::record::parse_timestamp;
use crate::error::Result;

/// Timestamp of the last completed two-way sync of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    /// Watermark of a table that has never been synchronized.
    pub const EPOCH: Self = Self(DateTime::UNIX_EPOCH);

    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub const fn from_datetime(value: DateTime<Utc>) -> Self {
        Self(value)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        parse_timestamp(raw).map(Self)
    }

    pub const fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Start of the pull window: the watermark moved back by `lookback`,
    /// clamped at the epoch.
    #[must_use]
    pub fn rewind(self, lookback: Duration) -> Self {
        let Ok(lookback) = chrono::Duration::from_std(lookback) else {
            return Self::EPOCH;
        };
        self.0
            .checked_sub_signed(lookback)
            .map_or(Self::EPOCH, |value| Self(value).max(Self::EPOCH))
    }

    /// ISO-8601 rendering with a `Z` suffix, e.g. `1970-01-01T00:00:00Z`.
    pub fn to_iso_string(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::EPOCH
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso_string())
    }
}
