//! Syncable table registry
//!
//! Every table the sync engine moves rows for has a fixed schema descriptor
//! here. Column lists are never discovered at runtime: adding a table means
//! adding a `SyncTable` variant, its descriptor, and a migration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Storage class of a synchronized column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Real,
    /// Stored locally as 0/1, JSON `true`/`false` remotely
    Boolean,
    /// ISO-8601 text
    Timestamp,
    /// Serialized JSON text locally, structured JSON remotely
    Json,
}

/// One column of a table schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column { name, kind }
}

/// Static description of a syncable table.
#[derive(Debug, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub primary_key: &'static str,
    pub conflict_target: &'static str,
    pub columns: &'static [Column],
}

impl TableSchema {
    /// Comma-separated column list in schema order.
    pub fn select_list(&self) -> String {
        self.columns
            .iter()
            .map(|column| column.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Upsert guarded by last-write-wins: an existing row is only replaced
    /// when the incoming `updated_at` is strictly newer.
    pub fn conditional_upsert_sql(&self) -> String {
        format!(
            "{} WHERE julianday(excluded.updated_at) > julianday({}.updated_at)",
            self.upsert_sql(),
            self.name
        )
    }

    /// Unconditional upsert keyed by the conflict target.
    pub fn upsert_sql(&self) -> String {
        let placeholders = (1..=self.columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        let assignments = self
            .columns
            .iter()
            .filter(|column| column.name != self.primary_key)
            .map(|column| format!("{0} = excluded.{0}", column.name))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO UPDATE SET {}",
            self.name,
            self.select_list(),
            placeholders,
            self.conflict_target,
            assignments
        )
    }
}

/// The tables kept in sync between the local store and the remote database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTable {
    Leads,
    KihapEvents,
    EventCheckins,
    Students,
    Users,
    Units,
}

impl SyncTable {
    /// Pass order. Tables are synchronized one at a time in this order.
    pub const ALL: [Self; 6] = [
        Self::Leads,
        Self::KihapEvents,
        Self::EventCheckins,
        Self::Students,
        Self::Users,
        Self::Units,
    ];

    pub const fn name(self) -> &'static str {
        self.schema().name
    }

    pub const fn schema(self) -> &'static TableSchema {
        match self {
            Self::Leads => &LEADS,
            Self::KihapEvents => &KIHAP_EVENTS,
            Self::EventCheckins => &EVENT_CHECKINS,
            Self::Students => &STUDENTS,
            Self::Users => &USERS,
            Self::Units => &UNITS,
        }
    }

    /// Key of this table's watermark row in `sync_meta`.
    pub fn watermark_key(self) -> String {
        format!("last_sync_{}", self.name())
    }
}

impl fmt::Display for SyncTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SyncTable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|table| table.name() == name)
            .ok_or_else(|| Error::UnsupportedTable(name.to_string()))
    }
}

use ColumnKind::{Boolean, Integer, Json, Real, Text, Timestamp};

const LEADS: TableSchema = TableSchema {
    name: "leads",
    primary_key: "id",
    conflict_target: "id",
    columns: &[
        col("id", Text),
        col("name", Text),
        col("email", Text),
        col("phone", Text),
        col("source", Text),
        col("status", Text),
        col("unit_id", Text),
        col("notes", Text),
        col("created_at", Timestamp),
        col("updated_at", Timestamp),
    ],
};

const KIHAP_EVENTS: TableSchema = TableSchema {
    name: "kihap_events",
    primary_key: "id",
    conflict_target: "id",
    columns: &[
        col("id", Text),
        col("title", Text),
        col("description", Text),
        col("event_date", Timestamp),
        col("location", Text),
        col("unit_id", Text),
        col("price", Real),
        col("capacity", Integer),
        col("is_active", Boolean),
        col("created_at", Timestamp),
        col("updated_at", Timestamp),
    ],
};

const EVENT_CHECKINS: TableSchema = TableSchema {
    name: "event_checkins",
    primary_key: "id",
    conflict_target: "id",
    columns: &[
        col("id", Text),
        col("event_id", Text),
        col("student_id", Text),
        col("user_id", Text),
        col("checked_in_at", Timestamp),
        col("status", Text),
        col("created_at", Timestamp),
        col("updated_at", Timestamp),
    ],
};

const STUDENTS: TableSchema = TableSchema {
    name: "students",
    primary_key: "id",
    conflict_target: "id",
    columns: &[
        col("id", Text),
        col("name", Text),
        col("email", Text),
        col("phone", Text),
        col("birth_date", Text),
        col("belt", Text),
        col("unit_id", Text),
        col("status", Text),
        col("enrolled_at", Timestamp),
        col("metadata", Json),
        col("created_at", Timestamp),
        col("updated_at", Timestamp),
    ],
};

const USERS: TableSchema = TableSchema {
    name: "users",
    primary_key: "id",
    conflict_target: "id",
    columns: &[
        col("id", Text),
        col("name", Text),
        col("email", Text),
        col("role", Text),
        col("unit_id", Text),
        col("is_active", Boolean),
        col("created_at", Timestamp),
        col("updated_at", Timestamp),
    ],
};

const UNITS: TableSchema = TableSchema {
    name: "units",
    primary_key: "id",
    conflict_target: "id",
    columns: &[
        col("id", Text),
        col("name", Text),
        col("address", Text),
        col("city", Text),
        col("phone", Text),
        col("is_active", Boolean),
        col("created_at", Timestamp),
        col("updated_at", Timestamp),
    ],
};
