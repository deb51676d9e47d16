//! Syncable record model

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use super::table::{ColumnKind, SyncTable};
use crate::error::{Error, Result};

/// One row of a syncable table, in either store.
///
/// `values` always holds exactly the schema's columns; `id` and `updated_at`
/// are lifted out of it for reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRecord {
    pub table: SyncTable,
    pub id: String,
    pub updated_at: DateTime<Utc>,
    values: Map<String, JsonValue>,
}

impl SyncRecord {
    /// Build a record from a JSON row, keeping only the table's columns.
    pub fn from_json(table: SyncTable, row: JsonValue) -> Result<Self> {
        let JsonValue::Object(mut row) = row else {
            return Err(Error::InvalidRecord(format!(
                "{table} row must be a JSON object"
            )));
        };

        let schema = table.schema();
        let mut values = Map::with_capacity(schema.columns.len());
        for column in schema.columns {
            let value = row.remove(column.name).unwrap_or(JsonValue::Null);
            values.insert(column.name.to_string(), value);
        }

        let id = match values.get(schema.primary_key) {
            Some(JsonValue::String(id)) if !id.trim().is_empty() => id.clone(),
            Some(JsonValue::Number(id)) => id.to_string(),
            _ => {
                return Err(Error::InvalidRecord(format!(
                    "{table} row is missing `{}`",
                    schema.primary_key
                )))
            }
        };
        // Numeric ids are stored as text so both stores key on the same value.
        values.insert(schema.primary_key.to_string(), JsonValue::String(id.clone()));

        let updated_at = values
            .get("updated_at")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::InvalidRecord(format!("{table} row {id} has no updated_at")))
            .and_then(parse_timestamp)?;

        Ok(Self {
            table,
            id,
            updated_at,
            values,
        })
    }

    /// Value of a single column, `None` when the column is not in the schema.
    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.values.get(column)
    }

    /// Replace a column value. Unknown columns are rejected.
    pub fn set(&mut self, column: &str, value: JsonValue) -> Result<()> {
        let schema = self.table.schema();
        if schema.column(column).is_none() {
            return Err(Error::InvalidRecord(format!(
                "{} has no column `{column}`",
                self.table
            )));
        }
        if column == schema.primary_key {
            return Err(Error::InvalidRecord("record id cannot be changed".to_string()));
        }
        if column == "updated_at" {
            let raw = value
                .as_str()
                .ok_or_else(|| Error::InvalidRecord("updated_at must be a string".to_string()))?;
            self.updated_at = parse_timestamp(raw)?;
        }
        self.values.insert(column.to_string(), value);
        Ok(())
    }

    /// Row values as a JSON object.
    pub const fn values(&self) -> &Map<String, JsonValue> {
        &self.values
    }

    /// Row as a JSON object, ready for the remote API.
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.values.clone())
    }

    /// Positional libSQL parameters in schema column order.
    pub fn to_sql_params(&self) -> Result<Vec<libsql::Value>> {
        self.table
            .schema()
            .columns
            .iter()
            .map(|column| {
                let value = self.values.get(column.name).unwrap_or(&JsonValue::Null);
                json_to_sql(column.kind, value).map_err(|reason| {
                    Error::InvalidRecord(format!(
                        "{}.{} for row {}: {reason}",
                        self.table, column.name, self.id
                    ))
                })
            })
            .collect()
    }

    /// Rebuild a record from a local row selected with the schema's column list.
    pub fn from_sql_row(table: SyncTable, row: &libsql::Row) -> Result<Self> {
        let schema = table.schema();
        let mut values = Map::with_capacity(schema.columns.len());
        for (index, column) in schema.columns.iter().enumerate() {
            let index = i32::try_from(index)
                .map_err(|_| Error::Database("column index out of range".to_string()))?;
            let raw = row.get_value(index)?;
            let value = sql_to_json(column.kind, raw).map_err(|reason| {
                Error::InvalidRecord(format!("{table}.{}: {reason}", column.name))
            })?;
            values.insert(column.name.to_string(), value);
        }
        Self::from_json(table, JsonValue::Object(values))
    }
}

/// Parse a row timestamp into UTC.
///
/// Accepts RFC 3339 with any offset and SQLite's `YYYY-MM-DD HH:MM:SS[.fff]`
/// form, which is read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    // Postgres may render offsets as `+00` without minutes.
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    Err(Error::InvalidRecord(format!("unparseable timestamp `{raw}`")))
}

fn json_to_sql(kind: ColumnKind, value: &JsonValue) -> std::result::Result<libsql::Value, String> {
    use libsql::Value as Sql;

    if value.is_null() {
        return Ok(Sql::Null);
    }

    match kind {
        ColumnKind::Text | ColumnKind::Timestamp => Ok(Sql::Text(match value {
            JsonValue::String(text) => text.clone(),
            other => other.to_string(),
        })),
        ColumnKind::Integer => match value {
            JsonValue::Number(number) => number
                .as_i64()
                .map(Sql::Integer)
                .ok_or_else(|| format!("{number} is not an integer")),
            JsonValue::Bool(flag) => Ok(Sql::Integer(i64::from(*flag))),
            JsonValue::String(text) => text
                .trim()
                .parse::<i64>()
                .map(Sql::Integer)
                .map_err(|_| format!("`{text}` is not an integer")),
            other => Err(format!("expected integer, got {other}")),
        },
        ColumnKind::Real => match value {
            JsonValue::Number(number) => number
                .as_f64()
                .map(Sql::Real)
                .ok_or_else(|| format!("{number} is not a number")),
            JsonValue::String(text) => text
                .trim()
                .parse::<f64>()
                .map(Sql::Real)
                .map_err(|_| format!("`{text}` is not a number")),
            other => Err(format!("expected number, got {other}")),
        },
        ColumnKind::Boolean => match value {
            JsonValue::Bool(flag) => Ok(Sql::Integer(i64::from(*flag))),
            JsonValue::Number(number) => Ok(Sql::Integer(i64::from(
                number.as_f64().is_some_and(|n| n != 0.0),
            ))),
            JsonValue::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "t" | "yes" => Ok(Sql::Integer(1)),
                "0" | "false" | "f" | "no" => Ok(Sql::Integer(0)),
                _ => Err(format!("`{text}` is not a boolean")),
            },
            other => Err(format!("expected boolean, got {other}")),
        },
        ColumnKind::Json => Ok(Sql::Text(value.to_string())),
    }
}

fn sql_to_json(kind: ColumnKind, value: libsql::Value) -> std::result::Result<JsonValue, String> {
    use libsql::Value as Sql;

    Ok(match (kind, value) {
        (_, Sql::Null) => JsonValue::Null,
        (ColumnKind::Boolean, Sql::Integer(flag)) => JsonValue::Bool(flag != 0),
        (ColumnKind::Json, Sql::Text(text)) => {
            serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
        }
        (_, Sql::Text(text)) => JsonValue::String(text),
        (_, Sql::Integer(number)) => JsonValue::from(number),
        (_, Sql::Real(number)) => serde_json::Number::from_f64(number)
            .map_or(JsonValue::Null, JsonValue::Number),
        (_, Sql::Blob(_)) => return Err("blob values are not syncable".to_string()),
    })
}
