//! Supabase PostgREST client

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::{PageCursor, RemoteStore};
use crate::config::RemoteSettings;
use crate::error::{Error, Result};
use crate::models::{parse_timestamp, SyncRecord, SyncTable};

/// Ids per `id=in.(...)` filter, keeps request URLs well below proxy limits.
const VERSION_CHUNK_SIZE: usize = 200;

/// Remote store backed by the Supabase REST API, authenticated with the
/// service-role key.
#[derive(Clone)]
pub struct SupabaseRestClient {
    rest_url: String,
    service_role_key: String,
    page_size: usize,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for SupabaseRestClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SupabaseRestClient")
            .field("rest_url", &self.rest_url)
            .field("service_role_key", &"[REDACTED]")
            .field("page_size", &self.page_size)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl SupabaseRestClient {
    pub fn new(settings: &RemoteSettings, request_timeout: Duration) -> Result<Self> {
        if settings.service_role_key.trim().is_empty() {
            return Err(Error::Config(
                "Supabase service role key must not be empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            rest_url: settings.rest_url.trim_end_matches('/').to_string(),
            service_role_key: settings.service_role_key.clone(),
            page_size: settings.page_size.max(1),
            request_timeout,
            client,
        })
    }

    fn table_url(&self, table: SyncTable) -> String {
        format!("{}/{}", self.rest_url, table.name())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|error| self.transport_error(&error))?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::RemoteUnavailable(parse_api_error(status, &body)))
    }

    async fn send_for_rows(&self, request: RequestBuilder) -> Result<Vec<JsonValue>> {
        let response = self
            .send(request.header(reqwest::header::ACCEPT, "application/json"))
            .await?;
        response
            .json::<Vec<JsonValue>>()
            .await
            .map_err(|error| self.transport_error(&error))
    }

    fn transport_error(&self, error: &reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::Timeout {
                operation: "remote request",
                after: self.request_timeout,
            }
        } else {
            Error::RemoteUnavailable(compact_text(&error.to_string()))
        }
    }
}

impl RemoteStore for SupabaseRestClient {
    async fn select_page(&self, table: SyncTable, cursor: &PageCursor) -> Result<Vec<SyncRecord>> {
        let limit = self.page_size.to_string();
        let position = match cursor {
            PageCursor::Since(since) => ("updated_at", format!("gt.{}", since.to_iso_string())),
            PageCursor::After { updated_at, id } => ("or", keyset_filter(*updated_at, id)),
        };
        let request = self
            .client
            .get(self.table_url(table))
            .query(&[
                ("select", "*"),
                ("order", "updated_at.asc,id.asc"),
                ("limit", limit.as_str()),
            ])
            .query(&[position]);

        let rows = self.send_for_rows(request).await?;
        let page = rows
            .into_iter()
            .map(|row| SyncRecord::from_json(table, row))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!("Fetched {} remote {table} rows after {cursor:?}", page.len());
        Ok(page)
    }

    async fn fetch_versions(
        &self,
        table: SyncTable,
        ids: &[String],
    ) -> Result<HashMap<String, DateTime<Utc>>> {
        let mut versions = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(VERSION_CHUNK_SIZE) {
            let filter = in_filter(chunk);
            let request = self
                .client
                .get(self.table_url(table))
                .query(&[("select", "id,updated_at"), ("id", filter.as_str())]);

            for row in self.send_for_rows(request).await? {
                let version: VersionRow = serde_json::from_value(row)?;
                let id = match version.id {
                    JsonValue::String(id) => id,
                    JsonValue::Number(id) => id.to_string(),
                    other => {
                        return Err(Error::InvalidRecord(format!(
                            "{table} version row has id {other}"
                        )))
                    }
                };
                versions.insert(id, parse_timestamp(&version.updated_at)?);
            }
        }

        Ok(versions)
    }

    async fn upsert(&self, table: SyncTable, records: &[SyncRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let body: Vec<JsonValue> = records.iter().map(SyncRecord::to_json).collect();
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", table.schema().conflict_target)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body);
        self.send(request).await?;

        tracing::debug!("Pushed {} local {table} rows", records.len());
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct VersionRow {
    id: JsonValue,
    updated_at: String,
}

/// Double-quote a value for use inside a PostgREST list or logic tree.
fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// PostgREST `in.(...)` filter with every id double-quoted.
fn in_filter(ids: &[String]) -> String {
    let list = ids
        .iter()
        .map(|id| quoted(id))
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({list})")
}

/// Rows ordered after `(updated_at, id)`. The timestamp keeps its full
/// precision so rows sharing it are not fetched twice.
fn keyset_filter(updated_at: DateTime<Utc>, id: &str) -> String {
    let at = quoted(&updated_at.to_rfc3339_opts(SecondsFormat::AutoSi, true));
    let id = quoted(id);
    format!("(updated_at.gt.{at},and(updated_at.eq.{at},id.gt.{id}))")
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    message: Option<String>,
    hint: Option<String>,
    error: Option<String>,
}

/// Single-line, length-capped text for error messages.
fn compact_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(180)
        .collect()
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            let message = compact_text(&message);
            return match payload.hint.filter(|hint| !hint.trim().is_empty()) {
                Some(hint) => format!(
                    "{message}; hint: {} ({})",
                    compact_text(&hint),
                    status.as_u16()
                ),
                None => format!("{message} ({})", status.as_u16()),
            };
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}
