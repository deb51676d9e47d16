//! Runtime configuration for the sync service.
//!
//! Everything is read from environment variables. `from_lookup` takes the
//! variable source as a function so tests never touch the process environment.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};

const DEFAULT_INTERVAL_MINUTES: u64 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PAGE_SIZE: usize = 1_000;
const DEFAULT_CONFLICT_RETENTION_DAYS: u64 = 30;
const SECS_PER_DAY: u64 = 86_400;

/// How local changes are written to the remote store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemotePushPolicy {
    /// Compare against remote versions first and only push strictly newer rows
    #[default]
    NewerOnly,
    /// Upsert every local change regardless of the remote copy
    Overwrite,
}

impl FromStr for RemotePushPolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "newer-only" | "newer_only" => Ok(Self::NewerOnly),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(Error::Config(format!(
                "SYNC_REMOTE_PUSH_POLICY must be `newer-only` or `overwrite`, got `{other}`"
            ))),
        }
    }
}

/// What a pass does after one table fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Log the failure and continue with the next table
    #[default]
    Isolate,
    /// Stop the pass; remaining tables are reported as not attempted
    FailFast,
}

impl FromStr for FailurePolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "isolate" => Ok(Self::Isolate),
            "fail-fast" | "fail_fast" => Ok(Self::FailFast),
            other => Err(Error::Config(format!(
                "SYNC_FAILURE_POLICY must be `isolate` or `fail-fast`, got `{other}`"
            ))),
        }
    }
}

/// Connection settings for the Supabase REST endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    /// PostgREST base, e.g. `https://project.supabase.co/rest/v1`
    pub rest_url: String,
    pub service_role_key: String,
    pub page_size: usize,
}

impl RemoteSettings {
    /// Build settings from a project URL, appending `/rest/v1` when missing.
    pub fn new(supabase_url: &str, service_role_key: impl Into<String>) -> Result<Self> {
        let supabase_url = supabase_url.trim().trim_end_matches('/');
        if !(supabase_url.starts_with("http://") || supabase_url.starts_with("https://")) {
            return Err(Error::Config(
                "SUPABASE_URL must start with http:// or https://".to_string(),
            ));
        }
        let rest_url = if supabase_url.ends_with("/rest/v1") {
            supabase_url.to_string()
        } else {
            format!("{supabase_url}/rest/v1")
        };

        Ok(Self {
            rest_url,
            service_role_key: service_role_key.into(),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }
}

impl fmt::Debug for RemoteSettings {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteSettings")
            .field("rest_url", &self.rest_url)
            .field("service_role_key", &"[REDACTED]")
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Behaviour of sync rounds and passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Upper bound for each remote request; a paged pull is bounded per page
    pub request_timeout: Duration,
    /// How far before the stored watermark the pull window starts
    pub watermark_lookback: Duration,
    /// Logged conflicts older than this are deleted after each pass
    pub conflict_retention: Duration,
    pub push_policy: RemotePushPolicy,
    pub failure_policy: FailurePolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            watermark_lookback: Duration::ZERO,
            conflict_retention: Duration::from_secs(DEFAULT_CONFLICT_RETENTION_DAYS * SECS_PER_DAY),
            push_policy: RemotePushPolicy::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Complete configuration of the hosting process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub remote: RemoteSettings,
    /// Local database file; the CLI picks a default when unset
    pub db_path: Option<PathBuf>,
    pub interval: Duration,
    pub options: SyncOptions,
}

impl SyncSettings {
    pub fn from_env() -> Result<Self> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let supabase_url = required(&lookup, "SUPABASE_URL")?;
        let service_role_key = required(&lookup, "SUPABASE_SERVICE_ROLE_KEY")?;
        let mut remote = RemoteSettings::new(&supabase_url, service_role_key)?;
        remote.page_size = bounded_number(&lookup, "SYNC_PAGE_SIZE", DEFAULT_PAGE_SIZE, 1, 10_000)?;

        let db_path = db_path_from_lookup(&lookup);

        let interval_minutes = bounded_number(
            &lookup,
            "SYNC_INTERVAL_MINUTES",
            DEFAULT_INTERVAL_MINUTES,
            1,
            1_440,
        )?;
        let request_timeout_secs = bounded_number(
            &lookup,
            "SYNC_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
            1,
            600,
        )?;
        let lookback_secs =
            bounded_number(&lookup, "SYNC_WATERMARK_LOOKBACK_SECS", 0_u64, 0, 3_600)?;
        let retention_days = bounded_number(
            &lookup,
            "SYNC_CONFLICT_RETENTION_DAYS",
            DEFAULT_CONFLICT_RETENTION_DAYS,
            1,
            3_650,
        )?;

        let push_policy = optional(&lookup, "SYNC_REMOTE_PUSH_POLICY")
            .map_or(Ok(RemotePushPolicy::default()), |value| value.parse())?;
        let failure_policy = optional(&lookup, "SYNC_FAILURE_POLICY")
            .map_or(Ok(FailurePolicy::default()), |value| value.parse())?;

        Ok(Self {
            remote,
            db_path,
            interval: Duration::from_secs(interval_minutes * 60),
            options: SyncOptions {
                request_timeout: Duration::from_secs(request_timeout_secs),
                watermark_lookback: Duration::from_secs(lookback_secs),
                conflict_retention: Duration::from_secs(retention_days * SECS_PER_DAY),
                push_policy,
                failure_policy,
            },
        })
    }
}

/// `KIHAP_DB_PATH` from the process environment. Needs none of the remote
/// settings, so local-only commands can use it.
pub fn db_path_from_env() -> Option<PathBuf> {
    db_path_from_lookup(|name| env::var(name).ok())
}

pub fn db_path_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    optional(lookup, "KIHAP_DB_PATH").map(PathBuf::from)
}

fn optional(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    optional(lookup, name)
        .ok_or_else(|| Error::Config(format!("Missing required environment variable: {name}")))
}

fn bounded_number<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    min: T,
    max: T,
) -> Result<T>
where
    T: FromStr + PartialOrd + Copy + fmt::Display,
{
    let Some(raw) = optional(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<T>().map_err(|_| {
        Error::Config(format!("{name} must be an integer in [{min}, {max}]"))
    })?;
    if value < min || value > max {
        return Err(Error::Config(format!("{name} must be in [{min}, {max}]")));
    }
    Ok(value)
}
