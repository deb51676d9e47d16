use std::path::{Path, PathBuf};

use kihap_core::config;
use kihap_core::models::{SyncConflict, TableOutcome};
use kihap_core::{
    DatabaseService, SupabaseRestClient, SyncService, SyncSettings, SyncTable, TableStatus,
    Watermark,
};
use serde::Serialize;

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct WatermarkItem {
    pub table: SyncTable,
    /// `None` until the first successful round
    pub last_synced_at: Option<String>,
}

/// Pick the database file: `--db-path`, then `KIHAP_DB_PATH`, then the
/// platform data directory.
pub fn resolve_db_path(
    cli_db_path: Option<PathBuf>,
    configured: Option<PathBuf>,
) -> Result<PathBuf, CliError> {
    match cli_db_path.or(configured) {
        Some(path) => Ok(path),
        None => default_db_path(),
    }
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("kihap").join("kihap.db"))
        .ok_or(CliError::NoDataDir)
}

/// `KIHAP_DB_PATH` without requiring the rest of the sync settings.
pub fn configured_db_path() -> Option<PathBuf> {
    config::db_path_from_env()
}

pub async fn open_database(path: &Path) -> Result<DatabaseService, CliError> {
    Ok(DatabaseService::open_path(path).await?)
}

/// Open the local store named on the command line or in the environment.
/// Needs no remote credentials.
pub async fn open_local_database(cli_db_path: Option<PathBuf>) -> Result<DatabaseService, CliError> {
    let path = resolve_db_path(cli_db_path, configured_db_path())?;
    open_database(&path).await
}

/// Build the sync service from environment settings.
pub async fn build_sync_service(
    cli_db_path: Option<PathBuf>,
) -> Result<(SyncSettings, SyncService<SupabaseRestClient>), CliError> {
    let settings = SyncSettings::from_env()?;
    let path = resolve_db_path(cli_db_path, settings.db_path.clone())?;
    let local = open_database(&path).await?;
    let remote = SupabaseRestClient::new(&settings.remote, settings.options.request_timeout)?;

    tracing::debug!("Using local database at {} with {:?}", path.display(), settings.remote);
    let service = SyncService::new(local, remote, settings.options);
    Ok((settings, service))
}

pub fn parse_table(name: &str) -> Result<SyncTable, CliError> {
    Ok(name.parse::<SyncTable>()?)
}

pub fn format_watermark(watermark: Watermark) -> String {
    if watermark == Watermark::EPOCH {
        "never".to_string()
    } else {
        watermark
            .as_datetime()
            .format("%Y-%m-%d %H:%M:%S%.3f UTC")
            .to_string()
    }
}

pub fn watermark_to_item(table: SyncTable, watermark: Watermark) -> WatermarkItem {
    WatermarkItem {
        table,
        last_synced_at: (watermark != Watermark::EPOCH).then(|| watermark.to_iso_string()),
    }
}

pub fn format_watermark_lines(watermarks: &[(SyncTable, Watermark)]) -> Vec<String> {
    watermarks
        .iter()
        .map(|(table, watermark)| format!("{:<16}  {}", table.name(), format_watermark(*watermark)))
        .collect()
}

pub fn format_outcome_line(outcome: &TableOutcome) -> String {
    let detail = match &outcome.status {
        TableStatus::Synced(result) => format!(
            "pulled {} (kept {} local), pushed {} (withheld {})",
            result.remote_applied, result.remote_skipped, result.local_applied, result.local_skipped
        ),
        TableStatus::Skipped { reason } => format!("skipped: {reason}"),
        TableStatus::Failed { kind, message } => format!("FAILED [{kind:?}] {message}"),
        TableStatus::NotAttempted => "not attempted".to_string(),
    };
    format!(
        "{:<16}  {:>6}ms  {detail}",
        outcome.table.name(),
        outcome.duration_ms
    )
}

pub fn format_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<4}  {:<4}  {}/{}  kept={} rejected={}",
                conflict.resolved_at,
                conflict.strategy,
                conflict.direction.as_str(),
                conflict.table_name,
                conflict.record_id,
                conflict.kept_updated_at,
                conflict.rejected_updated_at
            )
        })
        .collect()
}
