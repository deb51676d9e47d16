use std::path::PathBuf;

use crate::commands::common::{format_conflict_lines, open_local_database};
use crate::error::CliError;

pub async fn run_conflicts(
    limit: usize,
    as_json: bool,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let db = open_local_database(db_path).await?;
    let conflicts = db.list_conflicts(limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
