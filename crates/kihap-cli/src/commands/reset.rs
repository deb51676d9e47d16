use std::path::PathBuf;

use kihap_core::SyncTable;

use crate::commands::common::{open_local_database, parse_table};
use crate::error::CliError;

/// Forget the watermark of one table, or of all of them with `all`.
pub async fn run_reset(
    table: Option<&str>,
    all: bool,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let tables = match table {
        Some(name) if !all => vec![parse_table(name)?],
        _ => SyncTable::ALL.to_vec(),
    };

    let db = open_local_database(db_path).await?;
    for table in tables {
        db.reset_watermark(table).await?;
        tracing::info!("Reset watermark for {table}");
        println!("Reset {table}; the next round pulls every row");
    }
    Ok(())
}
