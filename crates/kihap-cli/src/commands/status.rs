use std::path::PathBuf;

use crate::commands::common::{
    format_watermark_lines, open_local_database, watermark_to_item, WatermarkItem,
};
use crate::error::CliError;

pub async fn run_status(as_json: bool, db_path: Option<PathBuf>) -> Result<(), CliError> {
    let db = open_local_database(db_path).await?;
    let watermarks = db.watermarks().await?;

    if as_json {
        let json_items = watermarks
            .iter()
            .map(|(table, watermark)| watermark_to_item(*table, *watermark))
            .collect::<Vec<WatermarkItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_watermark_lines(&watermarks) {
            println!("{line}");
        }
    }

    Ok(())
}
