use std::path::PathBuf;

use kihap_core::models::TableOutcome;
use kihap_core::CancelHandle;
use tokio::task::JoinHandle;

use crate::commands::common::{build_sync_service, format_outcome_line, parse_table};
use crate::error::CliError;

/// Run one pass, or one round when `table` is given, and print the outcome.
/// Returns `false` when any table failed.
pub async fn run_once(
    table: Option<&str>,
    as_json: bool,
    db_path: Option<PathBuf>,
) -> Result<bool, CliError> {
    // Reject unknown names before touching either store
    let table = table.map(parse_table).transpose()?;
    let (_, service) = build_sync_service(db_path).await?;

    let cancel = CancelHandle::new();
    let token = cancel.token();
    let interrupt = cancel_on_interrupt(cancel);

    let succeeded = if let Some(table) = table {
        let outcome = service.table_outcome(table, &token).await;
        print_outcomes(std::slice::from_ref(&outcome), as_json, || {
            serde_json::to_string_pretty(&outcome)
        })?;
        !outcome.is_failure()
    } else {
        let report = service.sync_all(&token).await;
        print_outcomes(&report.outcomes, as_json, || {
            serde_json::to_string_pretty(&report)
        })?;
        report.is_success()
    };

    interrupt.abort();
    Ok(succeeded)
}

fn cancel_on_interrupt(cancel: CancelHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling sync");
            cancel.cancel();
        }
    })
}

fn print_outcomes(
    outcomes: &[TableOutcome],
    as_json: bool,
    render_json: impl FnOnce() -> serde_json::Result<String>,
) -> Result<(), CliError> {
    if as_json {
        println!("{}", render_json()?);
    } else {
        for outcome in outcomes {
            println!("{}", format_outcome_line(outcome));
        }
    }
    Ok(())
}
