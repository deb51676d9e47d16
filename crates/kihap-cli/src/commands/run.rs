use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kihap_core::{PassReport, SyncScheduler};
use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::{build_sync_service, format_outcome_line};
use crate::error::CliError;

/// Host the scheduler until Ctrl-C, then cancel the pass in flight and exit.
pub async fn run_scheduler(
    interval_minutes: Option<u64>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let (settings, service) = build_sync_service(db_path).await?;
    let interval = interval_minutes.map_or(settings.interval, |minutes| {
        Duration::from_secs(minutes * 60)
    });

    let scheduler = SyncScheduler::new(Arc::new(service), interval);
    let mut reports = scheduler.subscribe();
    let handle = scheduler.start();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => tracing::info!("Interrupt received, stopping"),
                    Err(error) => tracing::error!("Failed to listen for interrupt: {error}"),
                }
                break;
            }
            report = reports.recv() => match report {
                Ok(report) => log_report(&report),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Report listener fell behind; {missed} reports dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

fn log_report(report: &PassReport) {
    for outcome in &report.outcomes {
        tracing::debug!("{}", format_outcome_line(outcome));
    }
}
