//! Periodic driver for sync passes

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::models::{PassReport, TableStatus};
use crate::remote::RemoteStore;

use super::cancel::CancelHandle;
use super::service::SyncService;

/// Reports kept for subscribers that fall behind.
const REPORT_BUFFER: usize = 16;

/// Runs a pass immediately and then once per interval.
///
/// Passes run one after another on a single task, so they never overlap; a
/// pass that outlasts the interval swallows the ticks it missed. Every
/// [`PassReport`] is published to subscribers, and failed tables are logged.
pub struct SyncScheduler<R> {
    service: Arc<SyncService<R>>,
    interval: Duration,
    reports: broadcast::Sender<PassReport>,
}

impl<R: RemoteStore + 'static> SyncScheduler<R> {
    pub fn new(service: Arc<SyncService<R>>, interval: Duration) -> Self {
        let (reports, _) = broadcast::channel(REPORT_BUFFER);
        Self {
            service,
            interval: interval.max(Duration::from_millis(1)),
            reports,
        }
    }

    /// Receive every report published after this call, including the
    /// immediate first pass when subscribed before `start`.
    pub fn subscribe(&self) -> broadcast::Receiver<PassReport> {
        self.reports.subscribe()
    }

    pub fn start(self) -> SchedulerHandle {
        let cancel = CancelHandle::new();
        let token = cancel.token();
        let reports = self.reports.clone();

        tracing::info!(
            "Starting sync scheduler with interval {}s",
            self.interval.as_secs_f64()
        );

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let report = self.service.sync_all(&token).await;
                log_failures(&report);
                // No subscribers is fine; the report has been logged.
                let _ = self.reports.send(report);

                if token.is_cancelled() {
                    break;
                }
            }

            tracing::info!("Sync scheduler stopped");
        });

        SchedulerHandle {
            cancel,
            task,
            reports,
        }
    }
}

fn log_failures(report: &PassReport) {
    for outcome in report.failures() {
        if let TableStatus::Failed { kind, message } = &outcome.status {
            tracing::warn!(
                "Pass {} left {} unsynced ({kind:?}): {message}",
                report.pass_id,
                outcome.table
            );
        }
    }
}

/// Control handle of a started [`SyncScheduler`].
pub struct SchedulerHandle {
    cancel: CancelHandle,
    task: JoinHandle<()>,
    reports: broadcast::Sender<PassReport>,
}

impl SchedulerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<PassReport> {
        self.reports.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the pass in flight, if any, and wait for the task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(error) = self.task.await {
            tracing::error!("Sync scheduler task ended abnormally: {error}");
        }
    }
}
