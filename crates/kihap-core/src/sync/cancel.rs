//! Cooperative cancellation for sync rounds

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Owner side of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

/// Observer side, passed down through the puller and the reconciler.
#[derive(Debug, Clone)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Signal every token. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            receiver: self.sender.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_, receiver) = watch::channel(false);
        Self { receiver }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Fail with `Cancelled` if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation is requested. Pends forever when the
    /// handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Run a remote call with an upper bound on its duration, abandoning it
/// when the token is cancelled first.
pub async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    cancel: &CancelToken,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    cancel.check()?;
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        outcome = tokio::time::timeout(limit, call) => match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout { operation, after: limit }),
        },
    }
}
