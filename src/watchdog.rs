//! Request deadline and process self-termination.
//!
//! The engine offers no cancellation hook and can hang while holding GPU
//! memory, so a request that overruns its deadline is abandoned and the whole
//! process asks to be terminated shortly after. The request is delivered to
//! the server's graceful shutdown (see [`crate::server`]); a supervisor is
//! expected to restart the process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{SegmentError, SegmentResult};

/// Exit status used when the watchdog stops the process.
pub const WATCHDOG_EXIT_CODE: u8 = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// A request overran its deadline.
    Timeout,
    /// Recycle mode: the process is restarted after every request.
    Recycle,
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    deadline: Duration,
    kill_delay: Duration,
    recycle_after_request: bool,
    trigger: Arc<watch::Sender<Option<TerminationReason>>>,
}

/// Receiving half, held by whoever owns the process lifetime.
#[derive(Debug)]
pub struct TerminationHandle {
    rx: watch::Receiver<Option<TerminationReason>>,
}

impl Watchdog {
    pub fn new(
        deadline: Duration,
        kill_delay: Duration,
        recycle_after_request: bool,
    ) -> (Self, TerminationHandle) {
        let (tx, rx) = watch::channel(None);
        let watchdog = Self {
            deadline,
            kill_delay,
            recycle_after_request,
            trigger: Arc::new(tx),
        };
        (watchdog, TerminationHandle { rx })
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run `work` under the deadline.
    ///
    /// On expiry `work` is dropped, termination is scheduled and
    /// [`SegmentError::Timeout`] is returned.
    pub async fn guard<F, T>(&self, work: F) -> SegmentResult<T>
    where
        F: Future<Output = SegmentResult<T>>,
    {
        match tokio::time::timeout(self.deadline, work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(deadline = ?self.deadline, "segmentation processing timed out");
                self.schedule_termination(TerminationReason::Timeout);
                Err(SegmentError::Timeout)
            }
        }
    }

    /// In recycle mode, a guard that requests termination once dropped.
    ///
    /// Handlers move it into the response body so the request fires only
    /// after the last byte has been sent (or the client went away).
    pub fn recycle_guard(&self) -> Option<RecycleGuard> {
        self.recycle_after_request.then(|| RecycleGuard {
            watchdog: self.clone(),
        })
    }

    /// Deliver a termination request after the kill delay, leaving time for
    /// the current response to be flushed.
    pub fn schedule_termination(&self, reason: TerminationReason) {
        let trigger = Arc::clone(&self.trigger);
        let delay = self.kill_delay;
        // Guards can be dropped while the runtime itself is shutting down.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        tracing::warn!(?reason, ?delay, "process termination scheduled");

        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            trigger.send_if_modified(|current| {
                if current.is_some() {
                    return false;
                }
                *current = Some(reason);
                true
            });
        });
    }
}

#[derive(Debug)]
pub struct RecycleGuard {
    watchdog: Watchdog,
}

impl Drop for RecycleGuard {
    fn drop(&mut self) {
        self.watchdog
            .schedule_termination(TerminationReason::Recycle);
    }
}

impl TerminationHandle {
    /// Resolves with the first termination request. Never resolves if the
    /// watchdog is gone without having asked for one. Cancel-safe.
    pub async fn requested(&mut self) -> TerminationReason {
        loop {
            if let Some(reason) = *self.rx.borrow_and_update() {
                return reason;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// True when `/proc/version` names a Microsoft kernel.
pub fn running_under_wsl() -> bool {
    match std::fs::read_to_string("/proc/version") {
        Ok(version) => is_wsl_version(&version),
        Err(_) => false,
    }
}

fn is_wsl_version(version: &str) -> bool {
    version.to_ascii_lowercase().contains("microsoft")
}
