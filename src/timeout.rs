use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{NotebookError, Result};

/// Caller-owned handle for cancelling an in-flight request.
///
/// Cancelling aborts the current attempt and every remaining retry.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Handle that is cancelled together with `self`, but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Bounds a single attempt by a deadline and by the caller's cancel handle.
#[derive(Clone, Copy, Debug)]
pub struct TimeoutController {
    timeout: Duration,
}

impl TimeoutController {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_millis(timeout_ms: u64) -> Self {
        Self::new(Duration::from_millis(timeout_ms))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Drives `attempt` until it settles, the deadline passes, or `cancel`
    /// fires, whichever comes first.
    ///
    /// Cancellation is polled first so it wins over a simultaneously ready
    /// attempt. The deadline timer lives inside this future and is dropped
    /// on every return path.
    pub async fn run<T, F>(&self, cancel: &CancelHandle, attempt: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(NotebookError::Cancelled);
        }

        let deadline = tokio::time::sleep(self.timeout);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(NotebookError::Cancelled),
            result = attempt => result,
            () = deadline => {
                #[cfg(feature = "tracing")]
                tracing::debug!(timeout_ms = self.timeout.as_millis() as u64, "attempt deadline elapsed");
                Err(NotebookError::Timeout {
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }
}
