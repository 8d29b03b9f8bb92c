use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use crate::{
    listeners::{Listeners, Subscription},
    CancelHandle, Classifier, ErrorKind, NotebookError, RetryPolicy,
};

/// Published to observers before the executor waits for the next attempt.
#[derive(Clone, Debug)]
pub struct RetryNotice {
    /// Classification of the failure that triggered the retry.
    pub kind: ErrorKind,
    /// Zero-based index of the attempt that failed.
    pub attempt: u32,
    /// Backoff that is about to be applied.
    pub delay: Duration,
    /// Raw diagnostic text of the failure.
    pub detail: String,
}

/// Terminal failure of a retry sequence.
#[derive(Debug, thiserror::Error)]
#[error("{kind} failure after {attempts} attempt(s): {error}")]
pub struct RetryFailure {
    /// Last error observed.
    #[source]
    pub error: NotebookError,
    /// Classification of `error`.
    pub kind: ErrorKind,
    /// Number of attempts that were started.
    pub attempts: u32,
}

impl RetryFailure {
    /// `true` when the sequence ended because the caller cancelled it.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, NotebookError::Cancelled)
    }
}

/// Drives bounded retry-with-backoff over fallible async operations.
#[derive(Clone, Debug)]
pub struct RetryExecutor {
    classifier: Classifier,
    observers: Arc<HashMap<ErrorKind, Listeners<RetryNotice>>>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(Classifier::new())
    }
}

impl RetryExecutor {
    pub fn new(classifier: Classifier) -> Self {
        let observers = ErrorKind::ALL
            .into_iter()
            .map(|kind| (kind, Listeners::new()))
            .collect();
        Self {
            classifier,
            observers: Arc::new(observers),
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Registers an observer for retries caused by failures of `kind`.
    ///
    /// Observers are only called when another attempt will follow. A
    /// panicking observer never aborts the retry loop.
    pub fn on_retry<F>(&self, kind: ErrorKind, observer: F) -> Subscription
    where
        F: Fn(&RetryNotice) + Send + Sync + 'static,
    {
        match self.observers.get(&kind) {
            Some(listeners) => listeners.subscribe(observer),
            // every kind is registered in `new`
            None => Listeners::new().subscribe(observer),
        }
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable kind,
    /// exhausts `policy`, or `cancel` fires.
    ///
    /// Attempts are strictly sequential. Cancellation is checked before
    /// every attempt and interrupts the backoff wait.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        cancel: &CancelHandle,
        mut operation: F,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(attempt));
            }

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            let attempts = attempt + 1;

            if matches!(error, NotebookError::Cancelled) {
                return Err(cancelled(attempts));
            }

            let kind = self.classifier.classify(&error);
            if !kind.is_retryable() || error.is_malformed_request() {
                #[cfg(feature = "tracing")]
                tracing::debug!(%kind, attempts, "non-retryable failure");
                return Err(RetryFailure {
                    error,
                    kind,
                    attempts,
                });
            }

            if attempt >= policy.max_retries {
                #[cfg(feature = "tracing")]
                tracing::warn!(%kind, attempts, error = %error, "retries exhausted");
                return Err(RetryFailure {
                    error,
                    kind,
                    attempts,
                });
            }

            let delay = policy.delay(attempt);
            let notice = RetryNotice {
                kind,
                attempt,
                delay,
                detail: error.to_string(),
            };
            if let Some(observers) = self.observers.get(&kind) {
                observers.notify(&notice);
            }

            #[cfg(feature = "tracing")]
            tracing::warn!(
                %kind,
                attempt = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "attempt failed, retrying"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled(attempts)),
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

fn cancelled(attempts: u32) -> RetryFailure {
    RetryFailure {
        error: NotebookError::Cancelled,
        kind: ErrorKind::Unknown,
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use tokio::time::Instant;

    use super::RetryExecutor;
    use crate::{CancelHandle, ErrorKind, NotebookError, RetryPolicy};

    fn http(status: u16) -> NotebookError {
        NotebookError::Http {
            status,
            body: "boom".to_owned(),
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            backoff_multiplier: 2.0,
            max_delay_ms: 10,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_back_off_exponentially_then_succeed() {
        let executor = RetryExecutor::default();
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
        };
        let started = Instant::now();
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let calls = Arc::clone(&stamps);
        let value = executor
            .execute_with_retry(&policy, &CancelHandle::new(), || {
                let calls = Arc::clone(&calls);
                async move {
                    let mut calls = calls.lock().expect("stamps lock");
                    calls.push(started.elapsed());
                    if calls.len() < 4 {
                        Err(http(503))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .expect("fourth attempt must succeed");

        assert_eq!(value, "done");
        let stamps = stamps.lock().expect("stamps lock");
        let gaps: Vec<u64> = stamps
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
            .collect();
        assert_eq!(gaps, vec![1_000, 2_000, 4_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_kinds_make_at_most_max_retries_plus_one_attempts() {
        let executor = RetryExecutor::default();
        let failures: [fn() -> NotebookError; 5] = [
            || http(500),
            || http(429),
            || NotebookError::Timeout { timeout_ms: 1 },
            || NotebookError::Unreachable("down".to_owned()),
            || NotebookError::Decode("shape".to_owned()),
        ];

        for make_error in failures {
            let attempts = AtomicU32::new(0);
            let failure = executor
                .execute_with_retry(&fast_policy(2), &CancelHandle::new(), || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async move { Err::<(), _>(make_error()) }
                })
                .await
                .expect_err("must exhaust retries");

            assert_eq!(attempts.load(Ordering::SeqCst), 3);
            assert_eq!(failure.attempts, 3);
            assert!(failure.kind.is_retryable());
        }
    }

    #[tokio::test]
    async fn non_retryable_kinds_make_exactly_one_attempt() {
        let executor = RetryExecutor::default();
        let cases = [
            (401, ErrorKind::Authentication),
            (403, ErrorKind::Authorization),
            (404, ErrorKind::ClientError),
            (422, ErrorKind::ClientError),
        ];

        for (status, expected) in cases {
            let attempts = AtomicU32::new(0);
            let failure = executor
                .execute_with_retry(&fast_policy(5), &CancelHandle::new(), || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async move { Err::<(), _>(http(status)) }
                })
                .await
                .expect_err("must fail immediately");

            assert_eq!(attempts.load(Ordering::SeqCst), 1);
            assert_eq!(failure.kind, expected);
            assert_eq!(failure.attempts, 1);
        }

        let attempts = AtomicU32::new(0);
        let failure = executor
            .execute_with_retry(&fast_policy(5), &CancelHandle::new(), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(NotebookError::Validation("bad shape".to_owned())) }
            })
            .await
            .expect_err("validation must fail immediately");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(failure.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn request_that_cannot_be_built_is_attempted_once() {
        let executor = RetryExecutor::default();
        let attempts = AtomicU32::new(0);

        let failure = executor
            .execute_with_retry(&fast_policy(5), &CancelHandle::new(), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                let built = reqwest::Client::new()
                    .get("https://notes.example")
                    .header("bad header", "value")
                    .build();
                async move { built.map(|_| ()).map_err(NotebookError::Transport) }
            })
            .await
            .expect_err("builder error must fail");

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(failure.kind, ErrorKind::Internal);
        assert!(failure.error.is_malformed_request());
    }

    #[tokio::test(start_paused = true)]
    async fn observers_see_retries_and_panics_are_isolated() {
        let executor = RetryExecutor::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _panicky = executor.on_retry(ErrorKind::Server, |_| panic!("observer failure"));
        let sink = Arc::clone(&seen);
        let _recorder = executor.on_retry(ErrorKind::Server, move |notice| {
            sink.lock()
                .expect("seen lock")
                .push((notice.attempt, notice.delay));
        });
        let other = Arc::new(AtomicU32::new(0));
        let other_hits = Arc::clone(&other);
        let _unrelated = executor.on_retry(ErrorKind::RateLimit, move |_| {
            other_hits.fetch_add(1, Ordering::SeqCst);
        });

        let failure = executor
            .execute_with_retry(&fast_policy(2), &CancelHandle::new(), || async {
                Err::<(), _>(http(500))
            })
            .await
            .expect_err("must exhaust retries");

        assert_eq!(failure.attempts, 3);
        assert_eq!(
            *seen.lock().expect("seen lock"),
            vec![(0, Duration::from_millis(1)), (1, Duration::from_millis(2))]
        );
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_aborts_sequence() {
        let executor = RetryExecutor::default();
        let cancel = CancelHandle::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let counter = Arc::clone(&attempts);
        let failure = executor
            .execute_with_retry(&RetryPolicy::default(), &cancel, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(http(502)) }
            })
            .await
            .expect_err("must be cancelled");

        assert!(failure.is_cancelled());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pre_cancelled_handle_runs_nothing() {
        let executor = RetryExecutor::default();
        let cancel = CancelHandle::new();
        cancel.cancel();
        let attempts = AtomicU32::new(0);

        let failure = executor
            .execute_with_retry(&RetryPolicy::default(), &cancel, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, NotebookError>(()) }
            })
            .await
            .expect_err("must not run");

        assert!(failure.is_cancelled());
        assert_eq!(failure.attempts, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
