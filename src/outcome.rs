use serde::Serialize;
use serde_json::Value;

use crate::{ErrorKind, RetryFailure};

/// Failed outcome of a façade request.
///
/// `message` is the fixed sentence for `kind` and is safe to show to users;
/// `detail` holds the raw diagnostic text and is meant for logs only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RequestFailure {
    pub kind: ErrorKind,
    pub message: &'static str,
    pub retriable: bool,
    pub detail: String,
    /// HTTP status of the last attempt, when a response was received.
    pub status: Option<u16>,
    pub attempts: u32,
}

impl From<RetryFailure> for RequestFailure {
    fn from(failure: RetryFailure) -> Self {
        let retriable = failure.kind.is_retryable()
            && !failure.is_cancelled()
            && !failure.error.is_malformed_request();
        Self {
            kind: failure.kind,
            message: failure.kind.user_message(),
            retriable,
            status: failure.error.status(),
            detail: failure.error.to_string(),
            attempts: failure.attempts,
        }
    }
}

/// Result of [`crate::NotebookClient::enqueue_or_execute`].
#[derive(Debug)]
pub enum Submission {
    /// The client was offline; the request waits in the offline queue.
    Queued { sequence: u64 },
    /// The request ran immediately.
    Completed(Result<Value, RequestFailure>),
}

impl Submission {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }

    /// The immediate outcome, or `None` if the request was queued.
    pub fn outcome(&self) -> Option<&Result<Value, RequestFailure>> {
        match self {
            Self::Queued { .. } => None,
            Self::Completed(outcome) => Some(outcome),
        }
    }

    pub fn into_outcome(self) -> Option<Result<Value, RequestFailure>> {
        match self {
            Self::Queued { .. } => None,
            Self::Completed(outcome) => Some(outcome),
        }
    }
}
