//! `notebook-sync` is the resilient data-access layer of a notebook
//! application.
//!
//! Every outbound request goes through [`NotebookClient`], which adds:
//! - per-attempt deadlines and caller cancellation ([`CancelHandle`])
//! - error classification into [`ErrorKind`] with fixed user-facing messages
//! - bounded exponential backoff ([`RetryPolicy`], [`RetryExecutor`])
//! - an in-memory offline queue replayed in order on reconnect
//!
//! [`SettingsService`] sits on top and turns rapid per-key settings writes
//! into one validated batch per quiet period.

mod classify;
mod client;
mod connectivity;
mod error;
mod fallback;
pub mod listeners;
mod options;
mod outcome;
mod policy;
pub mod queue;
mod request;
mod retry;
mod settings;
mod timeout;
mod transport;

#[cfg(test)]
mod testing;

pub use classify::{classify, Classifier, ErrorKind};
pub use client::{NotebookClient, ServiceStatus};
pub use connectivity::Connectivity;
pub use error::NotebookError;
pub use fallback::{FallbackStore, FileFallback, MemoryFallback};
pub use listeners::{Listeners, Subscription};
pub use options::ClientOptions;
pub use outcome::{RequestFailure, Submission};
pub use policy::RetryPolicy;
pub use queue::{DrainReport, QueuedRequest, ResidualFailure};
pub use request::{Method, RequestDescriptor, RequestOptions};
pub use retry::{RetryExecutor, RetryFailure, RetryNotice};
pub use settings::{
    validate_setting, DebouncePhase, FlushReport, KeyOutcome, SaveStatus, Settings,
    SettingsOptions, SettingsService, StatusCallback,
};
pub use timeout::{CancelHandle, TimeoutController};
pub use transport::{HttpTransport, Transport, TransportResponse};

pub type Result<T> = std::result::Result<T, NotebookError>;
