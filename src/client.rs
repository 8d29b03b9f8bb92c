use std::{fmt, sync::Arc};

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::{
    queue::{DrainReport, OfflineQueue},
    CancelHandle, Classifier, ClientOptions, Connectivity, HttpTransport, NotebookError,
    RequestDescriptor, RequestFailure, RetryExecutor, RetryPolicy, Submission, TimeoutController,
    Transport,
};

const HEALTH_ENDPOINT: &str = "/health";
const HEALTH_TIMEOUT_MS: u64 = 5_000;

/// Snapshot returned by [`NotebookClient::service_status`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServiceStatus {
    /// Online and the health probe succeeded.
    pub healthy: bool,
    pub online: bool,
    pub offline_queue_len: usize,
    /// Body returned by the health endpoint, if it answered.
    pub health: Option<Value>,
}

/// Façade for resilient requests against the notebook data service.
///
/// Cloning is cheap; clones share the transport, connectivity flag, offline
/// queue and retry observers.
#[derive(Clone)]
pub struct NotebookClient {
    transport: Arc<dyn Transport>,
    options: ClientOptions,
    connectivity: Connectivity,
    queue: Arc<OfflineQueue>,
    retry: RetryExecutor,
}

impl fmt::Debug for NotebookClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotebookClient")
            .field("options", &self.options)
            .field("connectivity", &self.connectivity)
            .field("offline_queue_len", &self.queue.len())
            .finish()
    }
}

impl NotebookClient {
    /// Creates a client that talks HTTP to `base_url` without authorization.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_transport(HttpTransport::new(base_url))
    }

    /// Creates an HTTP client authorized with a bearer token.
    ///
    /// If the token is missing the `Bearer ` prefix, it is added automatically.
    pub fn new_bearer(base_url: impl Into<String>, token: impl AsRef<str>) -> Self {
        Self::with_transport(HttpTransport::new(base_url).with_bearer(token))
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `NOTEBOOK_API_URL`: base URL of the data service
    /// - `NOTEBOOK_API_TOKEN`: access token (Bearer prefix optional)
    ///
    /// plus the optional overrides documented on [`ClientOptions::from_env`].
    pub fn from_env() -> crate::Result<Self> {
        let url = std::env::var("NOTEBOOK_API_URL").map_err(|_| {
            NotebookError::Config("missing NOTEBOOK_API_URL environment variable".to_owned())
        })?;
        let token = std::env::var("NOTEBOOK_API_TOKEN").map_err(|_| {
            NotebookError::Config("missing NOTEBOOK_API_TOKEN environment variable".to_owned())
        })?;
        if url.trim().is_empty() {
            return Err(NotebookError::Config(
                "NOTEBOOK_API_URL is set but empty".to_owned(),
            ));
        }
        if token.trim().is_empty() {
            return Err(NotebookError::Config(
                "NOTEBOOK_API_TOKEN is set but empty".to_owned(),
            ));
        }
        Ok(Self::new_bearer(url, token).with_options(ClientOptions::from_env()?))
    }

    /// Creates a client over any [`Transport`], initially online.
    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self::with_shared_transport(Arc::new(transport))
    }

    pub fn with_shared_transport(transport: Arc<dyn Transport>) -> Self {
        let connectivity = Connectivity::default();
        Self {
            transport,
            options: ClientOptions::default(),
            retry: RetryExecutor::new(Classifier::with_connectivity(connectivity.clone())),
            connectivity,
            queue: Arc::new(OfflineQueue::new()),
        }
    }

    /// Applies timeout and retry defaults.
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses an externally owned connectivity flag.
    ///
    /// Retry observers registered before this call are dropped.
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.retry = RetryExecutor::new(Classifier::with_connectivity(connectivity.clone()));
        self.connectivity = connectivity;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Retry executor used for every request; register observers here.
    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Runs `descriptor` now, regardless of connectivity.
    pub async fn execute(&self, descriptor: &RequestDescriptor) -> Result<Value, RequestFailure> {
        self.execute_cancellable(descriptor, &CancelHandle::new())
            .await
    }

    /// Like [`execute`](Self::execute), but abortable through `cancel`.
    ///
    /// Every attempt is bounded by the descriptor's timeout (or the client
    /// default) and the sequence follows the client's retry policy, with the
    /// descriptor's `max_retries` taking precedence.
    pub async fn execute_cancellable(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancelHandle,
    ) -> Result<Value, RequestFailure> {
        let policy = self.policy_for(descriptor);
        let controller = TimeoutController::from_millis(
            descriptor
                .options()
                .timeout_ms
                .unwrap_or(self.options.timeout_ms),
        );
        let transport = &self.transport;

        let result = self
            .retry
            .execute_with_retry(&policy, cancel, || {
                controller.run(cancel, transport.send(descriptor))
            })
            .await;

        match result {
            Ok(response) => Ok(response.body),
            Err(failure) => {
                let failure = RequestFailure::from(failure);
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    method = %descriptor.method(),
                    endpoint = descriptor.endpoint(),
                    kind = %failure.kind,
                    attempts = failure.attempts,
                    detail = %failure.detail,
                    "request failed"
                );
                Err(failure)
            }
        }
    }

    /// Runs `descriptor` if online, otherwise appends it to the offline queue.
    ///
    /// While a drain is running, new requests also go to the tail of the
    /// queue so they replay after everything queued before them.
    pub async fn enqueue_or_execute(&self, descriptor: RequestDescriptor) -> Submission {
        self.enqueue_or_execute_cancellable(descriptor, &CancelHandle::new())
            .await
    }

    /// Like [`enqueue_or_execute`](Self::enqueue_or_execute), but an
    /// immediate execution is abortable through `cancel`.
    ///
    /// A queued request is not tied to `cancel`; use
    /// [`clear_offline_queue`](Self::clear_offline_queue) to discard it.
    pub async fn enqueue_or_execute_cancellable(
        &self,
        descriptor: RequestDescriptor,
        cancel: &CancelHandle,
    ) -> Submission {
        let offline = !self.connectivity.is_online();
        match self.queue.push_unless_idle(offline, descriptor) {
            Ok(sequence) => {
                #[cfg(feature = "tracing")]
                tracing::info!(sequence, offline, queued = self.queue.len(), "request queued");
                Submission::Queued { sequence }
            }
            Err(descriptor) => {
                Submission::Completed(self.execute_cancellable(&descriptor, cancel).await)
            }
        }
    }

    /// Replays the offline queue in order through the retry executor.
    ///
    /// Returns `None` if a drain is already running. The pass stops early if
    /// connectivity drops again.
    pub async fn drain_offline_queue(&self) -> Option<DrainReport> {
        let connectivity = &self.connectivity;
        let report = self
            .queue
            .drain(
                || connectivity.is_online(),
                |entry| {
                    let descriptor = entry.descriptor.clone();
                    async move { self.execute(&descriptor).await }
                },
            )
            .await?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            remaining = report.remaining,
            "offline queue drained"
        );
        Some(report)
    }

    /// Spawns a task that drains the offline queue on every offline to
    /// online transition.
    ///
    /// The task runs until the returned handle is aborted.
    pub fn spawn_connectivity_watcher(&self) -> JoinHandle<()> {
        let client = self.clone();
        let mut changes = self.connectivity.subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let online = *changes.borrow_and_update();
                if online && !client.queue.is_empty() {
                    client.drain_offline_queue().await;
                }
            }
        })
    }

    /// Number of requests waiting for connectivity.
    pub fn offline_queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Discards every queued request and returns how many were dropped.
    pub fn clear_offline_queue(&self) -> usize {
        self.queue.clear()
    }

    /// Runs `descriptors` in chunks of `batch_size`, each chunk concurrently.
    ///
    /// A failing request never stops its siblings; results keep input order.
    pub async fn execute_batch(
        &self,
        descriptors: Vec<RequestDescriptor>,
        batch_size: usize,
    ) -> Vec<Result<Value, RequestFailure>> {
        let mut results = Vec::with_capacity(descriptors.len());
        for chunk in descriptors.chunks(batch_size.max(1)) {
            let settled = join_all(chunk.iter().map(|descriptor| self.execute(descriptor))).await;
            results.extend(settled);
        }
        results
    }

    /// Probes the health endpoint and reports connectivity and queue size.
    pub async fn service_status(&self) -> ServiceStatus {
        let online = self.connectivity.is_online();
        let health = if online {
            let probe = RequestDescriptor::get(HEALTH_ENDPOINT)
                .with_timeout_ms(HEALTH_TIMEOUT_MS)
                .with_max_retries(1);
            self.execute(&probe).await.ok()
        } else {
            None
        };

        ServiceStatus {
            healthy: online && health.is_some(),
            online,
            offline_queue_len: self.queue.len(),
            health,
        }
    }

    fn policy_for(&self, descriptor: &RequestDescriptor) -> RetryPolicy {
        match descriptor.options().max_retries {
            Some(max_retries) => self.options.retry.clone().with_max_retries(max_retries),
            None => self.options.retry.clone(),
        }
    }
}
