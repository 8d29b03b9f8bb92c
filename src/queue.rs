//! In-memory FIFO of requests issued while offline.
//!
//! The queue is not persisted: entries still queued when the process exits
//! are lost.

use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::SystemTime,
};

use serde_json::Value;

use crate::{listeners::lock, RequestDescriptor, RequestFailure};

/// A request waiting for connectivity.
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedRequest {
    /// Position in enqueue order, unique per queue.
    pub sequence: u64,
    pub enqueued_at: SystemTime,
    pub descriptor: RequestDescriptor,
}

/// A queued request whose replay failed; it is not requeued.
#[derive(Clone, Debug, PartialEq)]
pub struct ResidualFailure {
    pub request: QueuedRequest,
    pub failure: RequestFailure,
}

/// Summary of one drain pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
    pub residual: Vec<ResidualFailure>,
    /// Entries left queued because connectivity dropped mid-drain.
    pub remaining: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<QueuedRequest>,
    next_sequence: u64,
}

/// FIFO of offline requests with a single-drain guarantee.
#[derive(Debug, Default)]
pub struct OfflineQueue {
    state: Mutex<QueueState>,
    draining: AtomicBool,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `descriptor` to the tail and returns its sequence number.
    pub fn push(&self, descriptor: RequestDescriptor) -> u64 {
        let mut state = lock(&self.state);
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.entries.push_back(QueuedRequest {
            sequence,
            enqueued_at: SystemTime::now(),
            descriptor,
        });
        sequence
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies of the queued entries in replay order.
    pub fn snapshot(&self) -> Vec<QueuedRequest> {
        lock(&self.state).entries.iter().cloned().collect()
    }

    /// Drops every queued entry and returns how many were discarded.
    pub fn clear(&self) -> usize {
        let mut state = lock(&self.state);
        let discarded = state.entries.len();
        state.entries.clear();
        discarded
    }

    /// Appends `descriptor` when `offline` or while a drain is running, and
    /// hands it back otherwise.
    ///
    /// The check and the append happen under the queue lock, and a drain
    /// only ends under that same lock, so an accepted entry is always seen
    /// by the running pass.
    pub fn push_unless_idle(
        &self,
        offline: bool,
        descriptor: RequestDescriptor,
    ) -> Result<u64, RequestDescriptor> {
        let mut state = lock(&self.state);
        if !offline && !self.draining.load(Ordering::Acquire) {
            return Err(descriptor);
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.entries.push_back(QueuedRequest {
            sequence,
            enqueued_at: SystemTime::now(),
            descriptor,
        });
        Ok(sequence)
    }

    /// `true` while a drain pass is running.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Replays queued entries front to back, one at a time.
    ///
    /// Returns `None` without touching the queue if another drain is already
    /// running. Entries pushed during the pass are replayed by it as well.
    /// `keep_going` is consulted before each entry; when it returns `false`
    /// the pass stops and the rest stays queued. An entry leaves the queue
    /// only once its replay settled, so abandoning the returned future never
    /// loses the entry in flight.
    pub async fn drain<C, F, Fut>(&self, keep_going: C, mut replay: F) -> Option<DrainReport>
    where
        C: Fn() -> bool,
        F: FnMut(&QueuedRequest) -> Fut,
        Fut: Future<Output = Result<Value, RequestFailure>>,
    {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            #[cfg(feature = "tracing")]
            tracing::debug!("drain already in progress");
            return None;
        }
        let mut guard = DrainGuard {
            draining: &self.draining,
            released: false,
        };

        let mut report = DrainReport::default();
        loop {
            let next = {
                let state = lock(&self.state);
                let next = match state.entries.front() {
                    Some(entry) if keep_going() => Some(entry.clone()),
                    _ => {
                        // ends the pass under the lock `push_unless_idle` takes
                        self.draining.store(false, Ordering::Release);
                        guard.released = true;
                        None
                    }
                };
                next
            };
            let Some(entry) = next else {
                break;
            };

            let outcome = replay(&entry).await;

            {
                let mut state = lock(&self.state);
                if state
                    .entries
                    .front()
                    .is_some_and(|front| front.sequence == entry.sequence)
                {
                    state.entries.pop_front();
                }
            }

            match outcome {
                Ok(_) => report.succeeded += 1,
                Err(failure) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        sequence = entry.sequence,
                        endpoint = entry.descriptor.endpoint(),
                        kind = %failure.kind,
                        detail = %failure.detail,
                        "queued request failed on replay"
                    );
                    report.failed += 1;
                    report.residual.push(ResidualFailure {
                        request: entry,
                        failure,
                    });
                }
            }
        }

        report.remaining = self.len();
        Some(report)
    }
}

/// Clears the draining flag if the pass is abandoned mid-way.
struct DrainGuard<'a> {
    draining: &'a AtomicBool,
    released: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.draining.store(false, Ordering::Release);
        }
    }
}
