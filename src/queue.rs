//! Priority admission queue bounding the number of active requests.
//!
//! Entries wait in arrival order until a slot frees. Every time the dispatch
//! loop runs it re-sorts the waiting entries by `(priority, arrival)` and
//! admits from the head until the active count reaches the limit. An admitted
//! entry receives an [`AdmissionPermit`]; dropping the permit releases the
//! slot and runs the dispatch loop again. Dispatch only ever runs while the
//! queue lock is held, so it cannot re-enter itself.

use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::Error;
use crate::signal::CancelSignal;
use crate::util::lock_unpoisoned;

pub(crate) const DEFAULT_MAX_CONCURRENT: usize = 6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub const fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub max_concurrent: usize,
    pub active: usize,
    pub pending: usize,
    pub peak_active: usize,
    pub dispatched: u64,
}

/// An entry's sender is only dropped unsent once its caller has cancelled,
/// so cancellation is the one way admission can fail.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("request cancelled while waiting for admission")]
    Cancelled,
}

impl AdmissionError {
    pub(crate) fn into_error(self, method: &http::Method, uri: &str) -> Error {
        match self {
            Self::Cancelled => Error::cancelled(method, uri),
        }
    }
}

#[derive(Clone)]
pub struct AdmissionQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    max_concurrent: usize,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<QueueEntry>,
    active: usize,
    next_sequence: u64,
    peak_active: usize,
    dispatched: u64,
}

struct QueueEntry {
    priority: Priority,
    sequence: u64,
    admit: oneshot::Sender<AdmissionPermit>,
    signal: Option<CancelSignal>,
}

impl QueueEntry {
    fn is_abandoned(&self) -> bool {
        self.admit.is_closed() || self.signal.as_ref().is_some_and(CancelSignal::is_cancelled)
    }
}

/// Proof of admission. Dropping it completes the request's slot.
#[must_use = "dropping the permit releases the slot immediately"]
pub struct AdmissionPermit {
    queue: Arc<QueueInner>,
    armed: bool,
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AdmissionPermit")
            .field("armed", &self.armed)
            .finish()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            self.queue.release();
        }
    }
}

struct PendingEntryGuard<'a> {
    queue: &'a QueueInner,
    sequence: u64,
    armed: bool,
}

impl Drop for PendingEntryGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.remove_pending(self.sequence);
        }
    }
}

impl QueueInner {
    fn release(self: &Arc<Self>) {
        let mut state = lock_unpoisoned(&self.state);
        state.active = state.active.saturating_sub(1);
        trace!(active = state.active, "admission slot released");
        self.dispatch(&mut state);
    }

    fn remove_pending(&self, sequence: u64) {
        let mut state = lock_unpoisoned(&self.state);
        state.pending.retain(|entry| entry.sequence != sequence);
    }

    fn dispatch(self: &Arc<Self>, state: &mut QueueState) {
        while state.active < self.max_concurrent && !state.pending.is_empty() {
            state
                .pending
                .sort_by_key(|entry| (entry.priority, entry.sequence));
            let entry = state.pending.remove(0);
            if entry.is_abandoned() {
                trace!(sequence = entry.sequence, "skipping abandoned queue entry");
                continue;
            }

            state.active += 1;
            let permit = AdmissionPermit {
                queue: Arc::clone(self),
                armed: true,
            };
            match entry.admit.send(permit) {
                Ok(()) => {
                    state.dispatched += 1;
                    state.peak_active = state.peak_active.max(state.active);
                    trace!(
                        sequence = entry.sequence,
                        priority = %entry.priority,
                        active = state.active,
                        "queue entry admitted"
                    );
                }
                Err(mut permit) => {
                    // Receiver went away between the check and the send.
                    permit.armed = false;
                    state.active -= 1;
                }
            }
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        let state = lock_unpoisoned(&self.state);
        QueueSnapshot {
            max_concurrent: self.max_concurrent,
            active: state.active,
            pending: state.pending.len(),
            peak_active: state.peak_active,
            dispatched: state.dispatched,
        }
    }
}

impl AdmissionQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                max_concurrent: max_concurrent.max(1),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.inner.snapshot()
    }

    /// Waits for a slot.
    ///
    /// Cancelling `signal` while waiting removes the entry and returns
    /// [`AdmissionError::Cancelled`] without consuming a slot.
    pub async fn admit(
        &self,
        priority: Priority,
        signal: Option<&CancelSignal>,
    ) -> Result<AdmissionPermit, AdmissionError> {
        if signal.is_some_and(CancelSignal::is_cancelled) {
            return Err(AdmissionError::Cancelled);
        }

        let (sender, mut receiver) = oneshot::channel();
        let sequence = {
            let mut state = lock_unpoisoned(&self.inner.state);
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.pending.push(QueueEntry {
                priority,
                sequence,
                admit: sender,
                signal: signal.cloned(),
            });
            self.inner.dispatch(&mut state);
            sequence
        };
        let mut guard = PendingEntryGuard {
            queue: &self.inner,
            sequence,
            armed: true,
        };

        let received = match signal {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => None,
                    received = &mut receiver => Some(received),
                }
            }
            None => Some((&mut receiver).await),
        };

        match received {
            Some(Ok(permit)) => {
                guard.armed = false;
                Ok(permit)
            }
            // Dispatch drops an unsent sender only for a cancelled entry.
            Some(Err(_)) => Err(AdmissionError::Cancelled),
            None => {
                trace!(sequence, "queue entry cancelled before admission");
                drop(guard);
                // A permit that raced in is released here.
                drop(receiver);
                Err(AdmissionError::Cancelled)
            }
        }
    }

    /// Runs `work` once admitted and holds the slot until it completes.
    ///
    /// The slot is released whatever `work` resolves to, and also when the
    /// returned future is dropped mid-flight.
    pub async fn enqueue<F, Fut>(
        &self,
        priority: Priority,
        signal: Option<&CancelSignal>,
        work: F,
    ) -> Result<Fut::Output, AdmissionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let permit = self.admit(priority, signal).await?;
        let output = work().await;
        drop(permit);
        Ok(output)
    }
}

impl std::fmt::Debug for AdmissionQueue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AdmissionQueue")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
