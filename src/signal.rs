//! Caller cancellation handles and the per-attempt effective signal.
//!
//! A [`CancelSignal`] is owned by the caller and may be shared by any number
//! of requests. Each transport attempt builds an [`EffectiveSignal`] that
//! merges the caller's signal (when present) with the attempt deadline. The
//! merge is an explicit two-state machine: it stays [`SignalState::Live`]
//! until one source fires and then records which one won. Both listeners are
//! plain futures owned by the attempt, so they are torn down as soon as the
//! signal settles or the attempt returns.

use std::time::Duration;

use tokio::time::{Instant, Sleep, sleep_until};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

#[derive(Clone, Debug, Default)]
pub struct CancelSignal {
    token: CancellationToken,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// A signal that fires when this one fires, but can also be cancelled on
    /// its own without affecting the parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortSource {
    Caller,
    Deadline,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalState {
    Live,
    Fired(AbortSource),
}

// Roughly 30 years; timeouts past the representable range saturate here.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[derive(Debug)]
pub struct EffectiveSignal<'a> {
    caller: Option<&'a CancelSignal>,
    deadline: Instant,
    timeout: Duration,
    state: SignalState,
}

impl<'a> EffectiveSignal<'a> {
    pub fn new(caller: Option<&'a CancelSignal>, timeout: Duration) -> Self {
        let state = match caller {
            Some(caller) if caller.is_cancelled() => SignalState::Fired(AbortSource::Caller),
            _ => SignalState::Live,
        };
        Self {
            caller,
            deadline: deadline_after(timeout),
            timeout,
            state,
        }
    }

    pub fn state(&self) -> SignalState {
        self.state
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_fired(&self) -> bool {
        matches!(self.state, SignalState::Fired(_))
    }

    /// Waits for the first source to fire and latches it.
    ///
    /// Once fired, later calls return the latched source immediately. When
    /// both sources are ready at the same poll the caller wins, so a caller
    /// cancellation is never reported as a timeout.
    pub async fn fired(&mut self) -> AbortSource {
        if let SignalState::Fired(source) = self.state {
            return source;
        }

        let deadline: Sleep = sleep_until(self.deadline);
        let source = match self.caller {
            Some(caller) => {
                tokio::select! {
                    biased;
                    _ = caller.cancelled() => AbortSource::Caller,
                    _ = deadline => {
                        if caller.is_cancelled() {
                            AbortSource::Caller
                        } else {
                            AbortSource::Deadline
                        }
                    }
                }
            }
            None => {
                deadline.await;
                AbortSource::Deadline
            }
        };
        self.state = SignalState::Fired(source);
        source
    }
}
