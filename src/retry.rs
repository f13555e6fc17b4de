use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, ErrorCode};
use crate::extensions::{AttemptTimeout, Clock, ConstantAttemptTimeout, SystemClock};
use crate::observe::Observer;
use crate::signal::CancelSignal;
use crate::timeout::call_with_timeout;
use crate::transport::Transport;
use crate::util::{parse_retry_after, redact_uri_for_logs};

pub(crate) const DEFAULT_RETRIES: usize = 3;
pub(crate) const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backoff {
    /// The same interval before every retry.
    #[default]
    Constant,
    /// Doubles the interval before each further retry, capped at `max`.
    Exponential { max: Duration },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    retries: usize,
    interval: Duration,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(retries: usize, interval: Duration) -> Self {
        Self {
            retries,
            interval,
            backoff: Backoff::Constant,
        }
    }

    /// One attempt, no retries.
    pub fn disabled() -> Self {
        Self::new(0, DEFAULT_RETRY_INTERVAL)
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn retries_value(&self) -> usize {
        self.retries
    }

    pub fn interval_value(&self) -> Duration {
        self.interval
    }

    pub fn backoff_value(&self) -> Backoff {
        self.backoff
    }

    /// Wait before retry number `retry_index` (1 for the first retry).
    pub(crate) fn interval_for_retry(&self, retry_index: usize) -> Duration {
        match self.backoff {
            Backoff::Constant => self.interval,
            Backoff::Exponential { max } => {
                let exponent = retry_index.saturating_sub(1).min(31) as u32;
                self.interval
                    .saturating_mul(1_u32 << exponent)
                    .min(max.max(self.interval))
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRIES, DEFAULT_RETRY_INTERVAL)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryState {
    Attempting(usize),
    Waiting,
    Succeeded,
    Cancelled,
    Exhausted,
}

impl RetryState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Cancelled | Self::Exhausted)
    }
}

/// Describes a failed attempt that is about to be retried.
#[derive(Clone, Debug)]
pub struct RetryDecision {
    pub attempt: usize,
    pub max_retries: usize,
    pub method: Method,
    pub uri: String,
    pub status: Option<StatusCode>,
    pub error_code: Option<ErrorCode>,
    pub retry_after: Option<Duration>,
}

#[derive(Debug)]
pub struct RetryOutcome {
    pub state: RetryState,
    pub attempts: usize,
    pub result: Result<Response<Bytes>, Error>,
}

impl RetryOutcome {
    pub fn into_result(self) -> Result<Response<Bytes>, Error> {
        self.result
    }
}

enum AttemptFailure {
    Status(Response<Bytes>),
    Failed(Error),
}

pub struct RetryController<'a> {
    transport: &'a dyn Transport,
    policy: RetryPolicy,
    base_timeout: Duration,
    attempt_timeout: Arc<dyn AttemptTimeout>,
    clock: Arc<dyn Clock>,
    observers: &'a [Arc<dyn Observer>],
}

impl<'a> RetryController<'a> {
    pub fn new(transport: &'a dyn Transport, policy: RetryPolicy, base_timeout: Duration) -> Self {
        Self {
            transport,
            policy,
            base_timeout,
            attempt_timeout: Arc::new(ConstantAttemptTimeout),
            clock: Arc::new(SystemClock),
            observers: &[],
        }
    }

    pub fn attempt_timeout(mut self, attempt_timeout: Arc<dyn AttemptTimeout>) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn observers(mut self, observers: &'a [Arc<dyn Observer>]) -> Self {
        self.observers = observers;
        self
    }

    /// Drives one request through the retry state machine.
    ///
    /// A non-2xx response that survives the whole budget is returned as `Ok`;
    /// a timeout or transport failure that does so is returned as `Err`.
    pub async fn run(
        &self,
        template: &Request<Bytes>,
        caller: Option<&CancelSignal>,
    ) -> RetryOutcome {
        let method = template.method().clone();
        let uri = redact_uri_for_logs(&template.uri().to_string());
        let max_retries = self.policy.retries_value();
        let mut attempts = 0_usize;
        let mut attempt = 0_usize;

        loop {
            if caller.is_some_and(CancelSignal::is_cancelled) {
                return cancelled_outcome(attempts, &method, &uri);
            }

            let state = RetryState::Attempting(attempt);
            let timeout = self
                .attempt_timeout
                .timeout_for_attempt(self.base_timeout, attempt);
            debug!(?state, timeout_ms = timeout.as_millis() as u64, "sending attempt");
            attempts += 1;

            let request = clone_request(template);
            let failure = match call_with_timeout(self.transport, request, caller, timeout).await {
                Ok(response) if response.status().is_success() => {
                    return RetryOutcome {
                        state: RetryState::Succeeded,
                        attempts,
                        result: Ok(response),
                    };
                }
                Ok(response) => AttemptFailure::Status(response),
                Err(error) if error.is_cancelled() => {
                    return cancelled_outcome(attempts, &method, &uri);
                }
                Err(error) if error.is_retryable() => AttemptFailure::Failed(error),
                Err(error) => {
                    return RetryOutcome {
                        state: RetryState::Exhausted,
                        attempts,
                        result: Err(error),
                    };
                }
            };

            if attempt >= max_retries {
                let result = match failure {
                    AttemptFailure::Status(response) => {
                        warn!(
                            status = response.status().as_u16(),
                            attempts, "retries exhausted; returning last response"
                        );
                        Ok(response)
                    }
                    AttemptFailure::Failed(error) => {
                        warn!(code = error.code().as_str(), attempts, "retries exhausted");
                        Err(error)
                    }
                };
                return RetryOutcome {
                    state: RetryState::Exhausted,
                    attempts,
                    result,
                };
            }

            let (status, error_code, retry_after) = match &failure {
                AttemptFailure::Status(response) => (
                    Some(response.status()),
                    None,
                    parse_retry_after(response.headers(), self.clock.now_system()),
                ),
                AttemptFailure::Failed(error) => (None, Some(error.code()), None),
            };
            let delay =
                retry_after.unwrap_or_else(|| self.policy.interval_for_retry(attempt + 1));
            let decision = RetryDecision {
                attempt,
                max_retries,
                method: method.clone(),
                uri: uri.clone(),
                status,
                error_code,
                retry_after,
            };
            for observer in self.observers {
                observer.on_retry_scheduled(&decision, delay);
            }
            debug!(
                state = ?RetryState::Waiting,
                delay_ms = delay.as_millis() as u64,
                server_hint = retry_after.is_some(),
                "scheduling retry"
            );

            if !wait_unless_cancelled(delay, caller).await {
                return cancelled_outcome(attempts, &method, &uri);
            }
            attempt += 1;
        }
    }
}

/// Sleeps for `delay`; returns `false` as soon as the caller cancels.
async fn wait_unless_cancelled(delay: Duration, caller: Option<&CancelSignal>) -> bool {
    match caller {
        Some(caller) => {
            tokio::select! {
                biased;
                _ = caller.cancelled() => false,
                _ = sleep(delay) => true,
            }
        }
        None => {
            sleep(delay).await;
            true
        }
    }
}

fn cancelled_outcome(attempts: usize, method: &Method, uri: &str) -> RetryOutcome {
    debug!(attempts, "request cancelled during retry loop");
    RetryOutcome {
        state: RetryState::Cancelled,
        attempts,
        result: Err(Error::cancelled(method, uri)),
    }
}

pub(crate) fn clone_request(template: &Request<Bytes>) -> Request<Bytes> {
    let mut request = Request::new(template.body().clone());
    *request.method_mut() = template.method().clone();
    *request.uri_mut() = template.uri().clone();
    *request.version_mut() = template.version();
    *request.headers_mut() = template.headers().clone();
    request
}
