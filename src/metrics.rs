use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::Error;
use crate::response::HttpResponse;
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default)]
pub struct ClientMetricsSnapshot {
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub cancelled: u64,
    pub timeouts: u64,
    pub transport_errors: u64,
    pub http_status_errors: u64,
    pub interceptor_errors: u64,
    pub retries: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    pub status_counts: BTreeMap<u16, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ClientMetrics {
    inner: Arc<ClientMetricsInner>,
}

#[derive(Debug, Default)]
struct ClientMetricsInner {
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    cancelled: AtomicU64,
    timeouts: AtomicU64,
    transport_errors: AtomicU64,
    http_status_errors: AtomicU64,
    interceptor_errors: AtomicU64,
    retries: AtomicU64,
    in_flight: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
}

pub(crate) struct InFlightGuard {
    metrics: ClientMetrics,
}

impl ClientMetrics {
    pub(crate) fn record_request_started(&self) {
        self.inner.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_in_flight(&self) -> InFlightGuard {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            metrics: self.clone(),
        }
    }

    pub(crate) fn record_retries(&self, retries: u64) {
        self.inner.retries.fetch_add(retries, Ordering::Relaxed);
    }

    pub(crate) fn record_request_completed(
        &self,
        result: &Result<HttpResponse, Error>,
        latency: Duration,
    ) {
        self.record_latency(latency);
        match result {
            Ok(response) => {
                self.inner
                    .requests_succeeded
                    .fetch_add(1, Ordering::Relaxed);
                self.add_status_count(response.status().as_u16());
            }
            Err(error) => self.record_error(error),
        }
    }

    fn record_error(&self, error: &Error) {
        self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
        let counter = match error {
            Error::Cancelled { .. } => &self.inner.cancelled,
            Error::Timeout { .. } => &self.inner.timeouts,
            Error::Transport { .. } => &self.inner.transport_errors,
            Error::Interceptor { .. } => &self.inner.interceptor_errors,
            Error::HttpStatus { status, .. } => {
                self.add_status_count(*status);
                &self.inner.http_status_errors
            }
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ClientMetricsSnapshot {
        let latency_samples = self.inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = self.inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        ClientMetricsSnapshot {
            requests_started: self.inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: self.inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            cancelled: self.inner.cancelled.load(Ordering::Relaxed),
            timeouts: self.inner.timeouts.load(Ordering::Relaxed),
            transport_errors: self.inner.transport_errors.load(Ordering::Relaxed),
            http_status_errors: self.inner.http_status_errors.load(Ordering::Relaxed),
            interceptor_errors: self.inner.interceptor_errors.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts: lock_unpoisoned(&self.inner.status_counts).clone(),
        }
    }

    fn record_latency(&self, latency: Duration) {
        self.inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    fn add_status_count(&self, status: u16) {
        let mut status_counts = lock_unpoisoned(&self.inner.status_counts);
        *status_counts.entry(status).or_insert(0) += 1;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
