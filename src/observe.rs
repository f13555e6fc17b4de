use std::time::Duration;

use crate::queue::{Priority, QueueSnapshot};
use crate::retry::RetryDecision;

pub trait Observer: Send + Sync {
    fn on_enqueued(&self, _priority: Priority, _queue: &QueueSnapshot) {}

    fn on_dispatched(&self, _priority: Priority, _queue: &QueueSnapshot) {}

    fn on_retry_scheduled(&self, _decision: &RetryDecision, _delay: Duration) {}
}
