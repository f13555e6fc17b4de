use std::time::{Duration, SystemTime};

/// Per-attempt timeout as a pure function of the attempt index (0-based).
pub trait AttemptTimeout: Send + Sync {
    fn timeout_for_attempt(&self, base: Duration, attempt: usize) -> Duration;
}

#[derive(Debug, Default)]
pub struct ConstantAttemptTimeout;

impl AttemptTimeout for ConstantAttemptTimeout {
    fn timeout_for_attempt(&self, base: Duration, _attempt: usize) -> Duration {
        base
    }
}

/// `base * (attempt + 1)`: 1x for the first try, 2x for the first retry, and so on.
#[derive(Debug, Default)]
pub struct LinearAttemptTimeout;

impl AttemptTimeout for LinearAttemptTimeout {
    fn timeout_for_attempt(&self, base: Duration, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt.saturating_add(1)).unwrap_or(u32::MAX);
        base.saturating_mul(factor)
    }
}

pub trait Clock: Send + Sync {
    fn now_system(&self) -> SystemTime;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }
}
