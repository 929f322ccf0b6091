//! Wall-clock abstraction for timestamps.
//!
//! Durations are measured with `tokio::time::Instant`; this only covers the
//! epoch-millisecond stamps written to results and records.

use chrono::Utc;

/// Source of epoch-millisecond timestamps.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Test clock: returns `now`, then advances it by `step`.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::atomic::AtomicI64,
    step: i64,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self::stepping(start, 0)
    }

    pub fn stepping(start: i64, step: i64) -> Self {
        Self {
            now: std::sync::atomic::AtomicI64::new(start),
            step,
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.fetch_add(self.step, std::sync::atomic::Ordering::SeqCst)
    }
}
