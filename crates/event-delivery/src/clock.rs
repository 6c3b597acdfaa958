//! Clock abstraction so lockdown and buffer aging can be tested without sleeping.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant, used for lockdown windows.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for buffered event ages (survives restarts).
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
///
/// Clones share the same offset, so a test can keep one handle and give
/// another to the component under test.
#[derive(Debug, Clone)]
pub struct TestClock {
    elapsed_ns: Arc<AtomicU64>,
    base_instant: Instant,
    base_utc: DateTime<Utc>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            base_instant: Instant::now(),
            base_utc: Utc::now(),
        }
    }

    /// Move both clocks forward.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_ns.fetch_add(ns, Ordering::AcqRel);
    }

    fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let ns = i64::try_from(self.elapsed_ns.load(Ordering::Acquire)).unwrap_or(i64::MAX);
        self.base_utc + chrono::Duration::nanoseconds(ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_both_sources() {
        let clock = TestClock::new();
        let start = clock.now();
        let start_utc = clock.now_utc();

        clock.advance(Duration::from_secs(10));

        assert_eq!(clock.now().duration_since(start), Duration::from_secs(10));
        assert_eq!((clock.now_utc() - start_utc).num_seconds(), 10);
    }

    #[test]
    fn test_clones_share_time() {
        let clock = TestClock::new();
        let handle = clock.clone();
        let start = handle.now();

        clock.advance(Duration::from_millis(1500));

        assert_eq!(handle.now().duration_since(start), Duration::from_millis(1500));
    }
}
