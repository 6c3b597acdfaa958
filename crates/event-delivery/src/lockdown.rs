//! Circuit-breaker state and backoff arithmetic.
//!
//! A lockdown is the breaker's "open" state. Each failure while unlocked
//! starts a new lockdown whose length is:
//!
//! - the backoff recommended by the collector, if it sent one;
//! - otherwise twice the previous lockdown, if there was one;
//! - otherwise the configured base.
//!
//! The result is clamped to the configured maximum. Any success resets the
//! state, so the next failure starts again from the base.

use crate::clock::{Clock, SystemClock};
use crate::error::ConnectionError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default first lockdown.
pub const DEFAULT_BASE_LOCKDOWN: Duration = Duration::from_millis(1_000);

/// Default ceiling for any lockdown.
pub const DEFAULT_MAX_LOCKDOWN: Duration = Duration::from_millis(300_000);

/// Lockdown configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockdownConfig {
    /// Length of the first lockdown after a healthy period.
    #[serde(rename = "base_ms", with = "crate::config::millis")]
    pub base_duration: Duration,
    /// Upper bound for any lockdown, including recommended backoffs.
    #[serde(rename = "max_ms", with = "crate::config::millis")]
    pub max_duration: Duration,
}

impl Default for LockdownConfig {
    fn default() -> Self {
        Self {
            base_duration: DEFAULT_BASE_LOCKDOWN,
            max_duration: DEFAULT_MAX_LOCKDOWN,
        }
    }
}

#[derive(Debug, Default)]
struct LockdownState {
    started_at: Option<Instant>,
    duration: Duration,
}

impl LockdownState {
    fn remaining(&self, now: Instant) -> Option<Duration> {
        let started_at = self.started_at?;
        let elapsed = now.saturating_duration_since(started_at);
        if elapsed < self.duration {
            Some(self.duration - elapsed)
        } else {
            None
        }
    }
}

/// Thread-safe lockdown bookkeeping shared by every sender of one collector.
#[derive(Debug)]
pub struct LockdownManager {
    config: LockdownConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<LockdownState>,
}

impl LockdownManager {
    /// Create a manager using the system clock.
    pub fn new(config: LockdownConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: LockdownConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(LockdownState::default()),
        }
    }

    pub fn config(&self) -> &LockdownConfig {
        &self.config
    }

    /// Whether sends should currently fail fast.
    pub fn is_locked_down(&self) -> bool {
        self.remaining().is_some()
    }

    /// Time left in the current lockdown, `None` when unlocked.
    pub fn remaining(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.state.lock().remaining(now)
    }

    /// Length of the most recent lockdown (zero after a success).
    pub fn current_duration(&self) -> Duration {
        self.state.lock().duration
    }

    /// Clear the lockdown after a successful send.
    pub fn unlock(&self) {
        let mut state = self.state.lock();
        state.duration = Duration::ZERO;
        state.started_at = None;
    }

    /// Start a lockdown after a failed send.
    ///
    /// Returns `false` without changing anything if a lockdown is already in
    /// effect; concurrent senders failing at once extend nothing.
    pub fn lockdown(&self, failure: Option<&ConnectionError>) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.remaining(now).is_some() {
            return false;
        }

        let duration = match failure.and_then(ConnectionError::recommended_backoff) {
            Some(recommended) => recommended,
            None if state.duration > Duration::ZERO => state.duration.saturating_mul(2),
            None => self.config.base_duration,
        };

        state.duration = duration.min(self.config.max_duration);
        state.started_at = Some(now);

        debug!(
            lockdown_ms = state.duration.as_millis() as u64,
            "Lockdown started"
        );
        true
    }
}
