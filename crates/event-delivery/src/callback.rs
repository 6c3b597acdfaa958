//! Observers notified of every delivery attempt's outcome.

use crate::error::ConnectionError;
use crate::event::Event;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// External observer of delivery outcomes.
///
/// Called synchronously inside the send path, so implementations should be
/// quick. A panicking callback is logged and otherwise ignored.
pub trait SendCallback: Send + Sync {
    fn on_success(&self, event: &Event);

    fn on_failure(&self, event: &Event, error: &ConnectionError);
}

/// Ordered set of registered callbacks.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: RwLock<Vec<Arc<dyn SendCallback>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: Arc<dyn SendCallback>) {
        self.callbacks.write().push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify_success(&self, event: &Event) {
        for callback in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| callback.on_success(event))).is_err() {
                error!(event_id = %event.id, "Send callback panicked in on_success");
            }
        }
    }

    pub fn notify_failure(&self, event: &Event, failure: &ConnectionError) {
        for callback in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| callback.on_failure(event, failure))).is_err() {
                error!(
                    event_id = %event.id,
                    error = %failure,
                    "Send callback panicked in on_failure"
                );
            }
        }
    }

    // Invoked outside the lock so a callback may register another one.
    fn snapshot(&self) -> Vec<Arc<dyn SendCallback>> {
        self.callbacks.read().clone()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &self.len())
            .finish()
    }
}
