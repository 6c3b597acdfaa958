//! Circuit breaker around a leaf transport.

use crate::callback::{CallbackRegistry, SendCallback};
use crate::connection::{Connection, SendOutcome, SendResult, Transport};
use crate::error::ConnectionError;
use crate::event::Event;
use crate::lockdown::LockdownManager;
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Fails fast while the collector is locked down; otherwise delegates to
/// the transport and feeds the outcome back into the [`LockdownManager`].
///
/// This is the layer that owns the send callbacks, so callbacks observe
/// every real delivery attempt and nothing else.
pub struct CircuitBreakingConnection {
    transport: Arc<dyn Transport>,
    lockdown: Arc<LockdownManager>,
    callbacks: CallbackRegistry,
    closed: AtomicBool,
}

impl CircuitBreakingConnection {
    pub fn new(transport: Arc<dyn Transport>, lockdown: Arc<LockdownManager>) -> Self {
        Self {
            transport,
            lockdown,
            callbacks: CallbackRegistry::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn lockdown_manager(&self) -> &Arc<LockdownManager> {
        &self.lockdown
    }
}

#[async_trait]
impl Connection for CircuitBreakingConnection {
    async fn send(&self, event: Arc<Event>) -> SendResult {
        if let Some(remaining) = self.lockdown.remaining() {
            trace!(
                event_id = %event.id,
                remaining_ms = remaining.as_millis() as u64,
                "Circuit open, not sending"
            );
            return Err(ConnectionError::CircuitOpen { remaining });
        }

        match self.transport.do_send(&event).await {
            Ok(outcome) if !outcome.reached_collector() => {
                trace!(event_id = %event.id, "Event sampled out");
                Ok(())
            }
            Ok(outcome) => {
                self.lockdown.unlock();
                if let SendOutcome::Filtered { response_code } = outcome {
                    debug!(
                        event_id = %event.id,
                        response_code,
                        "Event was filtered by the collector"
                    );
                }
                self.callbacks.notify_success(&event);
                Ok(())
            }
            Err(err) => {
                self.callbacks.notify_failure(&event, &err);
                if self.lockdown.lockdown(Some(&err)) {
                    warn!(
                        transport = self.transport.name(),
                        error = %err,
                        lockdown_ms = self.lockdown.current_duration().as_millis() as u64,
                        "Sends locked down after failure"
                    );
                }
                Err(err)
            }
        }
    }

    fn add_send_callback(&self, callback: Arc<dyn SendCallback>) {
        self.callbacks.register(callback);
    }

    async fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(transport = self.transport.name(), "Closing transport");
        self.transport.close().await
    }
}
