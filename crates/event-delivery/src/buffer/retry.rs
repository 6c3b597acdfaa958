//! Retry path: deliver a stored event and decide whether to keep it.

use super::store::EventStore;
use crate::callback::SendCallback;
use crate::connection::{Connection, SendResult};
use crate::error::ConnectionError;
use crate::event::Event;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Which failures remove an event from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Discard only events that can never succeed: non-retryable failures and
    /// client errors (4xx other than 408 and 429).
    #[default]
    DiscardOnPermanentRejection,
    /// Discard non-retryable failures and any failure where the collector
    /// answered with a status code.
    DiscardOnAnyResponse,
}

impl RetentionPolicy {
    pub fn should_discard(&self, failure: &ConnectionError) -> bool {
        if !failure.is_retryable() {
            return true;
        }
        match self {
            Self::DiscardOnPermanentRejection => {
                failure.response_code().is_some_and(is_permanent_rejection)
            }
            Self::DiscardOnAnyResponse => failure.response_code().is_some(),
        }
    }
}

fn is_permanent_rejection(code: u16) -> bool {
    (400..500).contains(&code) && code != 408 && code != 429
}

/// Delivers through the inner connection and maintains the store.
pub struct BufferedConnection {
    inner: Arc<dyn Connection>,
    store: Arc<dyn EventStore>,
    retention: RetentionPolicy,
    closed: AtomicBool,
}

impl BufferedConnection {
    pub fn new(
        inner: Arc<dyn Connection>,
        store: Arc<dyn EventStore>,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            inner,
            store,
            retention,
            closed: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    fn discard(&self, event: &Event) {
        if let Err(e) = self.store.discard(event) {
            warn!(event_id = %event.id, error = %e, "Failed to discard buffered event");
        }
    }
}

#[async_trait]
impl Connection for BufferedConnection {
    async fn send(&self, event: Arc<Event>) -> SendResult {
        match self.inner.send(event.clone()).await {
            Ok(()) => {
                self.discard(&event);
                Ok(())
            }
            Err(err) => {
                if self.retention.should_discard(&err) {
                    debug!(event_id = %event.id, error = %err, "Discarding undeliverable event");
                    self.discard(&event);
                }
                Err(err)
            }
        }
    }

    fn add_send_callback(&self, callback: Arc<dyn SendCallback>) {
        self.inner.add_send_callback(callback);
    }

    async fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.close().await
    }
}
