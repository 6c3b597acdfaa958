//! Durable buffering: persist events before delivery and retry them later.
//!
//! Two connections share one [`EventStore`]:
//!
//! - [`DurableBufferConnection`] is the write path. It persists every event
//!   and then hands it to the live chain.
//! - [`BufferedConnection`] is the retry path. It attempts delivery and
//!   decides, per [`RetentionPolicy`], whether the stored copy is discarded.
//!
//! The [`Flusher`] periodically walks the store oldest-first and pushes due
//! events through the retry path.

mod disk;
mod durable;
mod memory;
mod retry;
mod store;

pub use disk::{DiskEventStore, DEFAULT_MAX_EVENTS};
pub use durable::{DurableBufferConnection, FlushReport, FlushStop, Flusher};
pub use memory::MemoryEventStore;
pub use retry::{BufferedConnection, RetentionPolicy};
pub use store::{BufferedEvent, BufferedEvents, EventStore};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default delay between flush runs.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(60_000);

/// Default grace period for stopping the flusher.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Durable buffer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Whether the pipeline includes the buffer at all.
    pub enabled: bool,
    /// Directory for a [`DiskEventStore`]; events are kept in memory if unset.
    pub dir: Option<PathBuf>,
    pub max_events: usize,
    #[serde(rename = "flush_interval_ms", with = "crate::config::millis")]
    pub flush_interval: Duration,
    /// Events younger than this are left for a later run. Defaults to the
    /// flush interval.
    #[serde(rename = "min_age_ms", with = "crate::config::optional_millis")]
    pub min_age: Option<Duration>,
    pub retention: RetentionPolicy,
    /// Whether closing is hooked into process shutdown.
    pub graceful_shutdown: bool,
    /// Grace period for stopping the flusher; `None` waits indefinitely.
    #[serde(rename = "shutdown_timeout_ms", with = "crate::config::optional_millis")]
    pub shutdown_timeout: Option<Duration>,
}

impl BufferConfig {
    pub fn effective_min_age(&self) -> Duration {
        self.min_age.unwrap_or(self.flush_interval)
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_events: DEFAULT_MAX_EVENTS,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            min_age: None,
            retention: RetentionPolicy::default(),
            graceful_shutdown: true,
            shutdown_timeout: Some(DEFAULT_SHUTDOWN_TIMEOUT),
        }
    }
}
