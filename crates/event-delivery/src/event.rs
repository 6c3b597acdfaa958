//! The event record carried through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A captured occurrence awaiting delivery.
///
/// The payload is opaque to the pipeline; only the marshaller looks inside.
/// Events are never mutated once handed to a connection and travel between
/// layers as `Arc<Event>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID.
    pub id: Uuid,
    /// When the event was captured.
    pub timestamp: DateTime<Utc>,
    /// Producer-supplied body.
    pub payload: serde_json::Value,
}

impl Event {
    /// Create an event captured now.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Override the capture time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
