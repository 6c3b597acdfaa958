//! Storage contract for events awaiting delivery.

use crate::error::StoreResult;
use crate::event::Event;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// An event held by a store, with the time it was first persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedEvent {
    pub event: Arc<Event>,
    pub inserted_at: DateTime<Utc>,
}

/// Owning iterator over a store's contents.
pub type BufferedEvents = Box<dyn Iterator<Item = BufferedEvent> + Send>;

/// Persistent set of events that have not been confirmed delivered.
///
/// Implementations synchronize internally; every method may be called
/// concurrently with every other.
pub trait EventStore: Send + Sync + std::fmt::Debug {
    /// Persist an event. Adding an event that is already stored keeps the
    /// original insertion time.
    fn add(&self, event: &Arc<Event>) -> StoreResult<()>;

    /// Remove an event. Removing an unknown event is not an error.
    fn discard(&self, event: &Event) -> StoreResult<()>;

    /// Stored events, oldest insertion first.
    ///
    /// The iterator stays valid while events are added or discarded; events
    /// discarded after the call may still be yielded or skipped.
    fn oldest_first(&self) -> StoreResult<BufferedEvents>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
