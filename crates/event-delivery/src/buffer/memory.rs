//! In-process event store.

use super::store::{BufferedEvent, BufferedEvents, EventStore};
use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use crate::event::Event;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Bounded store kept in memory. Contents do not survive a restart.
#[derive(Debug)]
pub struct MemoryEventStore {
    events: Arc<Mutex<Vec<BufferedEvent>>>,
    capacity: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl MemoryEventStore {
    /// Store holding at most `capacity` events (`None` for no limit).
    pub fn new(capacity: Option<usize>) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: Option<usize>, clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity,
            clock,
        }
    }
}

impl EventStore for MemoryEventStore {
    fn add(&self, event: &Arc<Event>) -> StoreResult<()> {
        let mut events = self.events.lock();
        if events.iter().any(|stored| stored.event.id == event.id) {
            return Ok(());
        }
        if let Some(capacity) = self.capacity {
            if events.len() >= capacity {
                return Err(StoreError::Full { capacity });
            }
        }
        events.push(BufferedEvent {
            event: event.clone(),
            inserted_at: self.clock.now_utc(),
        });
        Ok(())
    }

    fn discard(&self, event: &Event) -> StoreResult<()> {
        self.events.lock().retain(|stored| stored.event.id != event.id);
        Ok(())
    }

    /// Events discarded while iterating are skipped.
    fn oldest_first(&self) -> StoreResult<BufferedEvents> {
        let ids: Vec<Uuid> = self.events.lock().iter().map(|b| b.event.id).collect();
        let events = self.events.clone();
        Ok(Box::new(ids.into_iter().filter_map(move |id| {
            events.lock().iter().find(|b| b.event.id == id).cloned()
        })))
    }

    fn len(&self) -> usize {
        self.events.lock().len()
    }
}
