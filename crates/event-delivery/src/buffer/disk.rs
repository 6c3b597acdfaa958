//! Directory-backed event store.
//!
//! Each event lives in its own file named `{inserted_millis}-{event_id}.event`
//! holding a JSON envelope with the insertion time and the event. Files are
//! written to a temporary name and renamed into place, so a crash never
//! leaves a half-written `.event` file behind; temporaries left by a crash
//! are removed when the store is opened. The file name prefix gives
//! oldest-first order without opening anything.

use super::store::{BufferedEvent, BufferedEvents, EventStore};
use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use crate::event::Event;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default maximum number of stored events.
pub const DEFAULT_MAX_EVENTS: usize = 10;

const EVENT_EXTENSION: &str = "event";
const TMP_EXTENSION: &str = "tmp";

#[derive(Serialize, Deserialize)]
struct StoredEvent {
    inserted_at: DateTime<Utc>,
    event: Event,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    inserted_millis: i64,
    path: PathBuf,
}

#[derive(Debug)]
struct DiskInner {
    dir: PathBuf,
    index: Mutex<HashMap<Uuid, IndexEntry>>,
}

impl DiskInner {
    fn forget(&self, id: &Uuid) -> Option<IndexEntry> {
        self.index.lock().remove(id)
    }

    fn is_indexed(&self, id: &Uuid) -> bool {
        self.index.lock().contains_key(id)
    }

    /// Read one stored file, removing it if it cannot be decoded.
    fn load(&self, id: Uuid, path: &Path) -> Option<BufferedEvent> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read buffered event");
                return None;
            }
        };

        match serde_json::from_slice::<StoredEvent>(&bytes) {
            Ok(stored) if stored.event.id == id => Some(BufferedEvent {
                event: Arc::new(stored.event),
                inserted_at: stored.inserted_at,
            }),
            Ok(_) | Err(_) => {
                warn!(path = %path.display(), "Removing corrupt buffered event file");
                self.forget(&id);
                if let Err(e) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove corrupt event file");
                }
                None
            }
        }
    }
}

/// Store that keeps one file per event in a directory, surviving restarts.
#[derive(Debug)]
pub struct DiskEventStore {
    inner: Arc<DiskInner>,
    max_events: usize,
    clock: Arc<dyn Clock>,
}

impl DiskEventStore {
    /// Open (creating if needed) a store in `dir`.
    pub fn open(dir: impl AsRef<Path>, max_events: usize) -> StoreResult<Self> {
        Self::open_with_clock(dir, max_events, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        dir: impl AsRef<Path>,
        max_events: usize,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut index = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some(EVENT_EXTENSION) => {}
                Some(TMP_EXTENSION) => {
                    remove_partial_write(&path);
                    continue;
                }
                _ => continue,
            }
            match parse_file_name(&path) {
                Some((inserted_millis, id)) => {
                    index.insert(
                        id,
                        IndexEntry {
                            inserted_millis,
                            path,
                        },
                    );
                }
                None => debug!(path = %path.display(), "Ignoring unrecognized file in buffer directory"),
            }
        }

        info!(dir = %dir.display(), events = index.len(), "Opened event buffer");

        Ok(Self {
            inner: Arc::new(DiskInner {
                dir,
                index: Mutex::new(index),
            }),
            max_events,
            clock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    fn write(&self, path: &Path, stored: &StoredEvent) -> StoreResult<()> {
        let bytes = serde_json::to_vec(stored)?;
        let tmp = path.with_extension(TMP_EXTENSION);
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl EventStore for DiskEventStore {
    fn add(&self, event: &Arc<Event>) -> StoreResult<()> {
        let mut index = self.inner.index.lock();
        if index.contains_key(&event.id) {
            return Ok(());
        }
        if index.len() >= self.max_events {
            return Err(StoreError::Full {
                capacity: self.max_events,
            });
        }

        let inserted_at = self.clock.now_utc();
        let inserted_millis = inserted_at.timestamp_millis();
        let path = self.inner.dir.join(file_name(inserted_millis, &event.id));
        let stored = StoredEvent {
            inserted_at,
            event: (**event).clone(),
        };
        self.write(&path, &stored)?;

        index.insert(
            event.id,
            IndexEntry {
                inserted_millis,
                path,
            },
        );
        debug!(event_id = %event.id, "Event buffered to disk");
        Ok(())
    }

    fn discard(&self, event: &Event) -> StoreResult<()> {
        let Some(entry) = self.inner.forget(&event.id) else {
            return Ok(());
        };
        match fs::remove_file(&entry.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn oldest_first(&self) -> StoreResult<BufferedEvents> {
        let mut entries: Vec<(Uuid, IndexEntry)> = self
            .inner
            .index
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        entries.sort_by(|(a_id, a), (b_id, b)| {
            a.inserted_millis
                .cmp(&b.inserted_millis)
                .then_with(|| a_id.cmp(b_id))
        });

        let inner = self.inner.clone();
        Ok(Box::new(entries.into_iter().filter_map(move |(id, entry)| {
            if !inner.is_indexed(&id) {
                return None;
            }
            inner.load(id, &entry.path)
        })))
    }

    fn len(&self) -> usize {
        self.inner.index.lock().len()
    }
}

/// Remove a write that never got renamed into place.
fn remove_partial_write(path: &Path) {
    if parse_file_name(path).is_none() {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed partially written event file"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial event file"),
    }
}

fn file_name(inserted_millis: i64, id: &Uuid) -> String {
    format!("{inserted_millis}-{id}.{EVENT_EXTENSION}")
}

fn parse_file_name(path: &Path) -> Option<(i64, Uuid)> {
    let stem = path.file_stem()?.to_str()?;
    let (millis, id) = stem.split_once('-')?;
    Some((millis.parse().ok()?, Uuid::parse_str(id).ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::tests::harness::event;
    use std::time::Duration;
    use tempfile::TempDir;

    fn event_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref().unwrap().path().extension().and_then(|x| x.to_str())
                    == Some(EVENT_EXTENSION)
            })
            .count()
    }

    #[test]
    fn test_parse_file_name() {
        let id = Uuid::new_v4();
        let path = PathBuf::from(file_name(1_700_000_000_123, &id));
        assert_eq!(parse_file_name(&path), Some((1_700_000_000_123, id)));
        assert_eq!(parse_file_name(Path::new("notes.event")), None);
    }

    #[test]
    fn test_add_and_discard_files() {
        let dir = TempDir::new().unwrap();
        let store = DiskEventStore::open(dir.path(), DEFAULT_MAX_EVENTS).unwrap();
        let e = event(1);

        store.add(&e).unwrap();
        store.add(&e).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(event_files(dir.path()), 1);

        store.discard(&e).unwrap();
        store.discard(&e).unwrap();
        assert!(store.is_empty());
        assert_eq!(event_files(dir.path()), 0);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let clock = TestClock::new();
        let events: Vec<_> = (0..3).map(event).collect();
        {
            let store =
                DiskEventStore::open_with_clock(dir.path(), 10, Arc::new(clock.clone())).unwrap();
            for e in &events {
                store.add(e).unwrap();
                clock.advance(Duration::from_millis(10));
            }
        }

        let reopened = DiskEventStore::open(dir.path(), 10).unwrap();
        assert_eq!(reopened.len(), 3);

        let restored: Vec<_> = reopened.oldest_first().unwrap().collect();
        let ids: Vec<_> = restored.iter().map(|b| b.event.id).collect();
        assert_eq!(ids, events.iter().map(|e| e.id).collect::<Vec<_>>());
        assert_eq!(*restored[0].event, *events[0]);
    }

    #[test]
    fn test_max_events_enforced() {
        let dir = TempDir::new().unwrap();
        let store = DiskEventStore::open(dir.path(), 2).unwrap();

        store.add(&event(1)).unwrap();
        store.add(&event(2)).unwrap();
        let err = store.add(&event(3)).unwrap_err();

        assert!(matches!(err, StoreError::Full { capacity: 2 }));
        assert_eq!(event_files(dir.path()), 2);
    }

    #[test]
    fn test_corrupt_files_removed_during_iteration() {
        let dir = TempDir::new().unwrap();
        let good = event(1);
        let bad_id = Uuid::new_v4();
        let bad_path = dir.path().join(file_name(1, &bad_id));
        fs::write(&bad_path, b"{not json").unwrap();

        let store = DiskEventStore::open(dir.path(), 10).unwrap();
        store.add(&good).unwrap();
        assert_eq!(store.len(), 2);

        let ids: Vec<_> = store.oldest_first().unwrap().map(|b| b.event.id).collect();

        assert_eq!(ids, vec![good.id]);
        assert!(!bad_path.exists());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_iteration_skips_concurrently_discarded() {
        let dir = TempDir::new().unwrap();
        let store = DiskEventStore::open(dir.path(), 10).unwrap();
        let a = event(1);
        let b = event(2);
        store.add(&a).unwrap();
        store.add(&b).unwrap();

        let iter = store.oldest_first().unwrap();
        store.discard(&a).unwrap();

        let ids: Vec<_> = iter.map(|buffered| buffered.event.id).collect();
        assert_eq!(ids, vec![b.id]);
    }

    #[test]
    fn test_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README"), b"hello").unwrap();
        fs::write(dir.path().join("garbage.event"), b"{}").unwrap();

        let store = DiskEventStore::open(dir.path(), 10).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_partial_writes_removed_on_open() {
        let dir = TempDir::new().unwrap();
        let partial = dir
            .path()
            .join(file_name(5, &Uuid::new_v4()))
            .with_extension(TMP_EXTENSION);
        fs::write(&partial, b"{\"inserted_at\":").unwrap();
        let foreign = dir.path().join("editor.tmp");
        fs::write(&foreign, b"keep me").unwrap();

        let store = DiskEventStore::open(dir.path(), 10).unwrap();

        assert!(store.is_empty());
        assert!(!partial.exists());
        assert!(foreign.exists());
    }
}
