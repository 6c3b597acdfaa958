//! Events buffered on disk survive a restart.
//!
//! A "restart" is a second pipeline opened on the same buffer directory after
//! the first one is dropped without delivering.

use super::harness::{event, RecordingStore, ScriptedTransport};
use crate::buffer::{DiskEventStore, EventStore, FlushStop};
use crate::clock::TestClock;
use crate::config::PipelineConfig;
use crate::connection::Connection;
use crate::error::ConnectionError;
use crate::pipeline::Pipeline;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn disk_config(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.dispatch.enabled = false;
    config.buffer.dir = Some(dir.to_path_buf());
    config.buffer.min_age = Some(Duration::ZERO);
    config
}

fn open(transport: Arc<ScriptedTransport>, dir: &Path, clock: &TestClock) -> Pipeline {
    Pipeline::builder(transport)
        .config(disk_config(dir))
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn undelivered_events_are_flushed_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = TestClock::new();

    let down = Arc::new(ScriptedTransport::new());
    down.push(Err(ConnectionError::unreachable("refused")));
    let first = open(down.clone(), dir.path(), &clock);
    let lost = [event(1), event(2), event(3)];
    for e in &lost {
        clock.advance(Duration::from_millis(1));
        assert!(first.send(e.clone()).await.is_err());
    }
    // Only the first send reached the transport; the rest hit the lockdown.
    assert_eq!(down.calls(), 1);
    drop(first);

    let up = Arc::new(ScriptedTransport::new());
    let second = open(up.clone(), dir.path(), &clock);
    assert_eq!(second.store().unwrap().len(), 3);

    let report = second.flusher().unwrap().run_once().await;

    assert_eq!(report.delivered, 3);
    assert_eq!(report.stop, FlushStop::Exhausted);
    assert_eq!(
        up.sent_ids(),
        lost.iter().map(|e| e.id).collect::<Vec<_>>()
    );
    assert!(second.store().unwrap().is_empty());
}

#[tokio::test]
async fn first_attempt_delivery_persists_then_discards_once() {
    let clock = TestClock::new();
    let store = Arc::new(RecordingStore::with_clock(Arc::new(clock.clone())));
    let transport = Arc::new(ScriptedTransport::new());
    let pipeline = Pipeline::builder(transport.clone())
        .config(PipelineConfig::default())
        .store(store.clone())
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    let e = event(1);

    pipeline.send(e.clone()).await.unwrap();
    pipeline.close().await.unwrap();

    assert_eq!(transport.sent_ids(), vec![e.id]);
    assert_eq!(store.adds(), 1);
    assert_eq!(store.discards(), 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn delivered_events_leave_nothing_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let clock = TestClock::new();
    let transport = Arc::new(ScriptedTransport::new());
    let pipeline = open(transport, dir.path(), &clock);

    for n in 0..5 {
        clock.advance(Duration::from_millis(1));
        pipeline.send(event(n)).await.unwrap();
    }
    pipeline.close().await.unwrap();

    let reopened = DiskEventStore::open(dir.path(), 10).unwrap();
    assert!(reopened.is_empty());
}

#[tokio::test]
async fn full_buffer_still_sends_live() {
    let dir = tempfile::tempdir().unwrap();
    let clock = TestClock::new();
    let mut config = disk_config(dir.path());
    config.buffer.max_events = 1;

    let transport = Arc::new(ScriptedTransport::new());
    transport.push(Err(ConnectionError::unreachable("refused")));
    let pipeline = Pipeline::builder(transport.clone())
        .config(config)
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

    assert!(pipeline.send(event(1)).await.is_err());
    clock.advance(Duration::from_secs(1));
    pipeline.send(event(2)).await.unwrap();

    assert_eq!(transport.calls(), 2);
    assert_eq!(pipeline.store().unwrap().len(), 1);
}
