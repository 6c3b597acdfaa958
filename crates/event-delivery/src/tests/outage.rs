//! Collector outages against a mock HTTP collector.
//!
//! The pipeline runs synchronously (no worker pool) with a memory-backed
//! buffer and a [`TestClock`], so every flush run is driven by hand.

use super::harness::{event, MockCollector, RecordingCallback};
use crate::buffer::{FlushStop, RetentionPolicy};
use crate::clock::TestClock;
use crate::config::PipelineConfig;
use crate::connection::Connection;
use crate::event::Event;
use crate::pipeline::Pipeline;
use crate::transport;
use std::sync::Arc;
use std::time::Duration;

fn http_config(url: &str) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.transport.collector_url = url.to_string();
    config.dispatch.enabled = false;
    config.buffer.min_age = Some(Duration::ZERO);
    config
}

fn pipeline(config: PipelineConfig, clock: &TestClock) -> Pipeline {
    let transport = transport::from_config(&config.transport).unwrap();
    Pipeline::builder(transport)
        .config(config)
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap()
}

fn body_id(body: &[u8]) -> uuid::Uuid {
    serde_json::from_slice::<Event>(body).unwrap().id
}

#[tokio::test]
async fn server_error_is_kept_and_flushed_after_recovery() {
    let collector = MockCollector::start().await;
    collector.respond(503, &[]).await;
    let clock = TestClock::new();
    let pipeline = pipeline(http_config(&collector.url()), &clock);
    let e = event(1);

    let err = pipeline.send(e.clone()).await.unwrap_err();
    assert_eq!(err.response_code(), Some(503));
    assert_eq!(pipeline.store().unwrap().len(), 1);

    clock.advance(Duration::from_secs(1));
    let report = pipeline.flusher().unwrap().run_once().await;

    assert_eq!(report.delivered, 1);
    assert_eq!(report.stop, FlushStop::Exhausted);
    assert!(pipeline.store().unwrap().is_empty());

    let requests = collector.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(body_id(&requests[0].body), e.id);
    assert_eq!(body_id(&requests[1].body), e.id);
}

#[tokio::test]
async fn client_error_is_discarded() {
    let collector = MockCollector::start().await;
    collector.respond(400, &[]).await;
    let clock = TestClock::new();
    let pipeline = pipeline(http_config(&collector.url()), &clock);

    let err = pipeline.send(event(1)).await.unwrap_err();

    assert_eq!(err.response_code(), Some(400));
    assert!(pipeline.store().unwrap().is_empty());
}

#[tokio::test]
async fn any_response_policy_discards_server_errors() {
    let collector = MockCollector::start().await;
    collector.respond(500, &[]).await;
    let clock = TestClock::new();
    let mut config = http_config(&collector.url());
    config.buffer.retention = RetentionPolicy::DiscardOnAnyResponse;
    let pipeline = pipeline(config, &clock);

    assert!(pipeline.send(event(1)).await.is_err());
    assert!(pipeline.store().unwrap().is_empty());
}

#[tokio::test]
async fn rate_limit_holds_flush_until_retry_after() {
    let collector = MockCollector::start().await;
    collector.respond(429, &[("Retry-After", "5")]).await;
    let clock = TestClock::new();
    let pipeline = pipeline(http_config(&collector.url()), &clock);

    let err = pipeline.send(event(1)).await.unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(
        pipeline.lockdown_manager().current_duration(),
        Duration::from_secs(5)
    );

    clock.advance(Duration::from_secs(1));
    let report = pipeline.flusher().unwrap().run_once().await;
    assert_eq!(report.stop, FlushStop::Failed);
    assert_eq!(collector.requests().await.len(), 1);
    assert_eq!(pipeline.store().unwrap().len(), 1);

    clock.advance(Duration::from_secs(4));
    let report = pipeline.flusher().unwrap().run_once().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(collector.requests().await.len(), 2);
}

#[tokio::test]
async fn unreachable_collector_keeps_events() {
    let clock = TestClock::new();
    let pipeline = pipeline(http_config(&MockCollector::unused_url().await), &clock);

    let err = pipeline.send(event(1)).await.unwrap_err();

    assert_eq!(err.response_code(), None);
    assert!(err.is_retryable());
    assert_eq!(pipeline.store().unwrap().len(), 1);
    assert!(pipeline.lockdown_manager().is_locked_down());
}

#[tokio::test]
async fn filtered_event_counts_as_delivered() {
    let collector = MockCollector::start().await;
    collector.respond(403, &[]).await;
    let clock = TestClock::new();
    let pipeline = pipeline(http_config(&collector.url()), &clock);
    let callback = Arc::new(RecordingCallback::default());
    pipeline.add_send_callback(callback.clone());

    pipeline.send(event(1)).await.unwrap();

    assert_eq!(callback.successes(), 1);
    assert!(pipeline.store().unwrap().is_empty());
    assert!(!pipeline.lockdown_manager().is_locked_down());
}

#[tokio::test]
async fn sampled_out_events_never_reach_collector() {
    let collector = MockCollector::start().await;
    let clock = TestClock::new();
    let mut config = http_config(&collector.url());
    config.transport.sample_rate = Some(0.0);
    let pipeline = pipeline(config, &clock);
    let callback = Arc::new(RecordingCallback::default());
    pipeline.add_send_callback(callback.clone());

    for n in 0..5 {
        pipeline.send(event(n)).await.unwrap();
    }

    assert!(collector.requests().await.is_empty());
    assert_eq!(callback.successes(), 0);
    assert!(pipeline.store().unwrap().is_empty());
}
