//! Bounded shutdown and hook ordering.

use super::harness::{event, ScriptedTransport};
use crate::config::PipelineConfig;
use crate::connection::Connection;
use crate::pipeline::Pipeline;
use delivery_lifecycle::ShutdownManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn slow_transport() -> Arc<ScriptedTransport> {
    Arc::new(ScriptedTransport::new().with_delay(Duration::from_secs(60)))
}

fn config(buffer: bool, timeout: Option<Duration>) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.buffer.enabled = buffer;
    config.dispatch.shutdown_timeout = timeout;
    config.buffer.shutdown_timeout = timeout;
    config
}

async fn wait_for_calls(transport: &ScriptedTransport, n: usize) {
    for _ in 0..1000 {
        if transport.calls() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("only {} of {} sends reached the transport", transport.calls(), n);
}

#[tokio::test(start_paused = true)]
async fn slow_collector_cannot_hold_shutdown() {
    let transport = slow_transport();
    let pipeline = Pipeline::builder(transport.clone())
        .config(config(false, Some(Duration::from_millis(100))))
        .build()
        .unwrap();

    let first = event(0);
    pipeline.send(first.clone()).await.unwrap();
    for n in 1..3 {
        pipeline.send(event(n)).await.unwrap();
    }
    wait_for_calls(&transport, 1).await;

    let started = Instant::now();
    pipeline.close().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(transport.sent_ids(), vec![first.id]);
    assert_eq!(transport.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn bounded_shutdown_leaves_events_in_buffer() {
    let transport = slow_transport();
    let pipeline = Pipeline::builder(transport.clone())
        .config(config(true, Some(Duration::from_millis(100))))
        .build()
        .unwrap();

    for n in 0..3 {
        pipeline.send(event(n)).await.unwrap();
    }
    wait_for_calls(&transport, 1).await;
    pipeline.close().await.unwrap();

    assert_eq!(pipeline.store().unwrap().len(), 3);
    assert_eq!(transport.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unbounded_shutdown_drains_queue() {
    let transport = Arc::new(ScriptedTransport::new().with_delay(Duration::from_secs(2)));
    let pipeline = Pipeline::builder(transport.clone())
        .config(config(true, None))
        .build()
        .unwrap();

    for n in 0..3 {
        pipeline.send(event(n)).await.unwrap();
    }
    pipeline.close().await.unwrap();

    assert_eq!(transport.calls(), 3);
    assert!(pipeline.store().unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_manager_closes_every_pipeline_once() {
    let manager = Arc::new(ShutdownManager::new());
    let first = Arc::new(ScriptedTransport::new());
    let second = Arc::new(ScriptedTransport::new());
    let _a = Pipeline::builder(first.clone())
        .config(config(true, None))
        .shutdown_manager(manager.clone())
        .build()
        .unwrap();
    let _b = Pipeline::builder(second.clone())
        .config(config(false, None))
        .shutdown_manager(manager.clone())
        .build()
        .unwrap();

    assert_eq!(manager.run().await, 2);
    assert_eq!(manager.run().await, 0);

    assert_eq!(first.close_count(), 1);
    assert_eq!(second.close_count(), 1);
}

#[tokio::test]
async fn pipeline_after_shutdown_is_rejected() {
    let manager = Arc::new(ShutdownManager::new());
    manager.run().await;

    let result = Pipeline::builder(Arc::new(ScriptedTransport::new()))
        .config(config(false, None))
        .shutdown_manager(manager)
        .build();

    assert!(matches!(
        result,
        Err(crate::error::PipelineError::Lifecycle(_))
    ));
}
