//! Lockdown growth and recovery through a synchronous pipeline.
//!
//! Each test drives a breaker-only pipeline with a [`TestClock`] so lockdown
//! windows can be crossed without sleeping.

use super::harness::{event, ScriptedTransport};
use crate::clock::TestClock;
use crate::config::PipelineConfig;
use crate::connection::Connection;
use crate::error::ConnectionError;
use crate::pipeline::Pipeline;
use std::sync::Arc;
use std::time::Duration;

fn breaker_only(transport: Arc<ScriptedTransport>, clock: &TestClock) -> Pipeline {
    let mut config = PipelineConfig::default();
    config.dispatch.enabled = false;
    config.buffer.enabled = false;

    Pipeline::builder(transport)
        .config(config)
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap()
}

/// Consecutive failures double the lockdown from the base.
#[tokio::test]
async fn failures_double_lockdown() {
    let clock = TestClock::new();
    let transport = Arc::new(ScriptedTransport::new());
    transport.fail_times(3, ConnectionError::unreachable("refused"));
    let pipeline = breaker_only(transport.clone(), &clock);
    let lockdown = pipeline.lockdown_manager().clone();

    let mut observed = Vec::new();
    for n in 0..3 {
        let _ = pipeline.send(event(n)).await;
        observed.push(lockdown.current_duration());
        clock.advance(lockdown.current_duration());
    }

    assert_eq!(
        observed,
        vec![
            Duration::from_millis(1000),
            Duration::from_millis(2000),
            Duration::from_millis(4000),
        ]
    );
}

/// The twentieth consecutive failure is capped at the maximum.
#[tokio::test]
async fn twentieth_failure_capped() {
    let clock = TestClock::new();
    let transport = Arc::new(ScriptedTransport::new());
    transport.fail_times(20, ConnectionError::unreachable("refused"));
    let pipeline = breaker_only(transport.clone(), &clock);
    let lockdown = pipeline.lockdown_manager().clone();

    for n in 0..20 {
        let _ = pipeline.send(event(n)).await;
        if n < 19 {
            clock.advance(lockdown.current_duration());
        }
    }

    assert_eq!(transport.calls(), 20);
    assert_eq!(lockdown.current_duration(), Duration::from_millis(300_000));
}

/// Sends inside a lockdown window never reach the transport.
#[tokio::test]
async fn locked_down_sends_skip_transport() {
    let clock = TestClock::new();
    let transport = Arc::new(ScriptedTransport::new());
    transport.push(Err(ConnectionError::unreachable("refused")));
    let pipeline = breaker_only(transport.clone(), &clock);

    let _ = pipeline.send(event(0)).await;
    for n in 1..50 {
        clock.advance(Duration::from_millis(10));
        let err = pipeline.send(event(n)).await.unwrap_err();
        assert!(err.is_circuit_open());
    }

    assert_eq!(transport.calls(), 1);
}

/// A collector-provided backoff replaces the doubling sequence.
#[tokio::test]
async fn retry_after_overrides_doubling() {
    let clock = TestClock::new();
    let transport = Arc::new(ScriptedTransport::new());
    transport.push(Err(ConnectionError::unreachable("refused")));
    transport.push(Err(ConnectionError::RateLimited {
        retry_after: Some(Duration::from_secs(30)),
        response_code: 429,
    }));
    let pipeline = breaker_only(transport.clone(), &clock);
    let lockdown = pipeline.lockdown_manager().clone();

    let _ = pipeline.send(event(0)).await;
    clock.advance(Duration::from_secs(1));
    let err = pipeline.send(event(1)).await.unwrap_err();

    assert!(err.is_rate_limited());
    assert_eq!(lockdown.current_duration(), Duration::from_secs(30));
}

/// Recovery resets the sequence so the next outage starts at the base.
#[tokio::test]
async fn recovery_resets_sequence() {
    let clock = TestClock::new();
    let transport = Arc::new(ScriptedTransport::new());
    transport.fail_times(3, ConnectionError::unreachable("refused"));
    let pipeline = breaker_only(transport.clone(), &clock);
    let lockdown = pipeline.lockdown_manager().clone();

    for n in 0..3 {
        let _ = pipeline.send(event(n)).await;
        clock.advance(lockdown.current_duration());
    }
    pipeline.send(event(3)).await.unwrap();
    assert!(!lockdown.is_locked_down());

    transport.push(Err(ConnectionError::unreachable("refused again")));
    let _ = pipeline.send(event(4)).await;
    assert_eq!(lockdown.current_duration(), Duration::from_millis(1000));
}
