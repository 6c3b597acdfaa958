//! Asynchronous dispatch: moves sends off the caller onto a worker pool.
//!
//! Producers enqueue and return immediately. A fixed number of tokio tasks
//! drain the queue and call the wrapped connection. Failures end at the
//! worker: rate limiting and open circuits are expected noise and logged at
//! debug level, everything else is logged as an error. Nothing is reported
//! back to the producer.
//!
//! # Shutdown
//!
//! [`Connection::close`] stops intake, lets the workers drain the queue and
//! waits up to the configured grace period. Work still pending after the
//! deadline is aborted and dropped. The wrapped connection is closed
//! afterwards in every case.

use crate::callback::SendCallback;
use crate::connection::{Connection, SendResult};
use crate::event::Event;
use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn, Instrument, Span};

/// Default number of dispatch workers.
pub const DEFAULT_WORKERS: usize = 1;

/// Default maximum number of queued events.
pub const DEFAULT_QUEUE_SIZE: usize = 50;

/// Default grace period for [`Connection::close`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(1_000);

/// How often an unbounded shutdown reports that it is still waiting.
const SHUTDOWN_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// What to do when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the oldest queued event to make room.
    #[default]
    DiscardOldest,
    /// Drop the incoming event.
    DiscardNewest,
    /// Make the producer wait for room.
    Block,
}

/// Scheduling hint for dispatch workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPriority {
    Normal,
    /// Workers yield to the scheduler before every dispatch.
    #[default]
    Background,
}

/// Async dispatch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Whether the pipeline includes this layer at all.
    pub enabled: bool,
    pub workers: usize,
    pub priority: DispatchPriority,
    /// Maximum queued events; `None` is unbounded.
    pub queue_size: Option<usize>,
    pub overflow: OverflowPolicy,
    /// Whether closing is hooked into process shutdown.
    pub graceful_shutdown: bool,
    /// Grace period for close; `None` waits indefinitely.
    #[serde(rename = "shutdown_timeout_ms", with = "crate::config::optional_millis")]
    pub shutdown_timeout: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: DEFAULT_WORKERS,
            priority: DispatchPriority::default(),
            queue_size: Some(DEFAULT_QUEUE_SIZE),
            overflow: OverflowPolicy::default(),
            graceful_shutdown: true,
            shutdown_timeout: Some(DEFAULT_SHUTDOWN_TIMEOUT),
        }
    }
}

struct QueuedEvent {
    event: Arc<Event>,
    span: Span,
}

enum Enqueue {
    Accepted,
    DisplacedOldest(QueuedEvent),
    Rejected(QueuedEvent),
    Closed,
}

/// Bounded FIFO shared by producers and workers.
struct DispatchQueue {
    items: Mutex<VecDeque<QueuedEvent>>,
    capacity: Option<usize>,
    closed: AtomicBool,
    item_ready: Notify,
    space_ready: Notify,
}

impl DispatchQueue {
    fn new(capacity: Option<usize>) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
            closed: AtomicBool::new(false),
            item_ready: Notify::new(),
            space_ready: Notify::new(),
        }
    }

    async fn push(&self, queued: QueuedEvent, overflow: OverflowPolicy) -> Enqueue {
        loop {
            let space = self.space_ready.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut items = self.items.lock();
                if self.closed.load(Ordering::Acquire) {
                    return Enqueue::Closed;
                }

                let full = self.capacity.is_some_and(|cap| items.len() >= cap);
                if !full {
                    items.push_back(queued);
                    drop(items);
                    self.item_ready.notify_one();
                    return Enqueue::Accepted;
                }

                match overflow {
                    OverflowPolicy::DiscardOldest => {
                        let displaced = items.pop_front();
                        items.push_back(queued);
                        drop(items);
                        self.item_ready.notify_one();
                        return match displaced {
                            Some(old) => Enqueue::DisplacedOldest(old),
                            None => Enqueue::Accepted,
                        };
                    }
                    OverflowPolicy::DiscardNewest => return Enqueue::Rejected(queued),
                    OverflowPolicy::Block => {}
                }
            }

            space.await;
        }
    }

    /// Next event, or `None` once the queue is closed and drained.
    async fn pop(&self) -> Option<QueuedEvent> {
        loop {
            let ready = self.item_ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            {
                let mut items = self.items.lock();
                if let Some(queued) = items.pop_front() {
                    drop(items);
                    self.space_ready.notify_one();
                    return Some(queued);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }

            ready.await;
        }
    }

    fn close(&self) {
        {
            let _items = self.items.lock();
            self.closed.store(true, Ordering::Release);
        }
        self.item_ready.notify_waiters();
        self.space_ready.notify_waiters();
    }

    fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let dropped = items.len();
        items.clear();
        dropped
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

/// Connection that hands every event to a pool of background workers.
///
/// Construct inside a Tokio runtime; workers are spawned immediately.
pub struct AsyncDispatchConnection {
    inner: Arc<dyn Connection>,
    queue: Arc<DispatchQueue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: DispatchConfig,
    closed: AtomicBool,
}

impl AsyncDispatchConnection {
    pub fn new(inner: Arc<dyn Connection>, config: DispatchConfig) -> Self {
        let queue = Arc::new(DispatchQueue::new(config.queue_size));
        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    queue.clone(),
                    inner.clone(),
                    config.priority,
                ))
            })
            .collect();

        debug!(
            workers = config.workers.max(1),
            queue_size = ?config.queue_size,
            overflow = ?config.overflow,
            "Async dispatch started"
        );

        Self {
            inner,
            queue,
            workers: Mutex::new(workers),
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Events waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait for the workers to exit, bounded by the grace period.
    ///
    /// Returns `false` if the deadline passed and workers were aborted.
    async fn await_workers(&self, workers: Vec<JoinHandle<()>>) -> bool {
        match self.config.shutdown_timeout {
            Some(grace) => {
                let aborts: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();
                match tokio::time::timeout(grace, join_all(workers)).await {
                    Ok(_) => true,
                    Err(_) => {
                        for handle in aborts {
                            handle.abort();
                        }
                        false
                    }
                }
            }
            None => {
                let mut all = Box::pin(join_all(workers));
                loop {
                    tokio::select! {
                        _ = &mut all => break true,
                        _ = tokio::time::sleep(SHUTDOWN_PROGRESS_INTERVAL) => {
                            info!(queued = self.queue.len(), "Still waiting on async dispatch to terminate");
                        }
                    }
                }
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<DispatchQueue>,
    inner: Arc<dyn Connection>,
    priority: DispatchPriority,
) {
    while let Some(QueuedEvent { event, span }) = queue.pop().await {
        if priority == DispatchPriority::Background {
            tokio::task::yield_now().await;
        }

        let event_id = event.id;
        let attempt = AssertUnwindSafe(inner.send(event).instrument(span))
            .catch_unwind()
            .await;

        match attempt {
            Ok(Ok(())) => trace!(worker_id, event_id = %event_id, "Event dispatched"),
            Ok(Err(err)) if err.is_circuit_open() || err.is_rate_limited() => {
                debug!(worker_id, event_id = %event_id, error = %err, "Dropping event, collector unavailable");
            }
            Ok(Err(err)) => {
                error!(worker_id, event_id = %event_id, error = %err, "Failed to dispatch event");
            }
            Err(_) => {
                error!(worker_id, event_id = %event_id, "Connection panicked while dispatching event");
            }
        }
    }

    debug!(worker_id, "Dispatch worker exiting");
}

#[async_trait]
impl Connection for AsyncDispatchConnection {
    async fn send(&self, event: Arc<Event>) -> SendResult {
        if self.is_closed() {
            trace!(event_id = %event.id, "Async dispatch closed, dropping event");
            return Ok(());
        }

        let queued = QueuedEvent {
            event,
            span: Span::current(),
        };
        match self.queue.push(queued, self.config.overflow).await {
            Enqueue::Accepted => {}
            Enqueue::DisplacedOldest(old) => {
                warn!(event_id = %old.event.id, "Dispatch queue full, dropped oldest event");
            }
            Enqueue::Rejected(new) => {
                warn!(event_id = %new.event.id, "Dispatch queue full, dropped new event");
            }
            Enqueue::Closed => {
                trace!("Async dispatch closed while enqueueing, dropping event");
            }
        }
        Ok(())
    }

    fn add_send_callback(&self, callback: Arc<dyn SendCallback>) {
        self.inner.add_send_callback(callback);
    }

    async fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!("Gracefully shutting down async dispatch");
        self.queue.close();
        let workers = std::mem::take(&mut *self.workers.lock());

        if self.await_workers(workers).await {
            debug!("Async dispatch shut down");
        } else {
            let dropped = self.queue.clear();
            warn!(
                dropped,
                grace_ms = self.config.shutdown_timeout.map(|d| d.as_millis() as u64),
                "Graceful shutdown timed out, pending events dropped"
            );
        }

        self.inner.close().await
    }
}

impl Drop for AsyncDispatchConnection {
    /// Dropping without `close` abandons queued events; workers are aborted.
    fn drop(&mut self) {
        self.queue.close();
        for worker in self.workers.get_mut().drain(..) {
            worker.abort();
        }
    }
}
