//! Write path and periodic flusher.

use super::retry::BufferedConnection;
use super::store::EventStore;
use super::BufferConfig;
use crate::callback::SendCallback;
use crate::clock::Clock;
use crate::connection::{Connection, SendResult};
use crate::event::Event;
use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Why a flush run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushStop {
    /// Every stored event was attempted.
    #[default]
    Exhausted,
    /// The connection started closing.
    Closing,
    /// The next event was younger than the minimum age.
    TooYoung,
    /// A delivery attempt failed.
    Failed,
    /// The store could not be read.
    StoreUnavailable,
}

/// Summary of one flush run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    pub attempted: usize,
    pub delivered: usize,
    pub stop: FlushStop,
}

/// Walks the store and retries due events.
///
/// A run stops at the first failure: when the collector is down, every
/// further attempt would only fail the same way.
pub struct Flusher {
    retry: Arc<BufferedConnection>,
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    min_age: Duration,
    closing: Arc<AtomicBool>,
}

impl Flusher {
    pub async fn run_once(&self) -> FlushReport {
        let mut report = FlushReport::default();

        let events = match self.store.oldest_first() {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Failed to read event buffer");
                report.stop = FlushStop::StoreUnavailable;
                return report;
            }
        };

        let now = self.clock.now_utc();
        for buffered in events {
            if self.closing.load(Ordering::SeqCst) {
                report.stop = FlushStop::Closing;
                break;
            }

            let age = (now - buffered.inserted_at).to_std().unwrap_or_default();
            if age < self.min_age {
                report.stop = FlushStop::TooYoung;
                break;
            }

            report.attempted += 1;
            match self.retry.send(buffered.event.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(event_id = %buffered.event.id, error = %e, "Flush attempt failed");
                    report.stop = FlushStop::Failed;
                    break;
                }
            }
        }

        report
    }

    async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        debug!(interval_ms = interval.as_millis() as u64, "Flusher started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let report = match AssertUnwindSafe(self.run_once()).catch_unwind().await {
                Ok(report) => report,
                Err(_) => {
                    error!("Flush run panicked, retrying on the next interval");
                    continue;
                }
            };
            if report.attempted > 0 {
                info!(
                    attempted = report.attempted,
                    delivered = report.delivered,
                    stop = ?report.stop,
                    "Flushed buffered events"
                );
            }
        }
        debug!("Flusher stopped");
    }
}

/// Persists every event, then hands it to the live chain.
///
/// Owns the flusher task; closing stops the flusher before closing the
/// live chain.
pub struct DurableBufferConnection {
    live: Arc<dyn Connection>,
    store: Arc<dyn EventStore>,
    flusher: Arc<Flusher>,
    flusher_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl DurableBufferConnection {
    /// Start the write path and its flusher.
    ///
    /// `live` is the chain new events take; `retry` is the path the flusher
    /// uses and must share `store`. Construct inside a Tokio runtime.
    pub fn new(
        live: Arc<dyn Connection>,
        retry: Arc<BufferedConnection>,
        clock: Arc<dyn Clock>,
        config: &BufferConfig,
    ) -> Self {
        let store = retry.store().clone();
        let flusher = Arc::new(Flusher {
            retry,
            store: store.clone(),
            clock,
            min_age: config.effective_min_age(),
            closing: Arc::new(AtomicBool::new(false)),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(flusher.clone().run(config.flush_interval, shutdown_rx));

        Self {
            live,
            store,
            flusher,
            flusher_task: Mutex::new(Some(task)),
            shutdown_tx,
            shutdown_timeout: config.shutdown_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn flusher(&self) -> &Arc<Flusher> {
        &self.flusher
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    async fn stop_flusher(&self) {
        self.flusher.closing.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let Some(mut task) = self.flusher_task.lock().take() else {
            return;
        };
        match self.shutdown_timeout {
            Some(grace) => {
                if tokio::time::timeout(grace, &mut task).await.is_err() {
                    task.abort();
                    warn!(
                        grace_ms = grace.as_millis() as u64,
                        "Flusher did not stop in time, aborted"
                    );
                }
            }
            None => {
                let _ = task.await;
            }
        }
    }
}

#[async_trait]
impl Connection for DurableBufferConnection {
    async fn send(&self, event: Arc<Event>) -> SendResult {
        if let Err(e) = self.store.add(&event) {
            warn!(event_id = %event.id, error = %e, "Failed to buffer event, sending anyway");
        }
        self.live.send(event).await
    }

    fn add_send_callback(&self, callback: Arc<dyn SendCallback>) {
        self.live.add_send_callback(callback);
    }

    async fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Shutting down durable buffer");
        self.stop_flusher().await;
        self.live.close().await
    }
}
