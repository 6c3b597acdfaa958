//! Assembles the layers into one [`Connection`].
//!
//! With every layer enabled the chain is, outermost first:
//!
//! ```text
//! DurableBufferConnection            write path: persist, then hand off
//!   AsyncDispatchConnection          worker pool
//!     BufferedConnection             retry path (also used by the flusher)
//!       CircuitBreakingConnection    lockdown + callbacks
//!         Transport                  HTTP / UDP / stdout / noop
//! ```
//!
//! Disabling the buffer drops the outer and retry layers; disabling async
//! dispatch makes the write path call the retry path directly.

use crate::buffer::{
    BufferedConnection, DiskEventStore, DurableBufferConnection, EventStore, Flusher,
    MemoryEventStore,
};
use crate::callback::SendCallback;
use crate::circuit::CircuitBreakingConnection;
use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::connection::{Connection, SendResult, Transport};
use crate::dispatch::AsyncDispatchConnection;
use crate::error::PipelineResult;
use crate::event::Event;
use crate::lockdown::LockdownManager;
use crate::transport;
use async_trait::async_trait;
use delivery_lifecycle::{HookRegistration, ShutdownHook, ShutdownManager};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tracing::{error, info};

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    transport: Arc<dyn Transport>,
    config: PipelineConfig,
    store: Option<Arc<dyn EventStore>>,
    clock: Arc<dyn Clock>,
    shutdown: Option<Arc<ShutdownManager>>,
}

impl PipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this store instead of one derived from the buffer configuration.
    pub fn store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Close the pipeline when `manager` runs its shutdown hooks.
    pub fn shutdown_manager(mut self, manager: Arc<ShutdownManager>) -> Self {
        self.shutdown = Some(manager);
        self
    }

    /// Compose the layers. Must be called inside a Tokio runtime.
    pub fn build(self) -> PipelineResult<Pipeline> {
        let config = self.config;
        config.validate()?;

        let lockdown = Arc::new(LockdownManager::with_clock(
            config.lockdown.clone(),
            self.clock.clone(),
        ));
        let breaker: Arc<dyn Connection> = Arc::new(CircuitBreakingConnection::new(
            self.transport.clone(),
            lockdown.clone(),
        ));

        let (head, durable): (Arc<dyn Connection>, Option<Arc<DurableBufferConnection>>) =
            if config.buffer.enabled {
                let store = match self.store {
                    Some(store) => store,
                    None => open_store(&config, self.clock.clone())?,
                };
                let retry = Arc::new(BufferedConnection::new(
                    breaker,
                    store,
                    config.buffer.retention,
                ));
                let live: Arc<dyn Connection> = if config.dispatch.enabled {
                    Arc::new(AsyncDispatchConnection::new(
                        retry.clone(),
                        config.dispatch.clone(),
                    ))
                } else {
                    retry.clone()
                };
                let durable = Arc::new(DurableBufferConnection::new(
                    live,
                    retry,
                    self.clock.clone(),
                    &config.buffer,
                ));
                (durable.clone() as Arc<dyn Connection>, Some(durable))
            } else if config.dispatch.enabled {
                let dispatch = AsyncDispatchConnection::new(breaker, config.dispatch.clone());
                (Arc::new(dispatch) as Arc<dyn Connection>, None)
            } else {
                (breaker, None)
            };

        let graceful = (config.dispatch.enabled && config.dispatch.graceful_shutdown)
            || (config.buffer.enabled && config.buffer.graceful_shutdown);
        let registration = match self.shutdown {
            Some(manager) if graceful => {
                let hook = Arc::new(PipelineShutdownHook { head: head.clone() });
                let registration = manager.register(hook)?;
                Some((manager, registration))
            }
            _ => None,
        };

        info!(
            transport = self.transport.name(),
            async_dispatch = config.dispatch.enabled,
            buffer = config.buffer.enabled,
            "Event delivery pipeline ready"
        );

        Ok(Pipeline {
            head,
            lockdown,
            durable,
            registration: Mutex::new(registration),
        })
    }
}

fn open_store(config: &PipelineConfig, clock: Arc<dyn Clock>) -> PipelineResult<Arc<dyn EventStore>> {
    let store: Arc<dyn EventStore> = match &config.buffer.dir {
        Some(dir) => Arc::new(DiskEventStore::open_with_clock(
            dir,
            config.buffer.max_events,
            clock,
        )?),
        None => Arc::new(MemoryEventStore::with_clock(
            Some(config.buffer.max_events),
            clock,
        )),
    };
    Ok(store)
}

struct PipelineShutdownHook {
    head: Arc<dyn Connection>,
}

#[async_trait]
impl ShutdownHook for PipelineShutdownHook {
    fn name(&self) -> &str {
        "event-delivery-pipeline"
    }

    async fn shutdown(&self) {
        if let Err(e) = self.head.close().await {
            error!(error = %e, "Failed to close event delivery pipeline");
        }
    }
}

/// The producer-facing entry point of the delivery pipeline.
pub struct Pipeline {
    head: Arc<dyn Connection>,
    lockdown: Arc<LockdownManager>,
    durable: Option<Arc<DurableBufferConnection>>,
    registration: Mutex<Option<(Arc<ShutdownManager>, HookRegistration)>>,
}

impl Pipeline {
    pub fn builder(transport: Arc<dyn Transport>) -> PipelineBuilder {
        PipelineBuilder {
            transport,
            config: PipelineConfig::default(),
            store: None,
            clock: Arc::new(SystemClock),
            shutdown: None,
        }
    }

    /// Build a pipeline whose transport is chosen by the configured collector URL.
    pub fn from_config(
        config: PipelineConfig,
        shutdown: Option<Arc<ShutdownManager>>,
    ) -> PipelineResult<Self> {
        let transport = transport::from_config(&config.transport)?;
        let mut builder = Self::builder(transport).config(config);
        if let Some(manager) = shutdown {
            builder = builder.shutdown_manager(manager);
        }
        builder.build()
    }

    pub fn lockdown_manager(&self) -> &Arc<LockdownManager> {
        &self.lockdown
    }

    /// The durable store, when buffering is enabled.
    pub fn store(&self) -> Option<&Arc<dyn EventStore>> {
        self.durable.as_ref().map(|durable| durable.store())
    }

    /// The buffer's flusher, when buffering is enabled.
    pub fn flusher(&self) -> Option<&Arc<Flusher>> {
        self.durable.as_ref().map(|durable| durable.flusher())
    }

    /// Wrap a payload in a new event and send it.
    pub async fn capture(&self, payload: serde_json::Value) -> SendResult {
        self.send(Arc::new(Event::new(payload))).await
    }
}

#[async_trait]
impl Connection for Pipeline {
    async fn send(&self, event: Arc<Event>) -> SendResult {
        self.head.send(event).await
    }

    fn add_send_callback(&self, callback: Arc<dyn SendCallback>) {
        self.head.add_send_callback(callback);
    }

    /// Close every layer. Also removes the shutdown hook, so closing
    /// explicitly and then shutting the process down closes only once.
    async fn close(&self) -> io::Result<()> {
        let registration = self.registration.lock().take();
        if let Some((manager, registration)) = registration {
            manager.deregister(registration);
        }
        self.head.close().await
    }
}
