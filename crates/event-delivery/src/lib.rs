//! Event delivery pipeline.
//!
//! Gets captured events to a remote collector without blocking the
//! producer, backing off while the collector is unhealthy and keeping
//! undelivered events for later retry.
//!
//! # Architecture
//!
//! - [`lockdown`]: circuit-breaker state and backoff arithmetic
//! - [`circuit`]: breaker around a leaf [`Transport`]
//! - [`dispatch`]: worker pool that takes sends off the producer
//! - [`buffer`]: durable store, retry path and periodic flusher
//! - [`transport`]: HTTP, UDP, output-stream and no-op leaves
//! - [`pipeline`]: composition of the layers above
//!
//! Every layer implements [`Connection`] and wraps another one.

pub mod buffer;
pub mod callback;
pub mod circuit;
pub mod clock;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod lockdown;
pub mod marshaller;
pub mod pipeline;
pub mod sampler;
pub mod transport;

#[cfg(test)]
mod tests;

pub use buffer::{
    BufferConfig, BufferedConnection, BufferedEvent, DiskEventStore, DurableBufferConnection,
    EventStore, FlushReport, FlushStop, Flusher, MemoryEventStore, RetentionPolicy,
};
pub use callback::SendCallback;
pub use circuit::CircuitBreakingConnection;
pub use clock::{Clock, SystemClock, TestClock};
pub use config::PipelineConfig;
pub use connection::{Connection, SendOutcome, SendResult, Transport};
pub use dispatch::{AsyncDispatchConnection, DispatchConfig, DispatchPriority, OverflowPolicy};
pub use error::{
    ConfigError, ConfigResult, ConnectionError, MarshalError, PipelineError, PipelineResult,
    StoreError, StoreResult,
};
pub use event::Event;
pub use lockdown::{LockdownConfig, LockdownManager};
pub use marshaller::{JsonMarshaller, Marshaller};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use sampler::{EventSampler, RandomEventSampler};
pub use transport::TransportConfig;
