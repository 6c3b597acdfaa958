//! The decorator seam shared by every pipeline layer.

use crate::callback::SendCallback;
use crate::error::ConnectionError;
use crate::event::Event;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;

/// Result of a delivery attempt through a [`Connection`].
pub type SendResult = Result<(), ConnectionError>;

/// Something an event can be sent through.
///
/// Every layer (breaker, async dispatch, durable buffer) implements this and
/// wraps another implementation, so layers compose at construction time.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Deliver (or accept for later delivery) one event.
    async fn send(&self, event: Arc<Event>) -> SendResult;

    /// Register an observer of delivery outcomes.
    ///
    /// Wrapping layers forward registration to the layer that owns the
    /// callbacks.
    fn add_send_callback(&self, callback: Arc<dyn SendCallback>);

    /// Release resources. Calling it more than once is harmless.
    async fn close(&self) -> io::Result<()>;
}

/// What a leaf transport did with an event it did not fail on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The collector accepted the event.
    Delivered,
    /// The collector answered and deliberately dropped the event.
    Filtered { response_code: u16 },
    /// The sampler rejected the event before any I/O.
    SampledOut,
}

impl SendOutcome {
    /// Whether the collector answered, which counts as a healthy send.
    pub fn reached_collector(&self) -> bool {
        !matches!(self, Self::SampledOut)
    }
}

/// Leaf that performs the actual I/O.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn do_send(&self, event: &Event) -> Result<SendOutcome, ConnectionError>;

    async fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn do_send(&self, event: &Event) -> Result<SendOutcome, ConnectionError> {
        (**self).do_send(event).await
    }

    async fn close(&self) -> io::Result<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<C: Connection + ?Sized> Connection for Arc<C> {
    async fn send(&self, event: Arc<Event>) -> SendResult {
        (**self).send(event).await
    }

    fn add_send_callback(&self, callback: Arc<dyn SendCallback>) {
        (**self).add_send_callback(callback)
    }

    async fn close(&self) -> io::Result<()> {
        (**self).close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampled_out_never_reached_collector() {
        assert!(SendOutcome::Delivered.reached_collector());
        assert!(SendOutcome::Filtered { response_code: 403 }.reached_collector());
        assert!(!SendOutcome::SampledOut.reached_collector());
    }
}
