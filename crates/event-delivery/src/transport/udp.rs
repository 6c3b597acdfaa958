//! Fire-and-forget UDP transport.

use crate::connection::{SendOutcome, Transport};
use crate::error::ConnectionError;
use crate::event::Event;
use crate::marshaller::{JsonMarshaller, Marshaller};
use crate::sampler::EventSampler;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

/// Largest payload that fits in one IPv4 UDP datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Sends each event as a single datagram. The socket is bound on first use.
#[derive(Debug)]
pub struct UdpTransport {
    target: String,
    socket: OnceCell<UdpSocket>,
    marshaller: Arc<dyn Marshaller>,
    sampler: Option<Arc<dyn EventSampler>>,
}

impl UdpTransport {
    /// `target` is a `host:port` pair.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            socket: OnceCell::new(),
            marshaller: Arc::new(JsonMarshaller),
            sampler: None,
        }
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn EventSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn with_marshaller(mut self, marshaller: Arc<dyn Marshaller>) -> Self {
        self.marshaller = marshaller;
        self
    }

    async fn socket(&self) -> io::Result<&UdpSocket> {
        self.socket
            .get_or_try_init(|| async {
                let remote = tokio::net::lookup_host(&self.target)
                    .await?
                    .next()
                    .ok_or_else(|| {
                        io::Error::new(io::ErrorKind::NotFound, "collector host did not resolve")
                    })?;
                let local: SocketAddr = if remote.is_ipv4() {
                    ([0u8; 4], 0).into()
                } else {
                    ([0u16; 8], 0).into()
                };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(remote).await?;
                debug!(collector = %remote, "UDP socket connected");
                Ok::<_, io::Error>(socket)
            })
            .await
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn name(&self) -> &str {
        "udp"
    }

    async fn do_send(&self, event: &Event) -> Result<SendOutcome, ConnectionError> {
        if let Some(sampler) = &self.sampler {
            if !sampler.should_send_event(event) {
                return Ok(SendOutcome::SampledOut);
            }
        }

        let body = self
            .marshaller
            .marshall(event)
            .map_err(|e| ConnectionError::NonRetryable {
                reason: e.to_string(),
                response_code: None,
            })?;
        if body.len() > MAX_DATAGRAM_SIZE {
            return Err(ConnectionError::NonRetryable {
                reason: format!(
                    "event is {} bytes, larger than a UDP datagram ({MAX_DATAGRAM_SIZE})",
                    body.len()
                ),
                response_code: None,
            });
        }

        let socket = self
            .socket()
            .await
            .map_err(|e| ConnectionError::unreachable(format!("UDP socket unavailable: {e}")))?;
        socket
            .send(&body)
            .await
            .map_err(|e| ConnectionError::unreachable(format!("UDP send failed: {e}")))?;

        trace!(event_id = %event.id, bytes = body.len(), "Event sent over UDP");
        Ok(SendOutcome::Delivered)
    }
}
