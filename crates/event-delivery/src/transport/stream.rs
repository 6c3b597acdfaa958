//! Local transports: an output stream and a sink.

use crate::connection::{SendOutcome, Transport};
use crate::error::ConnectionError;
use crate::event::Event;
use crate::marshaller::{JsonMarshaller, Marshaller};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

/// Writes one marshalled event per line to a byte stream.
pub struct OutputStreamTransport {
    writer: Mutex<Box<dyn Write + Send>>,
    marshaller: Arc<dyn Marshaller>,
}

impl OutputStreamTransport {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
            marshaller: Arc::new(JsonMarshaller),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn with_marshaller(mut self, marshaller: Arc<dyn Marshaller>) -> Self {
        self.marshaller = marshaller;
        self
    }
}

#[async_trait]
impl Transport for OutputStreamTransport {
    fn name(&self) -> &str {
        "out"
    }

    async fn do_send(&self, event: &Event) -> Result<SendOutcome, ConnectionError> {
        let mut body = self
            .marshaller
            .marshall(event)
            .map_err(|e| ConnectionError::NonRetryable {
                reason: e.to_string(),
                response_code: None,
            })?;
        body.push(b'\n');

        let mut writer = self.writer.lock();
        writer
            .write_all(&body)
            .and_then(|()| writer.flush())
            .map_err(|e| ConnectionError::unreachable(format!("output stream failed: {e}")))?;
        Ok(SendOutcome::Delivered)
    }

    async fn close(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }
}

/// Accepts and drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransport;

#[async_trait]
impl Transport for NoopTransport {
    fn name(&self) -> &str {
        "noop"
    }

    async fn do_send(&self, _event: &Event) -> Result<SendOutcome, ConnectionError> {
        Ok(SendOutcome::Delivered)
    }
}
