//! Encoding of events into request bodies.

use crate::error::MarshalError;
use crate::event::Event;

/// Turns an event into the bytes a transport puts on the wire.
pub trait Marshaller: Send + Sync + std::fmt::Debug {
    /// MIME type of the produced body.
    fn content_type(&self) -> &str;

    /// `Content-Encoding` of the produced body, if any.
    fn content_encoding(&self) -> Option<&str> {
        None
    }

    fn marshall(&self, event: &Event) -> Result<Vec<u8>, MarshalError>;
}

/// Plain JSON, one document per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

impl Marshaller for JsonMarshaller {
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn marshall(&self, event: &Event) -> Result<Vec<u8>, MarshalError> {
        Ok(serde_json::to_vec(event)?)
    }
}
