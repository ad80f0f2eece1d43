//! Wire encoding for bus messages

use crate::bus::message::CacheBusMessage;
use crate::error::{CacheError, Result};

/// Turns [`CacheBusMessage`]s into transport payloads and back
///
/// Encoding must be lossless for the bus id, the keys and the message type.
pub trait BusEncoder: Send + Sync {
    fn encode(&self, message: &CacheBusMessage) -> Result<Vec<u8>>;

    fn decode(&self, payload: &[u8]) -> Result<CacheBusMessage>;
}

/// JSON encoding: `{"busId":"...","keys":["..."],"type":"set"}`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBusEncoder;

impl BusEncoder for JsonBusEncoder {
    fn encode(&self, message: &CacheBusMessage) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    fn decode(&self, payload: &[u8]) -> Result<CacheBusMessage> {
        serde_json::from_slice(payload)
            .map_err(|e| CacheError::SerializationError(format!("invalid bus message: {}", e)))
    }
}
