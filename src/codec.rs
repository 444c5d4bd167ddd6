use crate::error::{TransportError, TransportResult};
use serde::{Deserialize, Serialize};

/// Trait for encoding and decoding envelopes into frames
pub trait Codec: Send + Sync + std::fmt::Debug {
    /// Encode a serializable value into bytes
    fn encode<T: Serialize>(&self, data: &T) -> TransportResult<Vec<u8>>;

    /// Decode bytes into a deserializable value
    fn decode<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> TransportResult<T>;
}

/// JSON codec, the default and the only one whose output matches the
/// envelope's documented wire shape
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, data: &T) -> TransportResult<Vec<u8>> {
        serde_json::to_vec(data).map_err(|e| TransportError::Codec(e.to_string()))
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> TransportResult<T> {
        serde_json::from_slice(data).map_err(|e| TransportError::Codec(e.to_string()))
    }
}
