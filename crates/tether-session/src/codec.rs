//! Consumed codec boundary.
//!
//! The structured-data codec turns caller payload values into the opaque
//! bytes the transport carries, and back. Failures never cross the boundary
//! as panics: an undecodable received payload becomes a failure result with
//! an absent payload, and an unencodable outgoing payload rejects the call
//! synchronously.

use bytes::Bytes;
use tether_core::CodecError;

/// Opaque serialize/deserialize pair for message payloads.
pub trait Codec: Send + Sync + 'static {
    /// The caller-facing payload value type.
    type Value: Send + 'static;

    /// Encode a payload value for the wire.
    fn encode(&self, value: &Self::Value) -> Result<Bytes, CodecError>;

    /// Decode a received payload.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Value, CodecError>;
}

/// CBOR codec over dynamically-typed values.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl CborCodec {
    /// Create the codec.
    pub fn new() -> Self {
        Self
    }
}

impl Codec for CborCodec {
    type Value = ciborium::value::Value;

    fn encode(&self, value: &Self::Value) -> Result<Bytes, CodecError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(value, &mut buf).map_err(CodecError::new)?;
        Ok(Bytes::from(buf))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Self::Value, CodecError> {
        ciborium::de::from_reader(bytes).map_err(CodecError::new)
    }
}
