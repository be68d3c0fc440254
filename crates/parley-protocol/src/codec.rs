//! Codec trait and implementations for serializing/deserializing frames.
//!
//! A "codec" converts between Rust values and raw bytes. Transports move
//! bytes; everything above them moves [`Envelope`](crate::Envelope)s and
//! rendezvous messages. The [`Codec`] trait is the seam between the two.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to bytes and decodes them back.
///
/// `Send + Sync + 'static` because a codec is shared by every actor task
/// that touches the wire (supervisors, peer links, the rendezvous client).
/// `Clone` lets each of those tasks own its copy.
pub trait Codec: Send + Sync + Clone + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// truncated, or of the wrong shape. Blank input is reported as
    /// `ProtocolError::Blank` so callers can tell "nothing" from "garbage".
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use parley_protocol::{Codec, Envelope, JsonCodec, ParticipantId, PeerMessage};
///
/// let codec = JsonCodec;
/// let envelope = Envelope::peer(1, 5000, ParticipantId(7), PeerMessage::Go);
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: Envelope = codec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Err(ProtocolError::Blank);
        }
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
