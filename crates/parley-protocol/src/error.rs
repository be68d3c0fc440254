//! Error types for the protocol layer.
//!
//! Each Parley crate defines its own error enum, so a `ProtocolError`
//! always means "the bytes were wrong", never "the network was down".

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed, truncated, or wrong shape.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame was empty.
    #[error("blank frame")]
    Blank,

    /// The frame decoded but violates protocol rules (for example a
    /// rendezvous reply of the wrong kind for the request).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
