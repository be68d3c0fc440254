//! Error types for checkpoint storage.

use crate::Slot;

/// Errors from checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Keys name a directory in the file backend, so they must be plain.
    #[error("invalid checkpoint key {0:?}")]
    InvalidKey(String),

    #[error("no {slot} record for key {key:?}")]
    NotFound { key: String, slot: Slot },

    #[error("checkpoint index {index} exceeds the limit of {max}")]
    IndexOutOfRange { index: u32, max: u32 },

    /// A continue, replay or rewind is already running for this key.
    #[error("a resolution is already in flight for key {0:?}")]
    ResolutionInFlight(String),

    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The blocking task behind `save_async` panicked or was cancelled.
    #[error("checkpoint task failed: {0}")]
    Task(String),
}
