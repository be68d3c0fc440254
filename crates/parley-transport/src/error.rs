use parley_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding, accepting, or dialing failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The remote side did not answer in time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Dialing can never succeed (the session is gone, the identity is
    /// rejected, ...). Supervisors stop retrying on this.
    #[error("gave up: {0}")]
    Terminal(String),

    /// The component was stopped.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Returns `true` if retrying cannot help.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}
