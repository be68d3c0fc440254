//! Transport abstraction layer for Parley.
//!
//! - [`Connection`]: one bidirectional byte pipe to a peer.
//! - [`AnyConnection`]: a type-erased connection, so a role can hold
//!   transports of different kinds side by side.
//! - [`MemoryConnection`]: in-process pairs (loopback self-transport,
//!   tests).
//! - [`WebSocketTransport`] / [`WebSocketDialer`]: the network transport.
//! - [`PeerLink`]: a pump task that owns a connection and posts decoded
//!   envelopes into its owner's queue.
//! - [`ConnectionSupervisor`]: the connection-status state machine with a
//!   reconnect policy.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

mod any;
mod backoff;
mod error;
mod link;
mod memory;
mod sink;
mod supervisor;
#[cfg(feature = "websocket")]
mod websocket;

pub use any::AnyConnection;
pub use backoff::{Backoff, RetryPolicy};
pub use error::TransportError;
pub use link::{LinkEvent, PeerLink};
pub use memory::MemoryConnection;
pub use sink::EventSink;
pub use supervisor::{
    ConnectionStatus, ConnectionSupervisor, Dialer, SupervisorConfig, SupervisorEvent,
    SupervisorHandle, Unroutable,
};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketDialer, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating process-unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next unused id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A single connection that can send and receive frames.
///
/// The futures are `Send` so connections can live inside spawned actor
/// tasks. Implementations may use plain `async fn` for each method.
///
/// `recv` must be cancel-safe: actors poll it inside `tokio::select!`
/// and drop the future whenever another branch wins.
pub trait Connection: Send + Sync + 'static {
    /// Sends one frame to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly, and
    /// an error when the connection broke.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
    }
}
