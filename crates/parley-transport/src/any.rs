//! Type-erased connections.
//!
//! [`Connection`] returns `impl Future`, which makes it unusable as a
//! trait object. `AnyConnection` boxes the futures instead so a host role
//! can hold a WebSocket peer, a matchmade peer, and its own loopback in
//! one map.

use futures_util::future::BoxFuture;

use crate::{Connection, ConnectionId, TransportError};

/// Object-safe mirror of [`Connection`].
trait ErasedConnection: Send + Sync + 'static {
    fn send_boxed<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<(), TransportError>>;
    fn recv_boxed(&self) -> BoxFuture<'_, Result<Option<Vec<u8>>, TransportError>>;
    fn close_boxed(&self) -> BoxFuture<'_, Result<(), TransportError>>;
    fn erased_id(&self) -> ConnectionId;
}

impl<C: Connection> ErasedConnection for C {
    fn send_boxed<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(self.send(data))
    }

    fn recv_boxed(&self) -> BoxFuture<'_, Result<Option<Vec<u8>>, TransportError>> {
        Box::pin(self.recv())
    }

    fn close_boxed(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(self.close())
    }

    fn erased_id(&self) -> ConnectionId {
        self.id()
    }
}

/// A boxed connection of any concrete type.
pub struct AnyConnection(Box<dyn ErasedConnection>);

impl AnyConnection {
    /// Erases the concrete type of `conn`.
    pub fn new<C: Connection>(conn: C) -> Self {
        Self(Box::new(conn))
    }
}

impl std::fmt::Debug for AnyConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AnyConnection").field(&self.0.erased_id()).finish()
    }
}

impl Connection for AnyConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.0.send_boxed(data).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        self.0.recv_boxed().await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.0.close_boxed().await
    }

    fn id(&self) -> ConnectionId {
        self.0.erased_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryConnection;

    #[tokio::test]
    async fn test_any_connection_delegates_to_inner() {
        let (a, b) = MemoryConnection::pair();
        let id = a.id();
        let a = AnyConnection::new(a);

        assert_eq!(a.id(), id);
        a.send(b"ping").await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(b"ping".to_vec()));

        a.close().await.unwrap();
        assert_eq!(b.recv().await.unwrap(), None);
    }
}
