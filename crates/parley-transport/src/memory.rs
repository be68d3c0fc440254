//! In-process connections.
//!
//! A [`MemoryConnection::pair`] is two ends of an unbounded channel pair.
//! Hosts use one as their loopback self-transport; tests use them in place
//! of sockets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::{Connection, ConnectionId, TransportError};

#[derive(Debug)]
enum Frame {
    Data(Vec<u8>),
    Close,
}

/// One end of an in-memory connection.
///
/// A clean [`close`](Connection::close) is seen by the other end as
/// `Ok(None)`. Dropping an end without closing it is seen as a broken
/// connection (`Err`).
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Frame>,
    rx: Mutex<mpsc::UnboundedReceiver<Frame>>,
    closed: Arc<AtomicBool>,
}

impl MemoryConnection {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a = Self {
            id: ConnectionId::next(),
            tx: a_tx,
            rx: Mutex::new(a_rx),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let b = Self {
            id: ConnectionId::next(),
            tx: b_tx,
            rx: Mutex::new(b_rx),
            closed: Arc::new(AtomicBool::new(false)),
        };
        (a, b)
    }

    /// Returns `true` once this end was closed locally or by the peer.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Connection for MemoryConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed("closed locally".into()));
        }
        self.tx
            .send(Frame::Data(data.to_vec()))
            .map_err(|_| TransportError::ConnectionClosed("peer dropped".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.is_closed() {
            return Ok(None);
        }
        match self.rx.lock().await.recv().await {
            Some(Frame::Data(data)) => Ok(Some(data)),
            Some(Frame::Close) => {
                self.closed.store(true, Ordering::Release);
                Ok(None)
            }
            None => Err(TransportError::ReceiveFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "peer vanished",
            ))),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // The peer may already be gone; closing is still a success.
            let _ = self.tx.send(Frame::Close);
        }
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
