//! Peer links: one pump task per established connection.
//!
//! A host keeps one `PeerLink` per client (plus one for its own loopback).
//! Each link owns its connection, decodes inbound frames, and posts them
//! into the owner's queue tagged with the link's [`ConnectionId`].

use parley_protocol::{Codec, Envelope};
use tokio::sync::{mpsc, oneshot};

use crate::{AnyConnection, Connection, ConnectionId, ConnectionStatus, EventSink, TransportError};

/// What a link reports to its owner.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Message {
        link: ConnectionId,
        envelope: Envelope,
    },
    /// A frame that does not decode. The link stays open.
    Invalid { link: ConnectionId, reason: String },
    /// The link ended. `status` is `PeerDisconnected` for a clean close
    /// and `Broken` otherwise.
    Closed {
        link: ConnectionId,
        status: ConnectionStatus,
    },
}

impl LinkEvent {
    pub fn link(&self) -> ConnectionId {
        match self {
            Self::Message { link, .. } | Self::Invalid { link, .. } | Self::Closed { link, .. } => {
                *link
            }
        }
    }
}

enum LinkCommand {
    Send(Vec<u8>),
    Detach(oneshot::Sender<Option<AnyConnection>>),
    Close,
}

/// Handle to a running link pump.
pub struct PeerLink<K: Codec> {
    id: ConnectionId,
    codec: K,
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl<K: Codec> PeerLink<K> {
    /// Starts pumping `conn`. Events go to `sink` until the link closes or
    /// the sink is killed.
    pub fn spawn(conn: AnyConnection, codec: K, sink: EventSink<LinkEvent>) -> Self {
        let id = conn.id();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(conn, codec.clone(), rx, sink));
        tracing::debug!(link = %id, "peer link started");
        Self {
            id,
            codec,
            commands: tx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `envelope` for sending. Writes happen in order on the pump.
    pub fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let bytes = self.codec.encode(envelope)?;
        self.commands
            .send(LinkCommand::Send(bytes))
            .map_err(|_| TransportError::ConnectionClosed(format!("{} is closed", self.id)))
    }

    /// Returns `true` while the pump is running.
    pub fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stops the pump and returns the connection without closing it.
    /// Queued sends are flushed first.
    pub async fn detach(self) -> Option<AnyConnection> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(LinkCommand::Detach(reply)).ok()?;
        rx.await.ok().flatten()
    }

    /// Closes the connection. No `Closed` event is posted for a local close.
    pub fn close(self) {
        let _ = self.commands.send(LinkCommand::Close);
    }
}

async fn pump<K: Codec>(
    conn: AnyConnection,
    codec: K,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    sink: EventSink<LinkEvent>,
) {
    let link = conn.id();
    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(LinkCommand::Send(bytes)) => {
                    if let Err(e) = conn.send(&bytes).await {
                        tracing::warn!(%link, error = %e, "peer link send failed");
                        let _ = conn.close().await;
                        sink.post(LinkEvent::Closed { link, status: ConnectionStatus::Broken });
                        return;
                    }
                }
                Some(LinkCommand::Detach(reply)) => {
                    tracing::debug!(%link, "peer link detached");
                    let _ = reply.send(Some(conn));
                    return;
                }
                Some(LinkCommand::Close) | None => {
                    let _ = conn.close().await;
                    tracing::debug!(%link, "peer link closed locally");
                    return;
                }
            },
            frame = conn.recv() => match frame {
                Ok(Some(bytes)) => match codec.decode::<Envelope>(&bytes) {
                    Ok(envelope) => {
                        sink.post(LinkEvent::Message { link, envelope });
                    }
                    Err(e) => {
                        sink.post(LinkEvent::Invalid { link, reason: e.to_string() });
                    }
                },
                Ok(None) => {
                    tracing::info!(%link, "peer closed the link");
                    sink.post(LinkEvent::Closed { link, status: ConnectionStatus::PeerDisconnected });
                    return;
                }
                Err(e) => {
                    tracing::warn!(%link, error = %e, "peer link broke");
                    sink.post(LinkEvent::Closed { link, status: ConnectionStatus::Broken });
                    return;
                }
            },
        }
    }
}
