//! WebSocket-backed rendezvous client and traversal.

use std::time::Duration;

use parley_protocol::{
    Codec, JsonCodec, MatchTicket, ParticipantId, PeerCandidate, RendezvousReply,
    RendezvousRequest, SessionId,
};
use parley_transport::{
    Connection, Dialer, TransportError, WebSocketConnection, WebSocketDialer,
};
use tokio::sync::Mutex;

use crate::{MatchmakingError, RendezvousService, Traversal};

/// Speaks the rendezvous protocol as JSON frames over one WebSocket.
///
/// The socket is opened lazily and reopened after any failure. Requests
/// are serialized: one request, one reply.
pub struct WsRendezvous {
    dialer: WebSocketDialer,
    codec: JsonCodec,
    conn: Mutex<Option<WebSocketConnection>>,
}

impl WsRendezvous {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            dialer: WebSocketDialer::new(url),
            codec: JsonCodec,
            conn: Mutex::new(None),
        }
    }

    async fn exchange(&self, request: RendezvousRequest) -> Result<RendezvousReply, MatchmakingError> {
        let bytes = self.codec.encode(&request)?;
        let mut slot = self.conn.lock().await;
        let conn = match slot.take() {
            Some(conn) => conn,
            None => self.dialer.dial().await?,
        };

        conn.send(&bytes).await?;
        let frame = conn.recv().await?.ok_or_else(|| {
            TransportError::ConnectionClosed("rendezvous service hung up".into())
        })?;
        let reply = self.codec.decode(&frame)?;

        // Only a healthy socket goes back for reuse.
        *slot = Some(conn);
        Ok(reply)
    }
}

impl RendezvousService for WsRendezvous {
    async fn request_ticket(
        &self,
        session: SessionId,
        participant: ParticipantId,
    ) -> Result<RendezvousReply, MatchmakingError> {
        self.exchange(RendezvousRequest::RequestTicket {
            session,
            participant,
        })
        .await
    }

    async fn submit_ticket(&self, ticket: &MatchTicket) -> Result<RendezvousReply, MatchmakingError> {
        self.exchange(RendezvousRequest::SubmitTicket {
            ticket: ticket.clone(),
        })
        .await
    }
}

/// Tries each advertised address of the candidate, in order.
#[derive(Debug, Clone)]
pub struct WsTraversal {
    per_address: Duration,
}

impl WsTraversal {
    pub fn new(per_address: Duration) -> Self {
        Self { per_address }
    }
}

impl Default for WsTraversal {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl Traversal for WsTraversal {
    type Connection = WebSocketConnection;

    async fn traverse(&self, peer: &PeerCandidate) -> Result<WebSocketConnection, MatchmakingError> {
        for address in &peer.addresses {
            let url = if address.starts_with("ws://") || address.starts_with("wss://") {
                address.clone()
            } else {
                format!("ws://{address}")
            };
            match tokio::time::timeout(self.per_address, WebSocketDialer::new(url).dial()).await {
                Ok(Ok(conn)) => return Ok(conn),
                Ok(Err(e)) => {
                    tracing::debug!(peer = %peer.participant, %address, error = %e, "address unreachable");
                }
                Err(_) => {
                    tracing::debug!(peer = %peer.participant, %address, "address timed out");
                }
            }
        }
        Err(MatchmakingError::Traversal(format!(
            "no address of {} answered",
            peer.participant
        )))
    }
}
