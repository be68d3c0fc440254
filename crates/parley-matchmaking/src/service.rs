//! The two seams the matchmaking client talks through.

use std::future::Future;

use parley_protocol::{MatchTicket, ParticipantId, PeerCandidate, RendezvousReply, SessionId};
use parley_transport::Connection;

use crate::MatchmakingError;

/// A rendezvous (mediator) service.
///
/// Implementations return the raw reply; classifying it is the client's
/// job. Transport-level trouble is an `Err`.
pub trait RendezvousService: Send + Sync + 'static {
    /// Asks for a ticket for `session`. Expected replies: `Ticket`, `Error`.
    fn request_ticket(
        &self,
        session: SessionId,
        participant: ParticipantId,
    ) -> impl Future<Output = Result<RendezvousReply, MatchmakingError>> + Send;

    /// Submits a ticket. Expected replies: `Promise`, `Match`, `Reject`.
    fn submit_ticket(
        &self,
        ticket: &MatchTicket,
    ) -> impl Future<Output = Result<RendezvousReply, MatchmakingError>> + Send;
}

/// Direct connection establishment with a matched peer.
pub trait Traversal: Send + Sync + 'static {
    type Connection: Connection;

    fn traverse(
        &self,
        peer: &PeerCandidate,
    ) -> impl Future<Output = Result<Self::Connection, MatchmakingError>> + Send;
}
