use std::time::Duration;

use parley_protocol::{ProtocolError, RejectReason, TicketErrorCode};
use parley_transport::TransportError;

/// Errors from one matchmaking step.
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    /// The rendezvous service refused to issue a ticket.
    #[error("ticket request failed ({code:?}): {reason}")]
    Ticket {
        code: TicketErrorCode,
        reason: String,
    },

    /// A submitted ticket was rejected.
    #[error("ticket rejected: {0}")]
    Rejected(RejectReason),

    /// A rendezvous request or traversal did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The service answered with a reply that makes no sense here.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// None of the candidate's addresses could be reached.
    #[error("traversal failed: {0}")]
    Traversal(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl MatchmakingError {
    /// Returns `true` if no amount of retrying can help.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Ticket { code, .. } => code.is_terminal(),
            Self::Rejected(reason) => reason.is_terminal(),
            Self::Transport(e) => e.is_terminal(),
            Self::Timeout(_) | Self::UnexpectedReply(_) | Self::Traversal(_) | Self::Protocol(_) => {
                false
            }
        }
    }
}
