//! The rendezvous (mediator) protocol.
//!
//! Two request/reply pairs:
//!
//! ```text
//! RequestTicket ─→ Ticket | Error { code, reason }
//! SubmitTicket  ─→ Promise | Match { peer } | Reject { reason }
//! ```
//!
//! The classification helpers ([`TicketErrorCode::is_terminal`],
//! [`RejectReason::recovery`]) are the single source of truth for which
//! failures the matchmaking client retries and which end the attempt.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ParticipantId, SessionId};

/// A short-lived credential issued by the rendezvous service.
///
/// A ticket is bound to the session it was requested for and must never be
/// submitted for another one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchTicket {
    pub session: SessionId,
    pub token: String,
}

impl MatchTicket {
    /// A ticket with an empty or whitespace-only token is unusable.
    pub fn is_blank(&self) -> bool {
        self.token.trim().is_empty()
    }
}

/// A matched peer the rendezvous service introduced us to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCandidate {
    pub participant: ParticipantId,
    /// Addresses to try for direct traversal, most promising first.
    pub addresses: Vec<String>,
}

/// Why a ticket request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketErrorCode {
    /// The service did not answer in time.
    Timeout,
    /// The reply could not be understood.
    Malformed,
    /// The reply carried no usable ticket.
    Blank,
    /// The service is temporarily refusing requests.
    Unavailable,
    /// The session no longer exists.
    SessionClosed,
}

impl TicketErrorCode {
    /// Terminal codes stop the matchmaking attempt for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SessionClosed)
    }
}

/// How the matchmaking client should react to a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Back off, then resubmit the same ticket.
    Resubmit,
    /// Drop the ticket and acquire a fresh one.
    Reacquire,
    /// Stop; report the failure once.
    Terminal,
}

/// Why the rendezvous service rejected a submitted ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    Full,
    InvalidNonce,
    NonceInUse,
    Unspecified,
    /// Our NAT randomizes ports. Traversal may still succeed from the
    /// other side, so this is retried.
    PortRandomization,
    MatchticketExpired,
    MatchticketInvalid,
    MatchticketSessionMismatch,
}

impl RejectReason {
    pub fn recovery(self) -> Recovery {
        match self {
            Self::Full | Self::PortRandomization => Recovery::Resubmit,
            Self::MatchticketExpired
            | Self::MatchticketInvalid
            | Self::MatchticketSessionMismatch => Recovery::Reacquire,
            Self::InvalidNonce | Self::NonceInUse | Self::Unspecified => Recovery::Terminal,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.recovery() == Recovery::Terminal
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Full => "FULL",
            Self::InvalidNonce => "INVALID_NONCE",
            Self::NonceInUse => "NONCE_IN_USE",
            Self::Unspecified => "UNSPECIFIED",
            Self::PortRandomization => "PORT_RANDOMIZATION",
            Self::MatchticketExpired => "MATCHTICKET_EXPIRED",
            Self::MatchticketInvalid => "MATCHTICKET_INVALID",
            Self::MatchticketSessionMismatch => "MATCHTICKET_SESSION_MISMATCH",
        };
        f.write_str(s)
    }
}

/// Client → rendezvous service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RendezvousRequest {
    RequestTicket {
        session: SessionId,
        participant: ParticipantId,
    },
    SubmitTicket { ticket: MatchTicket },
}

/// Rendezvous service → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RendezvousReply {
    Ticket { ticket: MatchTicket },
    Error { code: TicketErrorCode, reason: String },
    /// We arrived first; wait for a partner.
    Promise,
    Match { peer: PeerCandidate },
    Reject { reason: RejectReason },
}
