//! Wire protocol for Parley.
//!
//! This crate defines the "language" participants and the rendezvous
//! service speak:
//!
//! - **Identity** ([`ParticipantId`], [`SessionId`], [`ConfigId`])
//! - **Frames** ([`Envelope`], [`Payload`], [`PeerMessage`])
//! - **Launch** ([`SessionStartPackage`], [`Launch`])
//! - **Rendezvous** ([`RendezvousRequest`], [`RendezvousReply`], [`MatchTicket`])
//! - **Codec** ([`Codec`] trait, [`JsonCodec`])
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Role / Lobby (participants)
//! ```

mod codec;
mod error;
mod messages;
mod rendezvous;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use messages::{
    KickReason, Launch, PeerMessage, RosterEntry, SessionStartPackage, TokenGrant,
    TransportDescription,
};
pub use rendezvous::{
    MatchTicket, PeerCandidate, RejectReason, Recovery, RendezvousReply, RendezvousRequest,
    TicketErrorCode,
};
pub use types::{Channel, ConfigId, Envelope, ParticipantId, Payload, Recipient, SessionId};
