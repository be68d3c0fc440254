//! Core protocol types for Parley's wire format.
//!
//! Everything in this module travels "on the wire" between participants:
//! identity tokens, the [`Envelope`] every frame is wrapped in, and the
//! routing hint ([`Recipient`]) the host uses when relaying.

use serde::{Deserialize, Serialize};

use std::fmt;

use crate::PeerMessage;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique, opaque identifier for a participant.
///
/// This is a "newtype wrapper" around `u64`. A `ParticipantId` is stable
/// across role changes and reconnects, and is deliberately distinct from
/// the participant's display name, which can change at any time.
///
/// `#[serde(transparent)]` serializes `ParticipantId(42)` as plain `42`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl ParticipantId {
    /// Draws a fresh random participant id.
    pub fn random() -> Self {
        Self(rand::random())
    }
}

/// `tracing::info!(%participant, "joined")` prints "P-42".
impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// A unique, opaque identifier for one lobby or one game instance.
///
/// Immutable for the lifetime of the session it names: a lobby and the game
/// it launches get different `SessionId`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Draws a fresh random session id.
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// Identifies one launchable game configuration (mode, map, level set).
///
/// Lobby votes and countdowns are keyed by this.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConfigId(pub u32);

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Recipient: who should receive a message?
// ---------------------------------------------------------------------------

/// Routing hint used by the host when it relays a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every participant in the session, including the host itself.
    All,

    /// One specific participant.
    Participant(ParticipantId),

    /// Everyone except the given participant (typically the sender).
    AllExcept(ParticipantId),
}

impl Recipient {
    /// Returns `true` if `participant` is addressed by this recipient.
    pub fn includes(&self, participant: ParticipantId) -> bool {
        match self {
            Self::All => true,
            Self::Participant(p) => *p == participant,
            Self::AllExcept(p) => *p != participant,
        }
    }
}

// ---------------------------------------------------------------------------
// Channel: delivery guarantees
// ---------------------------------------------------------------------------

/// The delivery guarantee requested for a message.
///
/// Membership and lobby traffic is always `ReliableOrdered`; progress
/// notifications that are superseded by the next one may go `Unreliable`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "PascalCase")]
pub enum Channel {
    /// Delivered in order, no loss.
    #[default]
    ReliableOrdered,

    /// Delivered, possibly out of order.
    ReliableUnordered,

    /// May be lost or reordered.
    Unreliable,
}

// ---------------------------------------------------------------------------
// Payload: what's inside an envelope
// ---------------------------------------------------------------------------

/// The content of a frame: either a coordination message Parley itself
/// understands, or opaque simulation data it only relays.
///
/// Adjacently tagged: `{ "type": "Peer", "data": { "type": "Go" } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    /// A membership, progress, or lobby message.
    Peer(PeerMessage),

    /// Game simulation data. Parley never looks inside.
    Game(Vec<u8>),
}

// ---------------------------------------------------------------------------
// Envelope: the top-level wire format
// ---------------------------------------------------------------------------

/// The top-level frame. Every message between participants is an Envelope.
///
/// ```text
/// ┌──────────────────────────────────┐
/// │ seq: 42                          │  ← per-sender ordering
/// │ timestamp: 15000                 │  ← sender clock, ms
/// │ sender: P-7                      │  ← original author
/// │ channel: ReliableOrdered         │
/// │ ┌──────────────────────────────┐ │
/// │ │ payload: Peer(Vote { .. })   │ │
/// │ └──────────────────────────────┘ │
/// └──────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Auto-incrementing per-sender sequence number.
    pub seq: u64,

    /// Milliseconds since the sender's session started.
    pub timestamp: u64,

    /// The participant that authored the payload. A host relaying a
    /// client's message keeps the original author here.
    pub sender: ParticipantId,

    /// Delivery guarantee. Defaults to `ReliableOrdered` when absent.
    #[serde(default)]
    pub channel: Channel,

    /// The actual content.
    pub payload: Payload,
}

impl Envelope {
    /// Wraps a peer message in a reliable-ordered envelope.
    pub fn peer(seq: u64, timestamp: u64, sender: ParticipantId, msg: PeerMessage) -> Self {
        Self {
            seq,
            timestamp,
            sender,
            channel: Channel::ReliableOrdered,
            payload: Payload::Peer(msg),
        }
    }

    /// Returns the peer message inside, if this is not game data.
    pub fn peer_message(&self) -> Option<&PeerMessage> {
        match &self.payload {
            Payload::Peer(msg) => Some(msg),
            Payload::Game(_) => None,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
