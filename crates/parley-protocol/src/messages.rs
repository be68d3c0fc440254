//! Peer-to-peer coordination messages.
//!
//! [`PeerMessage`] is the language participants speak once a transport is
//! up. It falls into three groups:
//!
//! - **membership**: who is in the session and who hosts it
//! - **progress**: waiting / paused / go / over notifications
//! - **lobby-only**: votes, chat, per-configuration tokens, and the final
//!   [`Launch`] instruction that turns a lobby into a game session

use serde::{Deserialize, Serialize};

use crate::{ConfigId, ParticipantId, SessionId};

/// Why a participant was removed from a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KickReason {
    /// The host removed them.
    Removed,
    /// No free slot was left.
    Full,
    /// Incompatible protocol or game version.
    Incompatible,
    /// They stopped answering.
    Timeout,
}

/// A per-configuration credential grant, or its withdrawal.
///
/// `{ "kind": "Token", "token": "abc" }` / `{ "kind": "Revoke" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "token")]
pub enum TokenGrant {
    Token(String),
    Revoke,
}

// ---------------------------------------------------------------------------
// Session start package
// ---------------------------------------------------------------------------

/// One entry of the fixed roster a launched session starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub participant: ParticipantId,
    /// Display name at commit time. Informational only.
    pub name: String,
}

/// How a launched participant can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportDescription {
    pub participant: ParticipantId,
    /// A dialable address, or `None` when the lobby link is reused as-is.
    pub address: Option<String>,
}

/// The immutable result of a committed lobby countdown.
///
/// Every included participant receives the same package, so every client's
/// view of the roster is identical to the committed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartPackage {
    /// Identity of the game session being launched (not the lobby's).
    pub session: SessionId,
    /// The configuration that won the vote.
    pub config: ConfigId,
    /// The participant that hosts the launched session.
    pub host: ParticipantId,
    /// Included participants, in vote order. Contains the host.
    pub roster: Vec<RosterEntry>,
    /// One entry per included participant.
    pub transports: Vec<TransportDescription>,
    /// Lobby members that were not included.
    pub absentees: Vec<ParticipantId>,
}

impl SessionStartPackage {
    /// Returns `true` if `participant` is part of the launched roster.
    pub fn includes(&self, participant: ParticipantId) -> bool {
        self.roster.iter().any(|e| e.participant == participant)
    }

    /// Included participants other than the host.
    pub fn clients(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.roster
            .iter()
            .map(|e| e.participant)
            .filter(move |p| *p != self.host)
    }

    /// Participant ids of the roster, in order.
    pub fn roster_ids(&self) -> Vec<ParticipantId> {
        self.roster.iter().map(|e| e.participant).collect()
    }
}

/// The launch instruction a lobby host sends each member on commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "as")]
pub enum Launch {
    /// You were not included; the lobby continues without you.
    Absent { config: ConfigId },
    /// Join the launched session as a client.
    Client { package: SessionStartPackage },
    /// Host the launched session.
    Host { package: SessionStartPackage },
}

impl Launch {
    /// The configuration this launch is for.
    pub fn config(&self) -> ConfigId {
        match self {
            Self::Absent { config } => *config,
            Self::Client { package } | Self::Host { package } => package.config,
        }
    }

    /// The start package, unless the recipient is absent.
    pub fn package(&self) -> Option<&SessionStartPackage> {
        match self {
            Self::Absent { .. } => None,
            Self::Client { package } | Self::Host { package } => Some(package),
        }
    }
}

// ---------------------------------------------------------------------------
// PeerMessage
// ---------------------------------------------------------------------------

/// Coordination messages exchanged between participants.
///
/// Internally tagged: `{ "type": "Vote", "config": 3, "enabled": true }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerMessage {
    // -- Membership --
    /// Host → new member: you are in, here is the session you joined.
    Welcome {
        session: SessionId,
        participant: ParticipantId,
    },
    /// Host → all: this participant occupies this slot.
    AssignSlot { participant: ParticipantId, slot: u8 },
    /// Host → all: the session has this many slots in total.
    AssignTotalSlots { total: u8 },
    /// Host → all: this participant is now the host.
    HostIdentity { host: ParticipantId },
    /// Any → all: display name changed.
    PlayerName {
        participant: ParticipantId,
        name: String,
    },
    /// Host → member: you are removed.
    Kick {
        participant: ParticipantId,
        reason: KickReason,
    },
    /// Member → host: I am leaving.
    Quit,
    /// Host → all: this participant watches but does not play.
    Spectator { participant: ParticipantId },
    /// Peer ↔ peer: my host priority, used to settle who hosts.
    HostBid { priority: u32 },

    // -- Progress --
    /// Still waiting on these participants.
    Waiting { who: Vec<ParticipantId> },
    /// Paused because of these participants.
    Paused { who: Vec<ParticipantId> },
    /// Everyone is ready; start.
    Go,
    /// The game ended with these winners.
    Over { winners: Vec<ParticipantId> },
    /// Advance to the given level.
    LevelUp { level: u32 },

    // -- Lobby only --
    /// Member → host: add or withdraw a vote for a configuration.
    Vote { config: ConfigId, enabled: bool },
    /// Chat text. The envelope's sender is the author.
    TextMessage { text: String },
    /// Member → host: a credential for (or revocation of) a configuration.
    AuthToken { config: ConfigId, grant: TokenGrant },
    /// Host → member: the countdown committed.
    LaunchAs { launch: Launch },
}

impl PeerMessage {
    /// A short, stable name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::AssignSlot { .. } => "assign-slot",
            Self::AssignTotalSlots { .. } => "assign-total-slots",
            Self::HostIdentity { .. } => "host-identity",
            Self::PlayerName { .. } => "player-name",
            Self::Kick { .. } => "kick",
            Self::Quit => "quit",
            Self::Spectator { .. } => "spectator",
            Self::HostBid { .. } => "host-bid",
            Self::Waiting { .. } => "waiting",
            Self::Paused { .. } => "paused",
            Self::Go => "go",
            Self::Over { .. } => "over",
            Self::LevelUp { .. } => "level-up",
            Self::Vote { .. } => "vote",
            Self::TextMessage { .. } => "text-message",
            Self::AuthToken { .. } => "auth-token",
            Self::LaunchAs { .. } => "launch-as",
        }
    }

    /// Role negotiation traffic. Everything else mutates session state and
    /// must not be applied while a role handoff is in progress.
    pub fn is_role_control(&self) -> bool {
        matches!(self, Self::HostBid { .. } | Self::HostIdentity { .. })
    }

    /// Messages only meaningful while the session is a lobby.
    pub fn is_lobby_only(&self) -> bool {
        matches!(
            self,
            Self::Vote { .. }
                | Self::TextMessage { .. }
                | Self::AuthToken { .. }
                | Self::LaunchAs { .. }
        )
    }
}
