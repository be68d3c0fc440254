//! Error types for the lobby layer.

use parley_protocol::{ConfigId, ParticipantId};

use crate::RecordId;

/// Errors from lobby operations.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("configuration {0} is not offered in this lobby")]
    UnknownConfig(ConfigId),

    #[error("participant {0} is not in the lobby")]
    UnknownParticipant(ParticipantId),

    #[error("participant {0} is already in the lobby")]
    AlreadyMember(ParticipantId),

    /// Spectators watch; they never vote.
    #[error("participant {0} is a spectator")]
    Spectator(ParticipantId),

    /// The configuration requires a token the participant does not hold.
    #[error("participant {participant} holds no token for configuration {config}")]
    TokenRequired {
        config: ConfigId,
        participant: ParticipantId,
    },

    /// No countdown is running for the configuration.
    #[error("no active countdown for configuration {0}")]
    NotActive(ConfigId),

    #[error("countdown record {0} does not exist")]
    UnknownRecord(RecordId),

    /// A committed record is destroyed and can never commit again.
    #[error("countdown record {0} was already committed")]
    AlreadyCommitted(RecordId),

    /// The lobby actor is gone.
    #[error("lobby is shut down")]
    Shutdown,
}
