//! Unified error type for Parley.

use parley_checkpoint::CheckpointError;
use parley_lobby::LobbyError;
use parley_matchmaking::MatchmakingError;
use parley_protocol::ProtocolError;
use parley_role::RoleError;
use parley_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` conversions let `?` lift sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Matchmaking(#[from] MatchmakingError),

    #[error(transparent)]
    Role(#[from] RoleError),

    #[error(transparent)]
    Lobby(#[from] LobbyError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl ParleyError {
    /// Retrying the failed operation cannot succeed.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_terminal(),
            Self::Matchmaking(e) => e.is_terminal(),
            Self::Role(RoleError::Shutdown) | Self::Lobby(LobbyError::Shutdown) => true,
            _ => false,
        }
    }
}
