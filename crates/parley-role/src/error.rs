use parley_protocol::ParticipantId;
use parley_transport::TransportError;

/// Errors from the session and role layer.
#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    /// A role handoff was requested while another is still running.
    #[error("a role handoff is already in progress")]
    HandoffInProgress,

    /// The operation needs the host role.
    #[error("this participant is not the host")]
    NotHost,

    /// The operation needs the client role.
    #[error("this participant is not a client")]
    NotClient,

    /// The host layer stopped accepting members for a pending handoff.
    #[error("not accepting new members")]
    NotAccepting,

    #[error("participant {0} is not in the session")]
    UnknownParticipant(ParticipantId),

    #[error("participant {0} is already in the session")]
    AlreadyMember(ParticipantId),

    /// No live transport leads to the participant.
    #[error("no live transport to {0}")]
    NoLink(ParticipantId),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The session actor is gone.
    #[error("session is shut down")]
    Shutdown,
}
