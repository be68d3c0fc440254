use parley_protocol::{ParticipantId, SessionId};
use parley_transport::SupervisorConfig;

use crate::Arrival;

/// Who this session belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub session: SessionId,
    pub local: ParticipantId,
    /// Display name. Can change with `rename`; the id never does.
    pub name: String,
}

impl SessionIdentity {
    pub fn new(session: SessionId, local: ParticipantId, name: impl Into<String>) -> Self {
        Self {
            session,
            local,
            name: name.into(),
        }
    }
}

/// Session actor settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound of the command queue.
    pub command_capacity: usize,
    /// Per-subscriber backlog of the event broadcast.
    pub event_capacity: usize,
    /// Rendezvous arrival order, feeds the host-priority tier.
    pub arrival: Arrival,
    /// Used for the client role's supervisor.
    pub supervisor: SupervisorConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_capacity: 64,
            event_capacity: 256,
            arrival: Arrival::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn validated(mut self) -> Self {
        self.command_capacity = self.command_capacity.max(1);
        self.event_capacity = self.event_capacity.max(1);
        self
    }
}
