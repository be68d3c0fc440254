//! Lobby and launch configuration.

use parley_protocol::ConfigId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// LaunchConfig
// ---------------------------------------------------------------------------

/// One game configuration participants can vote for.
///
/// Serializable so a host can load its menu of configurations from a file
/// or ship it to members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub id: ConfigId,

    /// Shown to participants.
    pub name: String,

    /// Votes needed before the countdown starts.
    pub quorum: usize,

    /// Participants included at commit. Later voters are left out.
    pub max_participants: usize,

    /// Length of the countdown, in one-second ticks.
    pub countdown_secs: u32,

    /// Only participants holding a token for this configuration may vote.
    #[serde(default)]
    pub requires_token: bool,
}

impl LaunchConfig {
    pub fn new(id: ConfigId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Self::default()
        }
    }

    /// Clamps fields into a usable range: a quorum of at least one, room
    /// for at least the quorum, and a countdown of at least one tick.
    pub fn validated(mut self) -> Self {
        self.quorum = self.quorum.max(1);
        self.max_participants = self.max_participants.max(self.quorum);
        self.countdown_secs = self.countdown_secs.max(1);
        self
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            id: ConfigId(0),
            name: String::new(),
            quorum: 2,
            max_participants: 8,
            countdown_secs: 5,
            requires_token: false,
        }
    }
}

// ---------------------------------------------------------------------------
// LobbyConfig
// ---------------------------------------------------------------------------

/// Lobby actor settings.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Seconds a halted countdown waits for its voters to come back.
    pub halt_grace_secs: u32,

    /// Bound of the command queue.
    pub command_capacity: usize,

    /// Per-subscriber backlog of the event broadcast.
    pub event_capacity: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            halt_grace_secs: 10,
            command_capacity: 64,
            event_capacity: 256,
        }
    }
}

impl LobbyConfig {
    pub fn validated(mut self) -> Self {
        self.halt_grace_secs = self.halt_grace_secs.max(1);
        self.command_capacity = self.command_capacity.max(1);
        self.event_capacity = self.event_capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_config_default() {
        let config = LaunchConfig::default();
        assert_eq!(config.quorum, 2);
        assert_eq!(config.max_participants, 8);
        assert_eq!(config.countdown_secs, 5);
        assert!(!config.requires_token);
    }

    #[test]
    fn test_launch_config_validated_clamps() {
        let config = LaunchConfig {
            quorum: 0,
            max_participants: 0,
            countdown_secs: 0,
            ..LaunchConfig::new(ConfigId(1), "duel")
        }
        .validated();
        assert_eq!(config.quorum, 1);
        assert_eq!(config.max_participants, 1);
        assert_eq!(config.countdown_secs, 1);
    }

    #[test]
    fn test_launch_config_json_defaults_requires_token() {
        let json = r#"{"id": 4, "name": "ffa", "quorum": 3, "max_participants": 6, "countdown_secs": 10}"#;
        let config: LaunchConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.id, ConfigId(4));
        assert!(!config.requires_token);
    }
}
