//! Pre-game lobby for Parley.
//!
//! Participants vote for launch configurations. A configuration that
//! reaches its quorum starts a countdown; when it runs out the lobby
//! commits: it fixes the roster, picks the host of the new session and
//! hands every member a [`Launch`](parley_protocol::Launch) outcome.
//!
//! # Key types
//!
//! - [`LaunchCoordinator`]: the synchronous vote and countdown state machine
//! - [`LobbyHandle`]: commands to a running lobby actor ([`spawn_lobby`])
//! - [`CountdownRecord`] / [`RecordStatus`]: per-configuration vote state
//! - [`LaunchConfig`]: quorum, size and countdown of one configuration

mod config;
mod coordinator;
mod error;
mod lobby;
mod record;

pub use config::{LaunchConfig, LobbyConfig};
pub use coordinator::{LaunchCoordinator, LobbyEvent, LobbyMember};
pub use error::LobbyError;
pub use lobby::{spawn_lobby, LobbyHandle, LobbySnapshot};
pub use record::{CountdownRecord, RecordId, RecordStatus};
