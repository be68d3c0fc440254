//! # Parley
//!
//! Peer session coordinator for real-time multiplayer games.
//!
//! Parley decides who hosts among a small group of peers, introduces peers
//! that cannot reach each other directly through a rendezvous service,
//! runs the pre-game lobby vote and hands the lobby off to a game session.
//!
//! ```text
//!   parley-matchmaking ──→ parley-transport ──→ parley-role ──→ parley-lobby
//!   (ticket, traversal)    (supervised links)   (host/client)   (votes, launch)
//!                                                    │
//!                                                parley-checkpoint
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parley::prelude::*;
//!
//! # async fn run(conn: AnyConnection) -> Result<(), ParleyError> {
//! parley::init_tracing();
//!
//! let identity = SessionIdentity::new(SessionId(1), ParticipantId(1), "ann");
//! let session = SessionHandle::spawn_host(identity, JsonCodec, SessionConfig::default(), vec![]);
//! session.add_member(ParticipantId(2), "bo", conn).await?;
//!
//! let lobby = spawn_lobby(SessionId(1), LobbyConfig::default(), [LaunchConfig::new(ConfigId(1), "duel")]);
//! let bridge = LobbyBridge::start(session.clone(), lobby).await?;
//! let launch = bridge.subscribe_launch().recv().await;
//! # Ok(())
//! # }
//! ```

mod bridge;
mod error;

pub use bridge::{launch_from, LobbyBridge};
pub use error::ParleyError;

pub use parley_checkpoint as checkpoint;
pub use parley_lobby as lobby;
pub use parley_matchmaking as matchmaking;
pub use parley_protocol as protocol;
pub use parley_role as role;
pub use parley_tick as tick;
pub use parley_transport as transport;

/// Installs a `tracing` subscriber that reads `RUST_LOG`, defaulting to
/// `info`. Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Common imports for applications built on Parley.
pub mod prelude {
    pub use crate::{init_tracing, launch_from, LobbyBridge, ParleyError};

    pub use parley_checkpoint::{
        CheckpointConfig, CheckpointRecord, CheckpointStore, FileBackend, MemoryBackend,
        Resolution, ResultSummary,
    };
    pub use parley_lobby::{spawn_lobby, LaunchConfig, LobbyConfig, LobbyEvent, LobbyHandle};
    pub use parley_matchmaking::{MatchmakingClient, MatchmakingConfig, MatchmakingEvent};
    pub use parley_protocol::{
        ConfigId, JsonCodec, Launch, ParticipantId, PeerMessage, SessionId, SessionStartPackage,
    };
    pub use parley_role::{
        Role, SessionConfig, SessionEvent, SessionHandle, SessionIdentity, SessionSnapshot,
    };
    pub use parley_transport::{
        AnyConnection, ConnectionStatus, ConnectionSupervisor, MemoryConnection, SupervisorConfig,
        SupervisorEvent,
    };
}
