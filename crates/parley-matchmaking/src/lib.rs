//! Rendezvous-brokered matchmaking for Parley.
//!
//! When two participants cannot address each other directly, a
//! [`MatchmakingClient`] negotiates with a rendezvous service for a ticket
//! and a matched peer, then traverses to that peer. It implements the
//! transport crate's [`Dialer`](parley_transport::Dialer), so a
//! [`ConnectionSupervisor`](parley_transport::ConnectionSupervisor) can
//! drive it like any other dialer.
//!
//! # Feature Flags
//!
//! - `websocket` (default): [`WsRendezvous`] and [`WsTraversal`]

mod client;
mod config;
mod error;
mod service;
#[cfg(feature = "websocket")]
mod ws;

pub use client::{MatchmakingClient, MatchmakingEvent};
pub use config::MatchmakingConfig;
pub use error::MatchmakingError;
pub use service::{RendezvousService, Traversal};
#[cfg(feature = "websocket")]
pub use ws::{WsRendezvous, WsTraversal};
