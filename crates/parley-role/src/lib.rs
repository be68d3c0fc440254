//! Host/client roles for Parley sessions.
//!
//! A session has exactly one host. Every other participant is a client that
//! talks to the session through it:
//!
//! ```text
//!         ┌────────── host ──────────┐
//!         │  HostRole: one PeerLink  │
//!         │  per member + loopback   │
//!         └───┬──────────┬───────────┘
//!             │          │
//!        ClientRole  ClientRole      (a supervisor each)
//! ```
//!
//! Who hosts is settled by comparing [`HostPriority`] values
//! ([`RoleArbiter`]). The [`SessionHandle`] can hand the role over at any
//! time without dropping the transports between the two participants
//! involved; commands issued during the handoff are queued and replayed.
//!
//! # How it fits in the stack
//!
//! ```text
//! Lobby Layer (above)   ← launches sessions and hands them start packages
//!     ↕
//! Role Layer (this crate)
//!     ↕
//! Transport Layer (below) ← PeerLink, ConnectionSupervisor
//! ```

mod config;
mod error;
mod priority;
mod roles;
mod session;

pub use config::{SessionConfig, SessionIdentity};
pub use error::RoleError;
pub use priority::{Arrival, HostPriority, PriorityTier, Role, RoleArbiter};
pub use session::{MemberInfo, SessionEvent, SessionHandle, SessionSnapshot};
