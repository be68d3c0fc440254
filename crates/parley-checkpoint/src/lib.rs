//! Resumable session snapshots for Parley.
//!
//! Each key (one per game run) has a durable primary save, an optional
//! ephemeral shadow save that [`CheckpointStore::load`] prefers, and a
//! separate namespace of numbered checkpoints.
//!
//! ```text
//!   save ───────────────→ primary ←── commit_ephemeral ─┐
//!   save_ephemeral ─────→ shadow ────── discard ──→ ✗   │
//!                           └───────────────────────────┘
//!   save_checkpoint(i) ─→ checkpoint-i
//! ```
//!
//! A session resumes through [`CheckpointStore::begin`]: `Continue` and
//! `Replay(i)` replace the live [`ResultSummary`], `Rewind(i)` applies the
//! checkpoint's results as a delta over it.

mod backend;
mod config;
mod error;
mod record;
mod store;

pub use backend::{CheckpointBackend, FileBackend, MemoryBackend};
pub use config::CheckpointConfig;
pub use error::CheckpointError;
pub use record::{CheckpointRecord, ResultSummary, Slot};
pub use store::{CheckpointStore, Resolution, ResolutionTicket};
