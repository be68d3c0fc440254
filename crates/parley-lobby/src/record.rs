//! Countdown records: one per configuration with at least one vote.

use std::fmt;

use parley_protocol::{ConfigId, ParticipantId};
use parley_tick::Countdown;

/// Identifies one countdown record. Never reused within a lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// Where a record stands relative to its quorum.
///
/// ```text
///          quorum reached            voter unreachable
///   None ─────────────────→ Active ─────────────────→ Halted
///    ↑ │ quorum reached,      ↑  ←───────────────────   │
///    │ │ another counting     │    all voters back       │ grace expired
///    │ └──────────→ Unused ───┘                          ▼
///    │                │  other record destroyed      (destroyed)
///    └────────────────┘
///      below quorum
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordStatus {
    /// Collecting votes.
    None,
    /// Counting down to commit.
    Active,
    /// Counting paused; waiting for voters to become reachable.
    Halted,
    /// At quorum, but another record holds the countdown.
    Unused,
}

impl RecordStatus {
    /// Holds the lobby's single countdown slot.
    pub fn holds_countdown(self) -> bool {
        matches!(self, Self::Active | Self::Halted)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Active => write!(f, "Active"),
            Self::Halted => write!(f, "Halted"),
            Self::Unused => write!(f, "Unused"),
        }
    }
}

/// Votes and countdown state for one configuration.
#[derive(Debug, Clone)]
pub struct CountdownRecord {
    id: RecordId,
    config: ConfigId,
    status: RecordStatus,
    /// In the order the votes arrived.
    votes: Vec<ParticipantId>,
    countdown: Countdown,
    grace: Countdown,
}

impl CountdownRecord {
    pub(crate) fn new(id: RecordId, config: ConfigId) -> Self {
        Self {
            id,
            config,
            status: RecordStatus::None,
            votes: Vec::new(),
            countdown: Countdown::new(0),
            grace: Countdown::new(0),
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn config(&self) -> ConfigId {
        self.config
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn votes(&self) -> &[ParticipantId] {
        &self.votes
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    pub fn has_vote(&self, participant: ParticipantId) -> bool {
        self.votes.contains(&participant)
    }

    /// Seconds left on the countdown. Meaningless unless the record holds
    /// the countdown.
    pub fn remaining_secs(&self) -> u32 {
        self.countdown.remaining()
    }

    /// Returns `true` if the vote was new.
    pub(crate) fn vote(&mut self, participant: ParticipantId) -> bool {
        if self.has_vote(participant) {
            return false;
        }
        self.votes.push(participant);
        true
    }

    /// Returns `true` if there was a vote to withdraw.
    pub(crate) fn unvote(&mut self, participant: ParticipantId) -> bool {
        let before = self.votes.len();
        self.votes.retain(|p| *p != participant);
        self.votes.len() != before
    }

    pub(crate) fn activate(&mut self, countdown_secs: u32) {
        self.status = RecordStatus::Active;
        self.countdown.reset(countdown_secs);
    }

    pub(crate) fn set_status(&mut self, status: RecordStatus) {
        self.status = status;
    }

    pub(crate) fn halt(&mut self, grace_secs: u32) {
        self.status = RecordStatus::Halted;
        self.grace.reset(grace_secs);
    }

    /// One second of countdown. Returns `true` when it reaches zero.
    pub(crate) fn tick_countdown(&mut self) -> bool {
        self.countdown.tick()
    }

    /// One second of halt grace. Returns `true` when the grace runs out.
    pub(crate) fn tick_grace(&mut self) -> bool {
        self.grace.tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CountdownRecord {
        CountdownRecord::new(RecordId(1), ConfigId(3))
    }

    #[test]
    fn test_vote_is_idempotent() {
        let mut r = record();
        assert!(r.vote(ParticipantId(1)));
        assert!(!r.vote(ParticipantId(1)));
        assert_eq!(r.vote_count(), 1);
    }

    #[test]
    fn test_unvote_without_vote_is_noop() {
        let mut r = record();
        assert!(!r.unvote(ParticipantId(1)));
        r.vote(ParticipantId(1));
        assert!(r.unvote(ParticipantId(1)));
        assert_eq!(r.vote_count(), 0);
    }

    #[test]
    fn test_votes_keep_arrival_order() {
        let mut r = record();
        for p in [3, 1, 2] {
            r.vote(ParticipantId(p));
        }
        r.unvote(ParticipantId(1));
        r.vote(ParticipantId(1));
        assert_eq!(r.votes(), &[ParticipantId(3), ParticipantId(2), ParticipantId(1)]);
    }

    #[test]
    fn test_countdown_reaches_zero_once() {
        let mut r = record();
        r.activate(2);
        assert_eq!(r.status(), RecordStatus::Active);
        assert!(!r.tick_countdown());
        assert!(r.tick_countdown());
        assert!(!r.tick_countdown());
    }

    #[test]
    fn test_halt_grace_runs_out() {
        let mut r = record();
        r.activate(5);
        r.halt(1);
        assert_eq!(r.status(), RecordStatus::Halted);
        assert!(r.status().holds_countdown());
        assert!(r.tick_grace());
        // countdown untouched while halted
        assert_eq!(r.remaining_secs(), 5);
    }
}
