//! Host priority and the arbitration rule.
//!
//! Every participant rolls a [`HostPriority`] when its session starts. When
//! two participants disagree about who hosts, they swap priorities
//! (`HostBid`) and both apply [`RoleArbiter::decide`]. Because the
//! comparison is a strict total order, both sides reach the same answer
//! without a further round trip.

use std::cmp::Ordering;
use std::fmt;

use parley_protocol::ParticipantId;
use rand::Rng;

/// The two roles a participant can play in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("Host"),
            Self::Client => f.write_str("Client"),
        }
    }
}

/// In what order this participant reached the rendezvous service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Arrival {
    /// Got a promise: arrived first and waited for a partner.
    First,
    /// Got a match straight away.
    #[default]
    Matched,
}

/// The coarse part of a host priority.
///
/// ```text
/// tier 3  already flipped once, currently Host   (stay host)
/// tier 2  arrived first at rendezvous
/// tier 1  matched on arrival
/// tier 0  already flipped once, currently Client (stay client)
/// ```
///
/// A participant that has changed roles once is pinned to the extremes, so
/// two peers cannot keep flipping against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriorityTier(u8);

impl PriorityTier {
    pub const STICKY_CLIENT: Self = Self(0);
    pub const MATCHED: Self = Self(1);
    pub const FIRST: Self = Self(2);
    pub const STICKY_HOST: Self = Self(3);

    pub fn from_arrival(arrival: Arrival, flipped_once: bool, current: Role) -> Self {
        match (flipped_once, current, arrival) {
            (true, Role::Host, _) => Self::STICKY_HOST,
            (true, Role::Client, _) => Self::STICKY_CLIENT,
            (false, _, Arrival::First) => Self::FIRST,
            (false, _, Arrival::Matched) => Self::MATCHED,
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

/// `tier * 100000 + uniform(0..100000)`, tie-broken by participant id.
///
/// Relational only: never persisted, rolled afresh per session and per
/// role flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostPriority {
    value: u32,
    participant: ParticipantId,
}

impl HostPriority {
    pub const TIER_SPAN: u32 = 100_000;

    /// Rolls a fresh priority in `tier`.
    pub fn roll(tier: PriorityTier, participant: ParticipantId) -> Self {
        let jitter = rand::rng().random_range(0..Self::TIER_SPAN);
        Self::from_parts(u32::from(tier.value()) * Self::TIER_SPAN + jitter, participant)
    }

    /// Rebuilds a priority received in a `HostBid`.
    pub fn from_parts(value: u32, participant: ParticipantId) -> Self {
        Self { value, participant }
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    pub fn tier(&self) -> PriorityTier {
        PriorityTier((self.value / Self::TIER_SPAN).min(u32::from(u8::MAX)) as u8)
    }
}

impl Ord for HostPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .cmp(&other.value)
            .then_with(|| self.participant.cmp(&other.participant))
    }
}

impl PartialOrd for HostPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Applies the arbitration rule: the higher priority hosts.
pub struct RoleArbiter;

impl RoleArbiter {
    /// The role `local` should take against `remote`.
    pub fn decide(local: HostPriority, remote: HostPriority) -> Role {
        if local >= remote { Role::Host } else { Role::Client }
    }

    /// The participant that should host among `bids`.
    pub fn winner(bids: impl IntoIterator<Item = HostPriority>) -> Option<ParticipantId> {
        bids.into_iter().max().map(|p| p.participant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_arrival_tiers() {
        assert_eq!(
            PriorityTier::from_arrival(Arrival::First, false, Role::Client),
            PriorityTier::FIRST
        );
        assert_eq!(
            PriorityTier::from_arrival(Arrival::Matched, false, Role::Host),
            PriorityTier::MATCHED
        );
        assert_eq!(
            PriorityTier::from_arrival(Arrival::First, true, Role::Client),
            PriorityTier::STICKY_CLIENT
        );
        assert_eq!(
            PriorityTier::from_arrival(Arrival::Matched, true, Role::Host),
            PriorityTier::STICKY_HOST
        );
    }

    #[test]
    fn test_roll_stays_inside_its_tier() {
        for _ in 0..200 {
            let p = HostPriority::roll(PriorityTier::FIRST, ParticipantId(1));
            assert_eq!(p.tier(), PriorityTier::FIRST);
            assert!(p.value() >= 200_000 && p.value() < 300_000);
        }
    }

    #[test]
    fn test_higher_tier_always_wins() {
        for _ in 0..200 {
            let first = HostPriority::roll(PriorityTier::FIRST, ParticipantId(1));
            let matched = HostPriority::roll(PriorityTier::MATCHED, ParticipantId(2));
            assert_eq!(RoleArbiter::decide(first, matched), Role::Host);
            assert_eq!(RoleArbiter::decide(matched, first), Role::Client);
        }
    }

    #[test]
    fn test_equal_values_tie_break_on_participant() {
        let a = HostPriority::from_parts(150_000, ParticipantId(1));
        let b = HostPriority::from_parts(150_000, ParticipantId(2));
        assert_eq!(RoleArbiter::decide(a, b), Role::Client);
        assert_eq!(RoleArbiter::decide(b, a), Role::Host);
    }

    #[test]
    fn test_decide_is_strict_for_equal_tiers() {
        // Exactly one side hosts, whatever the roll.
        for _ in 0..500 {
            let a = HostPriority::roll(PriorityTier::MATCHED, ParticipantId(10));
            let b = HostPriority::roll(PriorityTier::MATCHED, ParticipantId(20));
            let hosts = [RoleArbiter::decide(a, b), RoleArbiter::decide(b, a)]
                .into_iter()
                .filter(|r| *r == Role::Host)
                .count();
            assert_eq!(hosts, 1);
        }
    }

    #[test]
    fn test_winner_picks_maximum() {
        let bids = [
            HostPriority::from_parts(10, ParticipantId(1)),
            HostPriority::from_parts(30, ParticipantId(2)),
            HostPriority::from_parts(20, ParticipantId(3)),
        ];
        assert_eq!(RoleArbiter::winner(bids), Some(ParticipantId(2)));
        assert_eq!(RoleArbiter::winner([]), None);
    }
}
