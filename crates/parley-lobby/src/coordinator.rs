//! The launch coordinator: votes, countdowns and commits.
//!
//! A plain state machine with no I/O and no clock of its own. Every
//! operation returns the [`LobbyEvent`]s it caused; the lobby actor
//! broadcasts them and drives [`LaunchCoordinator::tick`] once a second
//! while a countdown is running.

use std::collections::{BTreeMap, HashSet};

use parley_protocol::{
    ConfigId, Launch, ParticipantId, PeerMessage, RosterEntry, SessionId, SessionStartPackage,
    TokenGrant, TransportDescription,
};
use parley_role::{HostPriority, RoleArbiter};

use crate::{CountdownRecord, LaunchConfig, LobbyError, RecordId, RecordStatus};

/// Something observers of the lobby should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    MemberJoined { participant: ParticipantId, name: String },
    MemberLeft { participant: ParticipantId },
    Renamed { participant: ParticipantId, name: String },
    SpectatorChanged { participant: ParticipantId, spectator: bool },
    VoteChanged {
        config: ConfigId,
        participant: ParticipantId,
        enabled: bool,
        votes: usize,
    },
    TokenChanged {
        config: ConfigId,
        participant: ParticipantId,
        granted: bool,
    },
    CountdownStarted { config: ConfigId, record: RecordId, secs: u32 },
    CountdownTick { config: ConfigId, remaining: u32 },
    CountdownHalted { config: ConfigId, waiting_on: Vec<ParticipantId> },
    CountdownResumed { config: ConfigId, remaining: u32 },
    /// The record fell below quorum or ran out of halt grace.
    CountdownStopped { config: ConfigId, record: RecordId },
    /// One per lobby member on every commit.
    Outcome { participant: ParticipantId, launch: Launch },
    /// Follows the outcomes of a commit.
    Committed { record: RecordId, package: SessionStartPackage },
}

/// A participant in the lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyMember {
    pub participant: ParticipantId,
    pub name: String,
    /// Decides who hosts a launched session.
    pub priority: HostPriority,
    pub spectator: bool,
    pub reachable: bool,
    /// Where the launched session can reach this participant.
    pub address: Option<String>,
    tokens: BTreeMap<ConfigId, String>,
}

impl LobbyMember {
    pub fn has_token(&self, config: ConfigId) -> bool {
        self.tokens.contains_key(&config)
    }
}

type Events = Result<Vec<LobbyEvent>, LobbyError>;

pub struct LaunchCoordinator {
    session: SessionId,
    halt_grace_secs: u32,
    configs: BTreeMap<ConfigId, LaunchConfig>,
    /// In join order.
    members: Vec<LobbyMember>,
    records: BTreeMap<ConfigId, CountdownRecord>,
    committed: HashSet<RecordId>,
    next_record: u64,
}

impl LaunchCoordinator {
    pub fn new(
        session: SessionId,
        configs: impl IntoIterator<Item = LaunchConfig>,
        halt_grace_secs: u32,
    ) -> Self {
        Self {
            session,
            halt_grace_secs: halt_grace_secs.max(1),
            configs: configs
                .into_iter()
                .map(|c| {
                    let c = c.validated();
                    (c.id, c)
                })
                .collect(),
            members: Vec::new(),
            records: BTreeMap::new(),
            committed: HashSet::new(),
            next_record: 1,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn config(&self, id: ConfigId) -> Option<&LaunchConfig> {
        self.configs.get(&id)
    }

    pub fn configs(&self) -> impl Iterator<Item = &LaunchConfig> {
        self.configs.values()
    }

    pub fn members(&self) -> &[LobbyMember] {
        &self.members
    }

    pub fn member(&self, participant: ParticipantId) -> Option<&LobbyMember> {
        self.members.iter().find(|m| m.participant == participant)
    }

    pub fn record(&self, config: ConfigId) -> Option<&CountdownRecord> {
        self.records.get(&config)
    }

    pub fn records(&self) -> impl Iterator<Item = &CountdownRecord> {
        self.records.values()
    }

    /// Whether a countdown holds the lobby clock.
    pub fn is_counting(&self) -> bool {
        self.records.values().any(|r| r.status().holds_countdown())
    }

    // -- membership ---------------------------------------------------------

    pub fn join(
        &mut self,
        participant: ParticipantId,
        name: impl Into<String>,
        priority: HostPriority,
        address: Option<String>,
    ) -> Events {
        if self.member(participant).is_some() {
            return Err(LobbyError::AlreadyMember(participant));
        }
        let name = name.into();
        self.members.push(LobbyMember {
            participant,
            name: name.clone(),
            priority,
            spectator: false,
            reachable: true,
            address,
            tokens: BTreeMap::new(),
        });
        tracing::info!(%participant, %name, members = self.members.len(), "lobby member joined");
        Ok(vec![LobbyEvent::MemberJoined { participant, name }])
    }

    /// Removes a member, withdrawing every vote they held.
    pub fn leave(&mut self, participant: ParticipantId) -> Events {
        self.require_member(participant)?;
        let mut events = Vec::new();
        self.withdraw_all(participant, &mut events);
        self.members.retain(|m| m.participant != participant);
        tracing::info!(%participant, members = self.members.len(), "lobby member left");
        events.push(LobbyEvent::MemberLeft { participant });
        self.reevaluate(&mut events);
        Ok(events)
    }

    pub fn rename(&mut self, participant: ParticipantId, name: impl Into<String>) -> Events {
        let name = name.into();
        let member = self.member_mut(participant)?;
        if member.name == name {
            return Ok(Vec::new());
        }
        member.name = name.clone();
        Ok(vec![LobbyEvent::Renamed { participant, name }])
    }

    /// Spectators never count toward a quorum; becoming one withdraws
    /// every vote.
    pub fn set_spectator(&mut self, participant: ParticipantId, spectator: bool) -> Events {
        let member = self.member_mut(participant)?;
        if member.spectator == spectator {
            return Ok(Vec::new());
        }
        member.spectator = spectator;
        let mut events = vec![LobbyEvent::SpectatorChanged { participant, spectator }];
        if spectator {
            self.withdraw_all(participant, &mut events);
            self.reevaluate(&mut events);
        }
        Ok(events)
    }

    /// Marks a member reachable or not. Running countdowns halt while any of
    /// their included voters is unreachable.
    pub fn set_reachable(&mut self, participant: ParticipantId, reachable: bool) -> Events {
        let member = self.member_mut(participant)?;
        if member.reachable == reachable {
            return Ok(Vec::new());
        }
        member.reachable = reachable;
        tracing::debug!(%participant, reachable, "member reachability changed");
        let mut events = Vec::new();
        self.reevaluate(&mut events);
        Ok(events)
    }

    // -- voting -------------------------------------------------------------

    /// Idempotent: voting twice for the same configuration is one vote.
    pub fn vote(&mut self, participant: ParticipantId, config: ConfigId) -> Events {
        let member = self.require_member(participant)?;
        if member.spectator {
            return Err(LobbyError::Spectator(participant));
        }
        let launch = self
            .configs
            .get(&config)
            .ok_or(LobbyError::UnknownConfig(config))?;
        if launch.requires_token && !member.has_token(config) {
            return Err(LobbyError::TokenRequired { config, participant });
        }

        let next_record = &mut self.next_record;
        let record = self.records.entry(config).or_insert_with(|| {
            let id = RecordId(*next_record);
            *next_record += 1;
            tracing::debug!(record = %id, %config, "countdown record created");
            CountdownRecord::new(id, config)
        });
        if !record.vote(participant) {
            return Ok(Vec::new());
        }
        let mut events = vec![LobbyEvent::VoteChanged {
            config,
            participant,
            enabled: true,
            votes: record.vote_count(),
        }];
        self.reevaluate(&mut events);
        Ok(events)
    }

    /// Idempotent. The last vote withdrawn destroys the record.
    pub fn unvote(&mut self, participant: ParticipantId, config: ConfigId) -> Events {
        self.require_member(participant)?;
        if !self.configs.contains_key(&config) {
            return Err(LobbyError::UnknownConfig(config));
        }
        let mut events = Vec::new();
        self.withdraw(participant, config, &mut events);
        self.reevaluate(&mut events);
        Ok(events)
    }

    pub fn set_vote(&mut self, participant: ParticipantId, config: ConfigId, enabled: bool) -> Events {
        if enabled {
            self.vote(participant, config)
        } else {
            self.unvote(participant, config)
        }
    }

    /// Grants or revokes a member's token for a configuration. Revoking
    /// withdraws their vote for it.
    pub fn grant(&mut self, participant: ParticipantId, config: ConfigId, grant: TokenGrant) -> Events {
        if !self.configs.contains_key(&config) {
            return Err(LobbyError::UnknownConfig(config));
        }
        let member = self.member_mut(participant)?;
        let mut events = Vec::new();
        match grant {
            TokenGrant::Token(token) => {
                member.tokens.insert(config, token);
                events.push(LobbyEvent::TokenChanged { config, participant, granted: true });
            }
            TokenGrant::Revoke => {
                if member.tokens.remove(&config).is_some() {
                    events.push(LobbyEvent::TokenChanged { config, participant, granted: false });
                }
                if self.configs.get(&config).is_some_and(|c| c.requires_token) {
                    self.withdraw(participant, config, &mut events);
                    self.reevaluate(&mut events);
                }
            }
        }
        Ok(events)
    }

    /// Applies a lobby message received from `from`. Messages that mean
    /// nothing to the lobby are ignored.
    pub fn apply(&mut self, from: ParticipantId, message: &PeerMessage) -> Events {
        match message {
            PeerMessage::Vote { config, enabled } => self.set_vote(from, *config, *enabled),
            PeerMessage::AuthToken { config, grant } => self.grant(from, *config, grant.clone()),
            PeerMessage::PlayerName { participant, name } if self.member(*participant).is_some() => {
                self.rename(*participant, name.clone())
            }
            PeerMessage::Spectator { participant } if self.member(*participant).is_some() => {
                self.set_spectator(*participant, true)
            }
            PeerMessage::Quit if self.member(from).is_some() => self.leave(from),
            _ => Ok(Vec::new()),
        }
    }

    // -- clock --------------------------------------------------------------

    /// Advances the running countdown by one second.
    pub fn tick(&mut self) -> Vec<LobbyEvent> {
        let mut events = Vec::new();
        let mut due = None;
        let mut expired = None;

        for record in self.records.values_mut() {
            match record.status() {
                RecordStatus::Active => {
                    if record.tick_countdown() {
                        due = Some(record.id());
                    } else {
                        events.push(LobbyEvent::CountdownTick {
                            config: record.config(),
                            remaining: record.remaining_secs(),
                        });
                    }
                }
                RecordStatus::Halted => {
                    if record.tick_grace() {
                        expired = Some(record.config());
                    }
                }
                RecordStatus::None | RecordStatus::Unused => {}
            }
        }

        if let Some(config) = expired {
            if let Some(record) = self.records.remove(&config) {
                tracing::warn!(record = %record.id(), %config, "halt grace expired; countdown destroyed");
                events.push(LobbyEvent::CountdownStopped { config, record: record.id() });
            }
            self.reevaluate(&mut events);
        }

        if let Some(id) = due {
            match self.commit(id) {
                Ok(mut committed) => events.append(&mut committed),
                Err(e) => tracing::error!(record = %id, error = %e, "countdown could not commit"),
            }
        }
        events
    }

    /// Runs up to `secs` one-second ticks, stopping early once nothing
    /// is counting down.
    pub fn advance(&mut self, secs: u64) -> Vec<LobbyEvent> {
        let mut events = Vec::new();
        for _ in 0..secs {
            if !self.is_counting() {
                break;
            }
            events.append(&mut self.tick());
        }
        events
    }

    /// Host override: commits the running countdown for `config` now.
    pub fn launch_now(&mut self, config: ConfigId) -> Events {
        let record = self.records.get(&config).ok_or(LobbyError::NotActive(config))?;
        if record.status() != RecordStatus::Active {
            return Err(LobbyError::NotActive(config));
        }
        self.commit(record.id())
    }

    /// Commits an active record: fixes the roster, picks the host, emits
    /// one outcome per member and destroys the record.
    pub fn commit(&mut self, id: RecordId) -> Events {
        if self.committed.contains(&id) {
            tracing::error!(record = %id, "countdown record committed twice");
            return Err(LobbyError::AlreadyCommitted(id));
        }
        let record = self
            .records
            .values()
            .find(|r| r.id() == id)
            .ok_or(LobbyError::UnknownRecord(id))?;
        let config_id = record.config();
        if record.status() != RecordStatus::Active {
            return Err(LobbyError::NotActive(config_id));
        }
        let config = self
            .configs
            .get(&config_id)
            .ok_or(LobbyError::UnknownConfig(config_id))?;

        let included: Vec<&LobbyMember> = record
            .votes()
            .iter()
            .filter_map(|p| self.member(*p))
            .take(config.max_participants)
            .collect();
        let host = RoleArbiter::winner(included.iter().map(|m| m.priority))
            .ok_or(LobbyError::NotActive(config_id))?;

        let package = SessionStartPackage {
            session: SessionId::random(),
            config: config_id,
            host,
            roster: included
                .iter()
                .map(|m| RosterEntry {
                    participant: m.participant,
                    name: m.name.clone(),
                })
                .collect(),
            transports: included
                .iter()
                .map(|m| TransportDescription {
                    participant: m.participant,
                    address: m.address.clone(),
                })
                .collect(),
            absentees: self
                .members
                .iter()
                .map(|m| m.participant)
                .filter(|p| !included.iter().any(|m| m.participant == *p))
                .collect(),
        };
        let included: Vec<ParticipantId> = package.roster_ids();

        self.records.remove(&config_id);
        self.committed.insert(id);

        let mut events: Vec<LobbyEvent> = self
            .members
            .iter()
            .map(|m| {
                let launch = if m.participant == host {
                    Launch::Host { package: package.clone() }
                } else if included.contains(&m.participant) {
                    Launch::Client { package: package.clone() }
                } else {
                    Launch::Absent { config: config_id }
                };
                LobbyEvent::Outcome {
                    participant: m.participant,
                    launch,
                }
            })
            .collect();

        tracing::info!(
            record = %id,
            config = %config_id,
            %host,
            session = %package.session,
            included = included.len(),
            absent = package.absentees.len(),
            "countdown committed"
        );
        events.push(LobbyEvent::Committed { record: id, package });

        for participant in included {
            self.withdraw_all(participant, &mut events);
        }
        self.reevaluate(&mut events);
        Ok(events)
    }

    // -- internals ----------------------------------------------------------

    fn require_member(&self, participant: ParticipantId) -> Result<&LobbyMember, LobbyError> {
        self.member(participant)
            .ok_or(LobbyError::UnknownParticipant(participant))
    }

    fn member_mut(&mut self, participant: ParticipantId) -> Result<&mut LobbyMember, LobbyError> {
        self.members
            .iter_mut()
            .find(|m| m.participant == participant)
            .ok_or(LobbyError::UnknownParticipant(participant))
    }

    fn withdraw(&mut self, participant: ParticipantId, config: ConfigId, events: &mut Vec<LobbyEvent>) {
        let Some(record) = self.records.get_mut(&config) else {
            return;
        };
        if !record.unvote(participant) {
            return;
        }
        events.push(LobbyEvent::VoteChanged {
            config,
            participant,
            enabled: false,
            votes: record.vote_count(),
        });
        if record.vote_count() == 0 {
            let id = record.id();
            if record.status().holds_countdown() {
                events.push(LobbyEvent::CountdownStopped { config, record: id });
            }
            self.records.remove(&config);
            tracing::debug!(record = %id, %config, "countdown record destroyed");
        }
    }

    fn withdraw_all(&mut self, participant: ParticipantId, events: &mut Vec<LobbyEvent>) {
        let voted: Vec<ConfigId> = self
            .records
            .values()
            .filter(|r| r.has_vote(participant))
            .map(|r| r.config())
            .collect();
        for config in voted {
            self.withdraw(participant, config, events);
        }
    }

    /// Brings every record's status in line with its votes and its voters'
    /// reachability.
    fn reevaluate(&mut self, events: &mut Vec<LobbyEvent>) {
        for record in self.records.values_mut() {
            let Some(config) = self.configs.get(&record.config()) else {
                continue;
            };
            if record.vote_count() < config.quorum && record.status() != RecordStatus::None {
                if record.status().holds_countdown() {
                    tracing::info!(record = %record.id(), config = %config.id, "countdown stopped below quorum");
                    events.push(LobbyEvent::CountdownStopped {
                        config: config.id,
                        record: record.id(),
                    });
                }
                record.set_status(RecordStatus::None);
            }
        }

        let mut counting = self.is_counting();
        let mut waiting: Vec<&mut CountdownRecord> = self.records.values_mut().collect();
        waiting.sort_by_key(|r| r.id());
        for record in waiting {
            let Some(config) = self.configs.get(&record.config()) else {
                continue;
            };
            if record.vote_count() < config.quorum || record.status().holds_countdown() {
                continue;
            }
            if !counting {
                record.activate(config.countdown_secs);
                counting = true;
                tracing::info!(record = %record.id(), config = %config.id, secs = config.countdown_secs, "countdown started");
                events.push(LobbyEvent::CountdownStarted {
                    config: config.id,
                    record: record.id(),
                    secs: config.countdown_secs,
                });
            } else if record.status() == RecordStatus::None {
                record.set_status(RecordStatus::Unused);
            }
        }

        for record in self.records.values_mut() {
            let Some(config) = self.configs.get(&record.config()) else {
                continue;
            };
            let unreachable = unreachable_voters(&self.members, record, config.max_participants);
            match record.status() {
                RecordStatus::Active if !unreachable.is_empty() => {
                    record.halt(self.halt_grace_secs);
                    tracing::info!(record = %record.id(), waiting = unreachable.len(), "countdown halted");
                    events.push(LobbyEvent::CountdownHalted {
                        config: config.id,
                        waiting_on: unreachable,
                    });
                }
                RecordStatus::Halted if unreachable.is_empty() => {
                    record.set_status(RecordStatus::Active);
                    tracing::info!(record = %record.id(), "countdown resumed");
                    events.push(LobbyEvent::CountdownResumed {
                        config: config.id,
                        remaining: record.remaining_secs(),
                    });
                }
                _ => {}
            }
        }
    }
}

/// Included voters of `record` that cannot currently be reached.
fn unreachable_voters(
    members: &[LobbyMember],
    record: &CountdownRecord,
    max_participants: usize,
) -> Vec<ParticipantId> {
    record
        .votes()
        .iter()
        .filter_map(|p| members.iter().find(|m| m.participant == *p))
        .take(max_participants)
        .filter(|m| !m.reachable)
        .map(|m| m.participant)
        .collect()
}

#[cfg(test)]
mod tests {
    use parley_role::PriorityTier;

    use super::*;

    const DUEL: ConfigId = ConfigId(1);
    const FFA: ConfigId = ConfigId(2);

    fn p(n: u64) -> ParticipantId {
        ParticipantId(n)
    }

    fn coordinator() -> LaunchCoordinator {
        let duel = LaunchConfig {
            quorum: 2,
            max_participants: 2,
            countdown_secs: 3,
            ..LaunchConfig::new(DUEL, "duel")
        };
        let ffa = LaunchConfig {
            quorum: 3,
            max_participants: 4,
            countdown_secs: 3,
            ..LaunchConfig::new(FFA, "ffa")
        };
        let mut c = LaunchCoordinator::new(SessionId(1), [duel, ffa], 2);
        for n in 1..=4 {
            let priority = HostPriority::from_parts(n as u32 * 10, p(n));
            c.join(p(n), format!("p{n}"), priority, None).unwrap();
        }
        c
    }

    fn status(c: &LaunchCoordinator, config: ConfigId) -> Option<RecordStatus> {
        c.record(config).map(|r| r.status())
    }

    #[test]
    fn test_vote_twice_is_one_vote() {
        let mut c = coordinator();
        assert_eq!(c.vote(p(1), DUEL).unwrap().len(), 1);
        assert!(c.vote(p(1), DUEL).unwrap().is_empty());
        assert_eq!(c.record(DUEL).unwrap().vote_count(), 1);
    }

    #[test]
    fn test_vote_then_unvote_leaves_no_record() {
        let mut c = coordinator();
        c.vote(p(1), DUEL).unwrap();
        c.unvote(p(1), DUEL).unwrap();
        assert!(c.record(DUEL).is_none());
        // unvote without a vote is a no-op
        assert!(c.unvote(p(1), DUEL).unwrap().is_empty());
    }

    #[test]
    fn test_quorum_activates_countdown() {
        let mut c = coordinator();
        c.vote(p(1), DUEL).unwrap();
        assert_eq!(status(&c, DUEL), Some(RecordStatus::None));
        let events = c.vote(p(2), DUEL).unwrap();
        assert!(events.iter().any(|e| matches!(e, LobbyEvent::CountdownStarted { secs: 3, .. })));
        assert_eq!(status(&c, DUEL), Some(RecordStatus::Active));
        assert!(c.is_counting());
    }

    #[test]
    fn test_second_quorum_waits_as_unused() {
        let mut c = coordinator();
        c.vote(p(1), DUEL).unwrap();
        c.vote(p(2), DUEL).unwrap();
        for n in [1, 3, 4] {
            c.vote(p(n), FFA).unwrap();
        }
        assert_eq!(status(&c, FFA), Some(RecordStatus::Unused));

        // Duel falls below quorum: ffa takes over the countdown.
        c.unvote(p(2), DUEL).unwrap();
        assert_eq!(status(&c, DUEL), Some(RecordStatus::None));
        assert_eq!(status(&c, FFA), Some(RecordStatus::Active));
    }

    #[test]
    fn test_commit_emits_one_outcome_per_member() {
        let mut c = coordinator();
        c.vote(p(1), DUEL).unwrap();
        c.vote(p(2), DUEL).unwrap();
        c.vote(p(3), DUEL).unwrap();
        c.set_spectator(p(4), true).unwrap();

        let mut events = Vec::new();
        for _ in 0..3 {
            events.extend(c.tick());
        }

        let outcomes: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                LobbyEvent::Outcome { participant, launch } => Some((*participant, launch.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(outcomes.len(), 4);

        // capped at two, in vote order; p2 has the higher priority
        let package = match &outcomes[1].1 {
            Launch::Host { package } => package.clone(),
            other => panic!("p2 should host, got {other:?}"),
        };
        assert_eq!(package.host, p(2));
        assert_eq!(package.roster_ids(), vec![p(1), p(2)]);
        assert_eq!(package.absentees, vec![p(3), p(4)]);
        assert!(matches!(&outcomes[0].1, Launch::Client { package: pk } if *pk == package));
        assert!(matches!(outcomes[2].1, Launch::Absent { config: DUEL }));
        assert!(matches!(outcomes[3].1, Launch::Absent { config: DUEL }));

        assert!(c.record(DUEL).is_none());
        assert!(!c.is_counting());
    }

    #[test]
    fn test_advance_catches_up_missed_seconds() {
        let mut c = coordinator();
        c.vote(p(1), DUEL).unwrap();
        c.vote(p(2), DUEL).unwrap();

        let events = c.advance(2);
        assert!(events.contains(&LobbyEvent::CountdownTick { config: DUEL, remaining: 1 }));
        assert_eq!(c.record(DUEL).unwrap().remaining_secs(), 1);

        // Only one second is left; the rest of the stall is dropped.
        let events = c.advance(5);
        let outcomes = events.iter().filter(|e| matches!(e, LobbyEvent::Outcome { .. })).count();
        assert_eq!(outcomes, 4);
        assert!(c.advance(3).is_empty());
    }

    #[test]
    fn test_commit_clears_votes_in_every_record() {
        let mut c = coordinator();
        c.vote(p(1), FFA).unwrap();
        c.vote(p(1), DUEL).unwrap();
        c.vote(p(2), DUEL).unwrap();

        c.launch_now(DUEL).unwrap();

        assert!(c.record(FFA).is_none());
        assert!(c.record(DUEL).is_none());
    }

    #[test]
    fn test_committing_twice_fails() {
        let mut c = coordinator();
        c.vote(p(1), DUEL).unwrap();
        c.vote(p(2), DUEL).unwrap();
        let id = c.record(DUEL).unwrap().id();

        c.commit(id).unwrap();
        assert!(matches!(c.commit(id), Err(LobbyError::AlreadyCommitted(r)) if r == id));
    }

    #[test]
    fn test_new_record_after_commit_gets_new_id() {
        let mut c = coordinator();
        c.vote(p(1), DUEL).unwrap();
        c.vote(p(2), DUEL).unwrap();
        let first = c.record(DUEL).unwrap().id();
        c.launch_now(DUEL).unwrap();

        c.vote(p(3), DUEL).unwrap();
        assert_ne!(c.record(DUEL).unwrap().id(), first);
    }

    #[test]
    fn test_unreachable_voter_halts_then_resumes() {
        let mut c = coordinator();
        c.vote(p(1), DUEL).unwrap();
        c.vote(p(2), DUEL).unwrap();
        c.tick();

        let events = c.set_reachable(p(2), false).unwrap();
        assert!(events.contains(&LobbyEvent::CountdownHalted { config: DUEL, waiting_on: vec![p(2)] }));
        assert_eq!(status(&c, DUEL), Some(RecordStatus::Halted));

        let events = c.set_reachable(p(2), true).unwrap();
        assert!(events.contains(&LobbyEvent::CountdownResumed { config: DUEL, remaining: 2 }));
    }

    #[test]
    fn test_halt_grace_expiry_destroys_record() {
        let mut c = coordinator();
        c.vote(p(1), DUEL).unwrap();
        c.vote(p(2), DUEL).unwrap();
        c.set_reachable(p(1), false).unwrap();

        c.tick();
        let events = c.tick();

        assert!(events.iter().any(|e| matches!(e, LobbyEvent::CountdownStopped { config: DUEL, .. })));
        assert!(c.record(DUEL).is_none());
        assert!(!c.is_counting());
    }

    #[test]
    fn test_token_required_for_vote() {
        let ranked = LaunchConfig {
            requires_token: true,
            ..LaunchConfig::new(ConfigId(7), "ranked")
        };
        let mut c = LaunchCoordinator::new(SessionId(1), [ranked], 5);
        let priority = HostPriority::roll(PriorityTier::MATCHED, p(1));
        c.join(p(1), "ann", priority, None).unwrap();

        assert!(matches!(c.vote(p(1), ConfigId(7)), Err(LobbyError::TokenRequired { .. })));

        c.grant(p(1), ConfigId(7), TokenGrant::Token("abc".into())).unwrap();
        c.vote(p(1), ConfigId(7)).unwrap();
        assert!(c.record(ConfigId(7)).is_some());

        c.grant(p(1), ConfigId(7), TokenGrant::Revoke).unwrap();
        assert!(c.record(ConfigId(7)).is_none());
    }

    #[test]
    fn test_leave_withdraws_votes() {
        let mut c = coordinator();
        c.vote(p(1), DUEL).unwrap();
        c.vote(p(2), DUEL).unwrap();

        let events = c.leave(p(2)).unwrap();
        assert!(events.iter().any(|e| matches!(e, LobbyEvent::CountdownStopped { .. })));
        assert_eq!(c.record(DUEL).unwrap().votes(), &[p(1)]);
        assert!(c.member(p(2)).is_none());
    }

    #[test]
    fn test_spectator_cannot_vote() {
        let mut c = coordinator();
        c.set_spectator(p(3), true).unwrap();
        assert!(matches!(c.vote(p(3), DUEL), Err(LobbyError::Spectator(_))));
    }

    #[test]
    fn test_apply_vote_message() {
        let mut c = coordinator();
        c.apply(p(1), &PeerMessage::Vote { config: DUEL, enabled: true }).unwrap();
        assert!(c.record(DUEL).unwrap().has_vote(p(1)));
        c.apply(p(1), &PeerMessage::Vote { config: DUEL, enabled: false }).unwrap();
        assert!(c.record(DUEL).is_none());
        assert!(c.apply(p(1), &PeerMessage::Go).unwrap().is_empty());
    }
}
