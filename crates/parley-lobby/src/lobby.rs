//! Lobby actor: a Tokio task that owns a [`LaunchCoordinator`] and the
//! one-second clock that drives its countdowns.
//!
//! The clock only runs while a record holds the countdown; every command
//! re-checks that after it has been applied.

use std::time::Duration;

use parley_protocol::{ConfigId, ParticipantId, PeerMessage, SessionId, TokenGrant};
use parley_role::HostPriority;
use parley_tick::{TickClock, TickConfig};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    CountdownRecord, LaunchConfig, LaunchCoordinator, LobbyConfig, LobbyError, LobbyEvent,
    LobbyMember,
};

type Reply<T = ()> = oneshot::Sender<Result<T, LobbyError>>;

enum LobbyCommand {
    Join {
        participant: ParticipantId,
        name: String,
        priority: HostPriority,
        address: Option<String>,
        reply: Reply,
    },
    Leave {
        participant: ParticipantId,
        reply: Reply,
    },
    Rename {
        participant: ParticipantId,
        name: String,
        reply: Reply,
    },
    SetSpectator {
        participant: ParticipantId,
        spectator: bool,
        reply: Reply,
    },
    SetReachable {
        participant: ParticipantId,
        reachable: bool,
        reply: Reply,
    },
    Vote {
        participant: ParticipantId,
        config: ConfigId,
        enabled: bool,
        reply: Reply,
    },
    Grant {
        participant: ParticipantId,
        config: ConfigId,
        grant: TokenGrant,
        reply: Reply,
    },
    LaunchNow {
        config: ConfigId,
        reply: Reply,
    },
    Apply {
        from: ParticipantId,
        message: PeerMessage,
    },
    Snapshot {
        reply: oneshot::Sender<LobbySnapshot>,
    },
    Shutdown,
}

/// Point-in-time view of the lobby.
#[derive(Debug, Clone)]
pub struct LobbySnapshot {
    pub session: SessionId,
    pub configs: Vec<LaunchConfig>,
    pub members: Vec<LobbyMember>,
    pub records: Vec<CountdownRecord>,
    pub counting: bool,
}

/// Handle to a running lobby actor. Cheap to clone.
#[derive(Clone)]
pub struct LobbyHandle {
    session: SessionId,
    halt_grace: Duration,
    sender: mpsc::Sender<LobbyCommand>,
    events: broadcast::Sender<LobbyEvent>,
}

impl LobbyHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LobbyEvent> {
        self.events.subscribe()
    }

    /// How long a halted countdown waits for unreachable voters.
    pub fn halt_grace(&self) -> Duration {
        self.halt_grace
    }

    pub async fn join(
        &self,
        participant: ParticipantId,
        name: impl Into<String>,
        priority: HostPriority,
        address: Option<String>,
    ) -> Result<(), LobbyError> {
        let name = name.into();
        self.request(|reply| LobbyCommand::Join {
            participant,
            name,
            priority,
            address,
            reply,
        })
        .await
    }

    pub async fn leave(&self, participant: ParticipantId) -> Result<(), LobbyError> {
        self.request(|reply| LobbyCommand::Leave { participant, reply })
            .await
    }

    pub async fn rename(
        &self,
        participant: ParticipantId,
        name: impl Into<String>,
    ) -> Result<(), LobbyError> {
        let name = name.into();
        self.request(|reply| LobbyCommand::Rename {
            participant,
            name,
            reply,
        })
        .await
    }

    pub async fn set_spectator(
        &self,
        participant: ParticipantId,
        spectator: bool,
    ) -> Result<(), LobbyError> {
        self.request(|reply| LobbyCommand::SetSpectator {
            participant,
            spectator,
            reply,
        })
        .await
    }

    pub async fn set_reachable(
        &self,
        participant: ParticipantId,
        reachable: bool,
    ) -> Result<(), LobbyError> {
        self.request(|reply| LobbyCommand::SetReachable {
            participant,
            reachable,
            reply,
        })
        .await
    }

    /// Casts (`enabled`) or withdraws a vote. Both directions are idempotent.
    pub async fn vote(
        &self,
        participant: ParticipantId,
        config: ConfigId,
        enabled: bool,
    ) -> Result<(), LobbyError> {
        self.request(|reply| LobbyCommand::Vote {
            participant,
            config,
            enabled,
            reply,
        })
        .await
    }

    pub async fn grant(
        &self,
        participant: ParticipantId,
        config: ConfigId,
        grant: TokenGrant,
    ) -> Result<(), LobbyError> {
        self.request(|reply| LobbyCommand::Grant {
            participant,
            config,
            grant,
            reply,
        })
        .await
    }

    /// Commits the running countdown for `config` without waiting for it.
    pub async fn launch_now(&self, config: ConfigId) -> Result<(), LobbyError> {
        self.request(|reply| LobbyCommand::LaunchNow { config, reply })
            .await
    }

    /// Feeds a peer message into the lobby (fire-and-forget).
    pub async fn apply(&self, from: ParticipantId, message: PeerMessage) -> Result<(), LobbyError> {
        self.sender
            .send(LobbyCommand::Apply { from, message })
            .await
            .map_err(|_| LobbyError::Shutdown)
    }

    pub async fn snapshot(&self) -> Result<LobbySnapshot, LobbyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LobbyCommand::Snapshot { reply: tx })
            .await
            .map_err(|_| LobbyError::Shutdown)?;
        rx.await.map_err(|_| LobbyError::Shutdown)
    }

    /// Stops the actor. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(LobbyCommand::Shutdown).await;
    }

    async fn request(
        &self,
        command: impl FnOnce(Reply) -> LobbyCommand,
    ) -> Result<(), LobbyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| LobbyError::Shutdown)?;
        rx.await.map_err(|_| LobbyError::Shutdown)?
    }
}

struct LobbyActor {
    coordinator: LaunchCoordinator,
    clock: TickClock,
    receiver: mpsc::Receiver<LobbyCommand>,
    events: broadcast::Sender<LobbyEvent>,
}

impl LobbyActor {
    async fn run(mut self) {
        let session = self.coordinator.session();
        tracing::info!(%session, "lobby actor started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.on_command(cmd) {
                        break;
                    }
                }
                info = self.clock.wait_for_tick() => {
                    // Periods lost to a stalled loop still count down.
                    let events = self.coordinator.advance(info.ticks_skipped.saturating_add(1));
                    self.publish(events);
                }
            }
            self.clock.set_running(self.coordinator.is_counting());
        }

        tracing::info!(%session, "lobby actor stopped");
    }

    /// Returns `false` when the actor should stop.
    fn on_command(&mut self, cmd: LobbyCommand) -> bool {
        let c = &mut self.coordinator;
        let (result, reply) = match cmd {
            LobbyCommand::Join {
                participant,
                name,
                priority,
                address,
                reply,
            } => (c.join(participant, name, priority, address), reply),
            LobbyCommand::Leave { participant, reply } => (c.leave(participant), reply),
            LobbyCommand::Rename {
                participant,
                name,
                reply,
            } => (c.rename(participant, name), reply),
            LobbyCommand::SetSpectator {
                participant,
                spectator,
                reply,
            } => (c.set_spectator(participant, spectator), reply),
            LobbyCommand::SetReachable {
                participant,
                reachable,
                reply,
            } => (c.set_reachable(participant, reachable), reply),
            LobbyCommand::Vote {
                participant,
                config,
                enabled,
                reply,
            } => (c.set_vote(participant, config, enabled), reply),
            LobbyCommand::Grant {
                participant,
                config,
                grant,
                reply,
            } => (c.grant(participant, config, grant), reply),
            LobbyCommand::LaunchNow { config, reply } => (c.launch_now(config), reply),
            LobbyCommand::Apply { from, message } => {
                match c.apply(from, &message) {
                    Ok(events) => self.publish(events),
                    Err(e) => tracing::debug!(
                        %from,
                        kind = message.kind(),
                        error = %e,
                        "lobby message rejected"
                    ),
                }
                return true;
            }
            LobbyCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
                return true;
            }
            LobbyCommand::Shutdown => {
                tracing::info!(session = %self.coordinator.session(), "lobby shutting down");
                return false;
            }
        };

        let result = result.map(|events| self.publish(events));
        let _ = reply.send(result);
        true
    }

    fn publish(&self, events: Vec<LobbyEvent>) {
        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }

    fn snapshot(&self) -> LobbySnapshot {
        let c = &self.coordinator;
        LobbySnapshot {
            session: c.session(),
            configs: c.configs().cloned().collect(),
            members: c.members().to_vec(),
            records: c.records().cloned().collect(),
            counting: c.is_counting(),
        }
    }
}

/// Spawns a lobby actor for `session` offering `configs`.
pub fn spawn_lobby(
    session: SessionId,
    config: LobbyConfig,
    configs: impl IntoIterator<Item = LaunchConfig>,
) -> LobbyHandle {
    let config = config.validated();
    let (tx, rx) = mpsc::channel(config.command_capacity);
    let (events, _) = broadcast::channel(config.event_capacity);

    let actor = LobbyActor {
        coordinator: LaunchCoordinator::new(session, configs, config.halt_grace_secs),
        clock: TickClock::new(TickConfig {
            tick_rate_hz: 1,
            start_paused: true,
        }),
        receiver: rx,
        events: events.clone(),
    };
    tokio::spawn(actor.run());

    LobbyHandle {
        session,
        halt_grace: Duration::from_secs(u64::from(config.halt_grace_secs)),
        sender: tx,
        events,
    }
}
