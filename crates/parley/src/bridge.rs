//! Glue between a lobby session and its [`LobbyHandle`].
//!
//! Runs on the participant hosting the lobby session:
//!
//! ```text
//!   SessionEvent ──(joins, leaves, votes, tokens)──→ LobbyHandle
//!   LobbyEvent::Outcome ──(LaunchAs to each member)──→ SessionHandle
//!                       └─(own outcome)──→ subscribe_launch()
//! ```
//!
//! A member whose transport drops is marked unreachable in the lobby, which
//! halts a countdown they vote in. They leave the lobby only once the halt
//! grace has run out without them being re-admitted.
//!
//! Clients read their outcome straight off their session events with
//! [`launch_from`].

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::Duration;

use parley_lobby::{LobbyError, LobbyEvent, LobbyHandle};
use parley_protocol::{Launch, ParticipantId, PeerMessage};
use parley_role::{HostPriority, PriorityTier, Role, RoleError, SessionEvent, SessionHandle};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::ParleyError;

/// The launch carried by a `LaunchAs` session message, if `event` is one.
pub fn launch_from(event: &SessionEvent) -> Option<&Launch> {
    match event {
        SessionEvent::Message {
            message: PeerMessage::LaunchAs { launch },
            ..
        } => Some(launch),
        _ => None,
    }
}

/// A running bridge. Dropping it leaves the task running until either
/// side shuts down; call [`stop`](Self::stop) to end it early.
pub struct LobbyBridge {
    launches: broadcast::Sender<Launch>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl LobbyBridge {
    /// Seeds the lobby with the session's current members and starts
    /// forwarding. The session must be hosting.
    pub async fn start(session: SessionHandle, lobby: LobbyHandle) -> Result<Self, ParleyError> {
        // Subscribe before the snapshot so no join falls between the two.
        let session_events = session.subscribe();
        let lobby_events = lobby.subscribe();

        let snapshot = session.snapshot().await?;
        if snapshot.role != Some(Role::Host) {
            return Err(RoleError::NotHost.into());
        }

        for member in &snapshot.members {
            let priority = if member.participant == snapshot.local {
                snapshot.priority
            } else {
                HostPriority::roll(PriorityTier::MATCHED, member.participant)
            };
            join(&lobby, member.participant, member.name.clone(), priority).await?;
            if member.spectator {
                lobby.set_spectator(member.participant, true).await?;
            }
        }
        tracing::info!(
            session = %snapshot.session,
            lobby = %lobby.session(),
            members = snapshot.members.len(),
            "lobby bridge started"
        );

        let (launches, _) = broadcast::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = BridgeTask {
            local: snapshot.local,
            session,
            lobby,
            launches: launches.clone(),
            departing: HashMap::new(),
        };
        let task = tokio::spawn(task.run(session_events, lobby_events, stop_rx));

        Ok(Self {
            launches,
            stop: Some(stop_tx),
            task,
        })
    }

    /// The local participant's own launch outcome.
    pub fn subscribe_launch(&self) -> broadcast::Receiver<Launch> {
        self.launches.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops forwarding and waits for the task to end.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "lobby bridge task ended abnormally");
        }
    }
}

struct BridgeTask {
    local: ParticipantId,
    session: SessionHandle,
    lobby: LobbyHandle,
    launches: broadcast::Sender<Launch>,
    /// Unreachable members and when they leave the lobby for good.
    departing: HashMap<ParticipantId, Instant>,
}

impl BridgeTask {
    async fn run(
        mut self,
        mut session_events: broadcast::Receiver<SessionEvent>,
        mut lobby_events: broadcast::Receiver<LobbyEvent>,
        mut stop: oneshot::Receiver<()>,
    ) {
        loop {
            let deadline = self.departing.values().min().copied();
            let flow = tokio::select! {
                Ok(()) = &mut stop => break,
                () = sleep_until(deadline) => self.expire_departures().await,
                event = session_events.recv() => match event {
                    Ok(event) => self.on_session_event(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "lobby bridge lagged behind session events");
                        ControlFlow::Continue(())
                    }
                    Err(RecvError::Closed) => ControlFlow::Break(()),
                },
                event = lobby_events.recv() => match event {
                    Ok(event) => self.on_lobby_event(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "lobby bridge lagged behind lobby events");
                        ControlFlow::Continue(())
                    }
                    Err(RecvError::Closed) => ControlFlow::Break(()),
                },
            };
            if flow.is_break() {
                break;
            }
        }
        tracing::info!(lobby = %self.lobby.session(), "lobby bridge stopped");
    }

    async fn on_session_event(&mut self, event: SessionEvent) -> ControlFlow<()> {
        let result = match event {
            SessionEvent::MemberJoined { participant, name } => {
                let returning = if self.departing.remove(&participant).is_some() {
                    tracing::info!(%participant, "unreachable member re-admitted");
                    self.lobby.set_reachable(participant, true).await
                } else {
                    Err(LobbyError::UnknownParticipant(participant))
                };
                match returning {
                    Err(LobbyError::UnknownParticipant(_)) => {
                        let priority = HostPriority::roll(PriorityTier::MATCHED, participant);
                        join(&self.lobby, participant, name, priority).await
                    }
                    other => other,
                }
            }
            SessionEvent::MemberUnreachable { participant } => {
                // Departure lands one second after the lobby's own halt
                // grace runs out.
                let grace = self.lobby.halt_grace() + Duration::from_secs(1);
                self.departing.insert(participant, Instant::now() + grace);
                tracing::info!(%participant, ?grace, "member unreachable");
                ignore_unknown(self.lobby.set_reachable(participant, false).await)
            }
            SessionEvent::MemberLeft { participant } if self.departing.contains_key(&participant) => {
                Ok(())
            }
            SessionEvent::MemberLeft { participant } => {
                ignore_unknown(self.lobby.leave(participant).await)
            }
            SessionEvent::Renamed { participant, name } => {
                self.lobby.rename(participant, name).await
            }
            SessionEvent::Message { from, message } => match message {
                PeerMessage::Vote { .. }
                | PeerMessage::AuthToken { .. }
                | PeerMessage::Spectator { .. } => self.lobby.apply(from, message).await,
                _ => Ok(()),
            },
            SessionEvent::RoleChanged { role: Role::Client, host } => {
                tracing::warn!(%host, "lobby host stepped down; bridge stopping");
                return ControlFlow::Break(());
            }
            SessionEvent::Kicked { .. } | SessionEvent::HostLost => return ControlFlow::Break(()),
            _ => Ok(()),
        };

        match result {
            Ok(()) => ControlFlow::Continue(()),
            Err(LobbyError::Shutdown) => ControlFlow::Break(()),
            Err(e) => {
                tracing::debug!(error = %e, "session event not applied to lobby");
                ControlFlow::Continue(())
            }
        }
    }

    async fn expire_departures(&mut self) -> ControlFlow<()> {
        let now = Instant::now();
        let due: Vec<ParticipantId> = self
            .departing
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(p, _)| *p)
            .collect();
        for participant in due {
            self.departing.remove(&participant);
            tracing::info!(%participant, "unreachable member dropped from the lobby");
            match self.lobby.leave(participant).await {
                Err(LobbyError::Shutdown) => return ControlFlow::Break(()),
                Err(e) => tracing::debug!(%participant, error = %e, "leave not applied to lobby"),
                Ok(()) => {}
            }
        }
        ControlFlow::Continue(())
    }

    async fn on_lobby_event(&self, event: LobbyEvent) -> ControlFlow<()> {
        let LobbyEvent::Outcome { participant, launch } = event else {
            return ControlFlow::Continue(());
        };
        if participant == self.local {
            // Nobody listening is fine.
            let _ = self.launches.send(launch);
            return ControlFlow::Continue(());
        }

        let config = launch.config();
        match self
            .session
            .send_to(participant, PeerMessage::LaunchAs { launch })
            .await
        {
            Ok(()) => {
                tracing::debug!(%participant, %config, "launch outcome delivered");
                ControlFlow::Continue(())
            }
            Err(RoleError::Shutdown) => ControlFlow::Break(()),
            Err(e) => {
                tracing::warn!(%participant, %config, error = %e, "launch outcome not delivered");
                ControlFlow::Continue(())
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn ignore_unknown(result: Result<(), LobbyError>) -> Result<(), LobbyError> {
    match result {
        Err(LobbyError::UnknownParticipant(_)) => Ok(()),
        other => other,
    }
}

async fn join(
    lobby: &LobbyHandle,
    participant: ParticipantId,
    name: String,
    priority: HostPriority,
) -> Result<(), LobbyError> {
    match lobby.join(participant, name, priority, None).await {
        Err(LobbyError::AlreadyMember(_)) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use parley_protocol::ConfigId;

    use super::*;

    #[test]
    fn test_launch_from_ignores_other_messages() {
        let launch = Launch::Absent { config: ConfigId(3) };
        let event = SessionEvent::Message {
            from: ParticipantId(1),
            message: PeerMessage::LaunchAs { launch: launch.clone() },
        };
        assert_eq!(launch_from(&event), Some(&launch));

        let other = SessionEvent::Message {
            from: ParticipantId(1),
            message: PeerMessage::Go,
        };
        assert_eq!(launch_from(&other), None);
        assert_eq!(launch_from(&SessionEvent::HostLost), None);
    }
}
