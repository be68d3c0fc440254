//! The session actor: identity and roster state plus a swappable role.
//!
//! ```text
//!            SessionHandle (cloneable)
//!                   │ commands
//!                   ▼
//!   ┌─────────────────────────────────────────┐
//!   │ SessionActor                            │
//!   │   identity, roster, priority            │
//!   │   role: Host(HostRole) | Client(..)     │◀── link events
//!   │         | Migrating                     │◀── supervisor events
//!   │   deferred: VecDeque<Deferred>          │◀── handoff future
//!   └─────────────────────────────────────────┘
//!                   │ broadcast
//!                   ▼
//!             SessionEvent subscribers
//! ```
//!
//! A role flip swaps only the `role` field. While a handoff future runs the
//! role is `Migrating`: session-mutating commands and inbound messages are
//! parked in `deferred` and replayed in arrival order once the new role is
//! installed. Role-control traffic (`HostBid`, `HostIdentity`) and snapshot
//! queries are answered immediately.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::ControlFlow;

use futures_util::future::BoxFuture;
use parley_protocol::{
    Codec, Envelope, KickReason, ParticipantId, Payload, PeerMessage, SessionId,
};
use parley_transport::{
    AnyConnection, Connection, ConnectionId, ConnectionStatus, EventSink, LinkEvent,
    SupervisorEvent,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use crate::roles::{ClientRole, HostRole, LinkOwner};
use crate::{HostPriority, PriorityTier, Role, RoleArbiter, RoleError, SessionConfig, SessionIdentity};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What a session tells its observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A handoff completed. `host` is who hosts now.
    RoleChanged { role: Role, host: ParticipantId },
    /// A handoff began; the session is migrating towards `role`.
    HandoffStarted { role: Role, host: ParticipantId },
    /// A handoff could not complete; the prior role was restored.
    HandoffFailed { reason: String },
    MemberJoined { participant: ParticipantId, name: String },
    MemberLeft { participant: ParticipantId },
    /// Host only: a member's transport dropped without a `Quit`. The
    /// matching `MemberLeft` follows.
    MemberUnreachable { participant: ParticipantId },
    Renamed { participant: ParticipantId, name: String },
    /// A coordination message from the session.
    Message { from: ParticipantId, message: PeerMessage },
    /// Opaque simulation data.
    GameData { from: ParticipantId, data: Vec<u8> },
    /// The transport to the host is gone and cannot be redialed.
    HostLost,
    /// The host removed the local participant.
    Kicked { reason: KickReason },
}

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub participant: ParticipantId,
    pub name: String,
    pub slot: Option<u8>,
    pub spectator: bool,
}

impl MemberInfo {
    fn new(participant: ParticipantId, name: String) -> Self {
        Self {
            participant,
            name,
            slot: None,
            spectator: false,
        }
    }
}

/// A point-in-time view of the session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session: SessionId,
    pub local: ParticipantId,
    /// `None` while a handoff is in flight.
    pub role: Option<Role>,
    pub host: ParticipantId,
    pub members: Vec<MemberInfo>,
    pub priority: HostPriority,
    /// Live transports to other participants.
    pub transports: usize,
    pub migrating: bool,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

type Reply<T> = oneshot::Sender<Result<T, RoleError>>;

enum SessionCommand {
    Send { payload: Payload, reply: Reply<()> },
    SendTo { participant: ParticipantId, message: PeerMessage, reply: Reply<()> },
    AddMember { participant: ParticipantId, name: String, conn: AnyConnection, reply: Reply<()> },
    Kick { participant: ParticipantId, reason: KickReason, reply: Reply<()> },
    Rename { name: String, reply: Reply<()> },
    ContestHost { reply: Reply<()> },
    BecomeHost { reply: Reply<()> },
    BecomeClient { host: ParticipantId, reply: Reply<()> },
    Snapshot { reply: oneshot::Sender<SessionSnapshot> },
    Stop { reply: oneshot::Sender<()> },
}

impl SessionCommand {
    /// Commands that change session state wait out a handoff.
    fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Send { .. }
                | Self::SendTo { .. }
                | Self::AddMember { .. }
                | Self::Kick { .. }
                | Self::Rename { .. }
                | Self::ContestHost { .. }
        )
    }
}

/// Cloneable handle to a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    session: SessionId,
    local: ParticipantId,
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Starts a session hosted by the local participant. `peers` are
    /// already-established transports to other members.
    pub fn spawn_host<K: Codec>(
        identity: SessionIdentity,
        codec: K,
        config: SessionConfig,
        peers: Vec<(ParticipantId, AnyConnection)>,
    ) -> Self {
        Self::start(identity, codec, config, Start::Host(peers))
    }

    /// Starts a session as a client of `host` over `conn`.
    pub fn spawn_client<K: Codec>(
        identity: SessionIdentity,
        codec: K,
        config: SessionConfig,
        host: ParticipantId,
        conn: AnyConnection,
    ) -> Self {
        Self::start(identity, codec, config, Start::Client(host, conn))
    }

    fn start<K: Codec>(identity: SessionIdentity, codec: K, config: SessionConfig, start: Start) -> Self {
        let config = config.validated();
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity);
        let (events, _) = broadcast::channel(config.event_capacity);
        let handle = Self {
            session: identity.session,
            local: identity.local,
            commands: cmd_tx,
            events: events.clone(),
        };
        let actor = SessionActor::new(identity, codec, config, start, cmd_rx, events);
        tokio::spawn(actor.run());
        handle
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn local(&self) -> ParticipantId {
        self.local
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Sends `message` to the whole session through the current host.
    pub async fn send(&self, message: PeerMessage) -> Result<(), RoleError> {
        self.request(|reply| SessionCommand::Send {
            payload: Payload::Peer(message),
            reply,
        })
        .await?
    }

    /// Sends opaque simulation data to the whole session.
    pub async fn send_game(&self, data: Vec<u8>) -> Result<(), RoleError> {
        self.request(|reply| SessionCommand::Send {
            payload: Payload::Game(data),
            reply,
        })
        .await?
    }

    /// Host only: sends `message` to one member.
    pub async fn send_to(&self, participant: ParticipantId, message: PeerMessage) -> Result<(), RoleError> {
        self.request(|reply| SessionCommand::SendTo {
            participant,
            message,
            reply,
        })
        .await?
    }

    /// Host only: admits a member over an established transport.
    pub async fn add_member(
        &self,
        participant: ParticipantId,
        name: impl Into<String>,
        conn: AnyConnection,
    ) -> Result<(), RoleError> {
        let name = name.into();
        self.request(|reply| SessionCommand::AddMember {
            participant,
            name,
            conn,
            reply,
        })
        .await?
    }

    /// Host only: removes a member and closes its transport.
    pub async fn kick(&self, participant: ParticipantId, reason: KickReason) -> Result<(), RoleError> {
        self.request(|reply| SessionCommand::Kick {
            participant,
            reason,
            reply,
        })
        .await?
    }

    pub async fn rename(&self, name: impl Into<String>) -> Result<(), RoleError> {
        let name = name.into();
        self.request(|reply| SessionCommand::Rename { name, reply }).await?
    }

    /// Offers the local host priority to every peer. Whichever side loses
    /// the comparison hands off to the other.
    pub async fn contest_host(&self) -> Result<(), RoleError> {
        self.request(|reply| SessionCommand::ContestHost { reply }).await?
    }

    /// Promotes the local participant. Resolves once the host role runs.
    pub async fn become_host(&self) -> Result<(), RoleError> {
        self.request(|reply| SessionCommand::BecomeHost { reply }).await?
    }

    /// Demotes the local participant to a client of `host`. Resolves once
    /// the client role runs.
    pub async fn become_client(&self, host: ParticipantId) -> Result<(), RoleError> {
        self.request(|reply| SessionCommand::BecomeClient { host, reply }).await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, RoleError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    /// Closes every transport and ends the actor. Idempotent.
    pub async fn stop(&self) {
        let _ = self.request(|reply| SessionCommand::Stop { reply }).await;
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, RoleError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| RoleError::Shutdown)?;
        rx.await.map_err(|_| RoleError::Shutdown)
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

enum Start {
    Host(Vec<(ParticipantId, AnyConnection)>),
    Client(ParticipantId, AnyConnection),
}

enum RoleState<K: Codec> {
    Host(HostRole<K>),
    Client(ClientRole),
    /// Handoff in flight towards `to`, hosted by `host` once done.
    Migrating { to: Role, host: ParticipantId },
}

struct HandoffOutcome<K: Codec> {
    role: RoleState<K>,
    result: Result<(), RoleError>,
}

/// Work parked during a handoff window.
enum Deferred {
    Command(SessionCommand),
    Link(LinkEvent),
    Supervisor(SupervisorEvent),
}

/// Stamps outgoing envelopes with the local sender, sequence and clock.
struct Outbox {
    local: ParticipantId,
    next_seq: u64,
    started: Instant,
}

impl Outbox {
    fn wrap(&mut self, payload: Payload) -> Envelope {
        let seq = self.next_seq;
        self.next_seq += 1;
        Envelope {
            seq,
            timestamp: self.started.elapsed().as_millis() as u64,
            sender: self.local,
            channel: Default::default(),
            payload,
        }
    }

    fn peer(&mut self, message: PeerMessage) -> Envelope {
        self.wrap(Payload::Peer(message))
    }
}

struct SessionActor<K: Codec> {
    identity: SessionIdentity,
    codec: K,
    config: SessionConfig,
    role: RoleState<K>,
    host: ParticipantId,
    members: BTreeMap<ParticipantId, MemberInfo>,
    priority: HostPriority,
    flipped_once: bool,
    bid_sent: bool,
    host_lost: bool,
    outbox: Outbox,
    link_owner: HashMap<ConnectionId, LinkOwner>,
    link_sink: EventSink<LinkEvent>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    supervisor_sink: EventSink<SupervisorEvent>,
    supervisor_rx: mpsc::UnboundedReceiver<SupervisorEvent>,
    handoff: Option<BoxFuture<'static, HandoffOutcome<K>>>,
    handoff_reply: Option<Reply<()>>,
    deferred: VecDeque<Deferred>,
    events: broadcast::Sender<SessionEvent>,
    commands: mpsc::Receiver<SessionCommand>,
}

impl<K: Codec> SessionActor<K> {
    fn new(
        identity: SessionIdentity,
        codec: K,
        config: SessionConfig,
        start: Start,
        commands: mpsc::Receiver<SessionCommand>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (link_sink, link_rx) = EventSink::channel();
        let (supervisor_sink, supervisor_rx) = EventSink::channel();
        let local = identity.local;

        let (role, host, current) = match start {
            Start::Host(peers) => (
                RoleState::Host(HostRole::new(local, codec.clone(), &link_sink, peers)),
                local,
                Role::Host,
            ),
            Start::Client(host, conn) => (
                RoleState::Client(ClientRole::adopt(
                    host,
                    conn,
                    codec.clone(),
                    config.supervisor.clone(),
                    &supervisor_sink,
                )),
                host,
                Role::Client,
            ),
        };

        let mut members = BTreeMap::new();
        members.insert(local, MemberInfo::new(local, identity.name.clone()));

        let mut actor = Self {
            priority: HostPriority::roll(
                PriorityTier::from_arrival(config.arrival, false, current),
                local,
            ),
            outbox: Outbox {
                local,
                next_seq: 0,
                started: Instant::now(),
            },
            identity,
            codec,
            config,
            role,
            host,
            members,
            flipped_once: false,
            bid_sent: false,
            host_lost: false,
            link_owner: HashMap::new(),
            link_sink,
            link_rx,
            supervisor_sink,
            supervisor_rx,
            handoff: None,
            handoff_reply: None,
            deferred: VecDeque::new(),
            events,
            commands,
        };
        actor.register_links();
        actor
    }

    async fn run(mut self) {
        tracing::info!(
            session = %self.identity.session,
            participant = %self.identity.local,
            role = ?self.current_role(),
            "session started"
        );
        self.announce_name().await;

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        self.shutdown().await;
                        break;
                    };
                    if self.on_command(cmd).await.is_break() {
                        break;
                    }
                }
                Some(event) = self.link_rx.recv() => self.on_link_event(event),
                Some(event) = self.supervisor_rx.recv() => self.on_supervisor_event(event),
                outcome = next_handoff(&mut self.handoff) => self.finish_handoff(outcome).await,
            }
        }

        tracing::info!(session = %self.identity.session, "session stopped");
    }

    // -- commands -----------------------------------------------------------

    async fn on_command(&mut self, cmd: SessionCommand) -> ControlFlow<()> {
        if self.is_migrating() && cmd.is_mutating() {
            self.deferred.push_back(Deferred::Command(cmd));
            return ControlFlow::Continue(());
        }

        match cmd {
            SessionCommand::Send { payload, reply } => {
                let _ = reply.send(self.send_payload(payload).await);
            }
            SessionCommand::SendTo { participant, message, reply } => {
                let _ = reply.send(self.send_to(participant, message));
            }
            SessionCommand::AddMember { participant, name, conn, reply } => {
                let _ = reply.send(self.add_member(participant, name, conn));
            }
            SessionCommand::Kick { participant, reason, reply } => {
                let _ = reply.send(self.kick(participant, reason));
            }
            SessionCommand::Rename { name, reply } => {
                self.identity.name = name.clone();
                let message = PeerMessage::PlayerName {
                    participant: self.identity.local,
                    name,
                };
                let _ = reply.send(self.send_payload(Payload::Peer(message)).await);
            }
            SessionCommand::ContestHost { reply } => {
                let _ = reply.send(self.send_bid());
            }
            SessionCommand::BecomeHost { reply } => match self.begin_become_host() {
                Ok(()) => self.handoff_reply = Some(reply),
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            SessionCommand::BecomeClient { host, reply } => match self.begin_become_client(host) {
                Ok(()) => self.handoff_reply = Some(reply),
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Stop { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn send_payload(&mut self, payload: Payload) -> Result<(), RoleError> {
        let envelope = self.outbox.wrap(payload);
        match &self.role {
            RoleState::Host(host) => host.send_local(&envelope),
            RoleState::Client(client) => client.send(envelope).await,
            RoleState::Migrating { .. } => Err(RoleError::HandoffInProgress),
        }
    }

    fn send_to(&mut self, participant: ParticipantId, message: PeerMessage) -> Result<(), RoleError> {
        let RoleState::Host(host) = &self.role else {
            return Err(RoleError::NotHost);
        };
        let envelope = self.outbox.peer(message);
        host.send_to(participant, &envelope)
    }

    fn add_member(
        &mut self,
        participant: ParticipantId,
        name: String,
        conn: AnyConnection,
    ) -> Result<(), RoleError> {
        let RoleState::Host(host) = &mut self.role else {
            return Err(RoleError::NotHost);
        };
        if !host.is_accepting() {
            return Err(RoleError::NotAccepting);
        }
        if host.has(participant) {
            return Err(RoleError::AlreadyMember(participant));
        }

        let link = host.add(participant, conn, self.codec.clone());
        self.link_owner.insert(link, LinkOwner::Member(participant));

        let mut intro = vec![
            PeerMessage::Welcome {
                session: self.identity.session,
                participant,
            },
            PeerMessage::HostIdentity {
                host: self.identity.local,
            },
        ];
        for member in self.members.values() {
            intro.push(PeerMessage::PlayerName {
                participant: member.participant,
                name: member.name.clone(),
            });
            if let Some(slot) = member.slot {
                intro.push(PeerMessage::AssignSlot {
                    participant: member.participant,
                    slot,
                });
            }
            if member.spectator {
                intro.push(PeerMessage::Spectator {
                    participant: member.participant,
                });
            }
        }
        for message in intro {
            let envelope = self.outbox.peer(message);
            host.send_to(participant, &envelope)?;
        }

        let announce = self.outbox.peer(PeerMessage::PlayerName {
            participant,
            name: name.clone(),
        });
        host.broadcast(&announce);
        tracing::info!(%participant, %name, "member admitted");
        Ok(())
    }

    fn kick(&mut self, participant: ParticipantId, reason: KickReason) -> Result<(), RoleError> {
        let RoleState::Host(host) = &mut self.role else {
            return Err(RoleError::NotHost);
        };
        if participant == self.identity.local || !host.has(participant) {
            return Err(RoleError::UnknownParticipant(participant));
        }
        let envelope = self.outbox.peer(PeerMessage::Kick { participant, reason });
        host.broadcast(&envelope);
        host.remove(participant);
        tracing::info!(%participant, ?reason, "member kicked");
        Ok(())
    }

    fn send_bid(&mut self) -> Result<(), RoleError> {
        let RoleState::Host(host) = &self.role else {
            tracing::debug!("not hosting; nothing to contest");
            return Ok(());
        };
        self.bid_sent = true;
        let envelope = self.outbox.peer(PeerMessage::HostBid {
            priority: self.priority.value(),
        });
        host.relay(self.identity.local, &envelope);
        tracing::debug!(priority = self.priority.value(), "host bid sent");
        Ok(())
    }

    async fn announce_name(&mut self) {
        let message = PeerMessage::PlayerName {
            participant: self.identity.local,
            name: self.identity.name.clone(),
        };
        if let Err(e) = self.send_payload(Payload::Peer(message)).await {
            tracing::warn!(error = %e, "could not announce name");
        }
    }

    // -- inbound ------------------------------------------------------------

    fn on_link_event(&mut self, event: LinkEvent) {
        let owner = self.link_owner.get(&event.link()).copied();
        match event {
            LinkEvent::Message { link, envelope } => {
                if envelope.peer_message().is_some_and(PeerMessage::is_role_control) {
                    self.on_role_control(envelope);
                } else if self.is_migrating() {
                    self.deferred
                        .push_back(Deferred::Link(LinkEvent::Message { link, envelope }));
                } else {
                    self.route_link_message(owner, envelope);
                }
            }
            LinkEvent::Invalid { link, reason } => {
                tracing::warn!(%link, %reason, "undecodable frame on peer link");
            }
            LinkEvent::Closed { link, status } => {
                if self.is_migrating() {
                    self.deferred
                        .push_back(Deferred::Link(LinkEvent::Closed { link, status }));
                } else {
                    self.on_link_closed(owner, status);
                }
            }
        }
    }

    fn route_link_message(&mut self, owner: Option<LinkOwner>, envelope: Envelope) {
        let hosting = matches!(self.role, RoleState::Host(_));
        match owner {
            Some(LinkOwner::Loopback) => self.apply(envelope),
            Some(LinkOwner::Member(from)) if hosting => self.host_inbound(from, envelope),
            // Read by a host-layer pump before a demotion detached it.
            Some(LinkOwner::Member(from)) if from == self.host => self.apply(envelope),
            _ => tracing::debug!(sender = %envelope.sender, "dropping message from a retired link"),
        }
    }

    /// Host-side handling of an envelope read from member `from`.
    fn host_inbound(&mut self, from: ParticipantId, envelope: Envelope) {
        if envelope.sender != from {
            tracing::warn!(%from, sender = %envelope.sender, "sender does not match link; dropped");
            return;
        }
        let local = self.identity.local;
        let RoleState::Host(host) = &mut self.role else {
            return;
        };
        match envelope.peer_message() {
            // The host's own traffic comes in over its self link and goes
            // back out on every link, that one included.
            _ if from == local => host.broadcast(&envelope),
            Some(PeerMessage::Quit) => {
                host.relay(from, &envelope);
                host.remove(from);
                tracing::info!(participant = %from, "member quit");
            }
            Some(message) if is_host_only(message) => {
                tracing::warn!(%from, kind = message.kind(), "member sent a host-only message");
            }
            _ => host.relay(from, &envelope),
        }
    }

    fn on_link_closed(&mut self, owner: Option<LinkOwner>, status: ConnectionStatus) {
        let local = self.identity.local;
        match (owner, &mut self.role) {
            (Some(LinkOwner::Member(participant)), RoleState::Host(host))
                if participant != local && host.has(participant) =>
            {
                tracing::info!(%participant, %status, "member link closed");
                host.remove(participant);
                let _ = self.events.send(SessionEvent::MemberUnreachable { participant });
                let quit = Envelope::peer(0, 0, participant, PeerMessage::Quit);
                host.relay(participant, &quit);
            }
            (Some(LinkOwner::Loopback), RoleState::Host(_)) => {
                tracing::error!(%status, "loopback closed under a running host layer");
            }
            _ => tracing::debug!(%status, "retired link closed"),
        }
    }

    fn on_supervisor_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Message(envelope) => {
                if envelope.peer_message().is_some_and(PeerMessage::is_role_control) {
                    self.on_role_control(envelope);
                } else if self.is_migrating() {
                    self.deferred
                        .push_back(Deferred::Supervisor(SupervisorEvent::Message(envelope)));
                } else {
                    self.apply(envelope);
                }
            }
            SupervisorEvent::StatusChanged { to, .. } => {
                if matches!(
                    to,
                    ConnectionStatus::Broken | ConnectionStatus::PeerDisconnected
                ) && matches!(self.role, RoleState::Client(_))
                {
                    self.report_host_lost();
                }
            }
            SupervisorEvent::InvalidMessage { reason } => {
                tracing::warn!(%reason, "undecodable frame from host");
            }
            SupervisorEvent::GaveUp { reason } => {
                tracing::warn!(%reason, "host transport gave up");
                self.report_host_lost();
            }
        }
    }

    fn report_host_lost(&mut self) {
        if !self.host_lost {
            self.host_lost = true;
            tracing::warn!(host = %self.host, "lost the host");
            self.emit(SessionEvent::HostLost);
        }
    }

    fn on_role_control(&mut self, envelope: Envelope) {
        let from = envelope.sender;
        let local = self.identity.local;
        match envelope.peer_message() {
            Some(PeerMessage::HostBid { priority }) => {
                if from == local || !matches!(self.role, RoleState::Host(_)) {
                    tracing::debug!(%from, "ignoring host bid");
                    return;
                }
                let remote = HostPriority::from_parts(*priority, from);
                if !self.bid_sent {
                    let _ = self.send_bid();
                }
                match RoleArbiter::decide(self.priority, remote) {
                    Role::Host => {
                        tracing::info!(rival = %from, "won host arbitration");
                        self.broadcast_host_identity();
                    }
                    Role::Client => {
                        tracing::info!(rival = %from, "lost host arbitration");
                        if let Err(e) = self.begin_become_client(from) {
                            tracing::warn!(error = %e, "could not step down");
                        }
                    }
                }
            }
            Some(PeerMessage::HostIdentity { host }) => {
                let host = *host;
                let claimant_is_member =
                    matches!(&self.role, RoleState::Host(role) if from == host && role.has(host));
                match &self.role {
                    RoleState::Host(_) if host == local => {}
                    RoleState::Host(_) if claimant_is_member => {
                        tracing::info!(%host, "peer claims host; stepping down");
                        if let Err(e) = self.begin_become_client(host) {
                            tracing::warn!(error = %e, "could not step down");
                        }
                    }
                    RoleState::Host(_) => {
                        tracing::warn!(%host, %from, "ignoring host identity for an unknown host");
                    }
                    RoleState::Client(client) if client.host() != host => {
                        tracing::warn!(expected = %client.host(), %host, "host identity changed without a handoff");
                    }
                    RoleState::Migrating { host: target, .. } if *target != host => {
                        tracing::warn!(expected = %target, %host, "host identity disagrees with pending handoff");
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /// Client-side application of a message the host delivered.
    fn apply(&mut self, envelope: Envelope) {
        let from = envelope.sender;
        let message = match envelope.payload {
            Payload::Game(data) => {
                self.emit(SessionEvent::GameData { from, data });
                return;
            }
            Payload::Peer(message) => message,
        };
        tracing::debug!(%from, kind = message.kind(), "applying message");

        match &message {
            PeerMessage::PlayerName { participant, name } => {
                match self.members.get_mut(participant) {
                    Some(member) if member.name == *name => {}
                    Some(member) => {
                        member.name = name.clone();
                        self.emit(SessionEvent::Renamed {
                            participant: *participant,
                            name: name.clone(),
                        });
                    }
                    None => {
                        self.members
                            .insert(*participant, MemberInfo::new(*participant, name.clone()));
                        self.emit(SessionEvent::MemberJoined {
                            participant: *participant,
                            name: name.clone(),
                        });
                    }
                }
            }
            PeerMessage::AssignSlot { participant, slot } => {
                self.member_mut(*participant).slot = Some(*slot);
            }
            PeerMessage::Spectator { participant } => {
                self.member_mut(*participant).spectator = true;
            }
            PeerMessage::Kick { participant, reason } => {
                if *participant == self.identity.local {
                    tracing::warn!(?reason, "kicked from the session");
                    self.emit(SessionEvent::Kicked { reason: *reason });
                } else {
                    self.remove_member(*participant);
                }
            }
            PeerMessage::Quit => self.remove_member(from),
            _ => {}
        }
        self.emit(SessionEvent::Message { from, message });
    }

    fn member_mut(&mut self, participant: ParticipantId) -> &mut MemberInfo {
        self.members
            .entry(participant)
            .or_insert_with(|| MemberInfo::new(participant, participant.to_string()))
    }

    fn remove_member(&mut self, participant: ParticipantId) {
        if participant != self.identity.local && self.members.remove(&participant).is_some() {
            self.emit(SessionEvent::MemberLeft { participant });
        }
    }

    fn broadcast_host_identity(&mut self) {
        let RoleState::Host(host) = &self.role else {
            return;
        };
        let envelope = self.outbox.peer(PeerMessage::HostIdentity {
            host: self.identity.local,
        });
        host.broadcast(&envelope);
    }

    // -- handoff ------------------------------------------------------------

    fn begin_become_client(&mut self, new_host: ParticipantId) -> Result<(), RoleError> {
        let local = self.identity.local;
        match &self.role {
            RoleState::Migrating { .. } => {
                tracing::error!(to = %new_host, "handoff requested while another is in flight");
                return Err(RoleError::HandoffInProgress);
            }
            RoleState::Client(_) => return Err(RoleError::NotHost),
            RoleState::Host(host) if new_host == local || !host.has(new_host) => {
                return Err(RoleError::NoLink(new_host));
            }
            RoleState::Host(_) => {}
        }

        let migrating = RoleState::Migrating {
            to: Role::Client,
            host: new_host,
        };
        let mut host = match std::mem::replace(&mut self.role, migrating) {
            RoleState::Host(host) => host,
            other => {
                self.role = other;
                return Err(RoleError::NotHost);
            }
        };
        host.stop_accepting();

        tracing::info!(host = %new_host, "handing off: becoming client");
        self.emit(SessionEvent::HandoffStarted {
            role: Role::Client,
            host: new_host,
        });

        let codec = self.codec.clone();
        let supervisor = self.config.supervisor.clone();
        let supervisor_sink = self.supervisor_sink.clone();
        let link_sink = self.link_sink.clone();
        self.handoff = Some(Box::pin(async move {
            let (keep, rest): (Vec<_>, Vec<_>) = host
                .detach_all()
                .await
                .into_iter()
                .partition(|(p, _)| *p == new_host);

            match keep.into_iter().next() {
                Some((_, conn)) => {
                    for (participant, conn) in rest {
                        tracing::debug!(%participant, "closing link not needed as client");
                        tokio::spawn(async move {
                            let _ = conn.close().await;
                        });
                    }
                    let client = ClientRole::adopt(new_host, conn, codec, supervisor, &supervisor_sink);
                    HandoffOutcome {
                        role: RoleState::Client(client),
                        result: Ok(()),
                    }
                }
                None => HandoffOutcome {
                    role: RoleState::Host(HostRole::new(local, codec, &link_sink, rest)),
                    result: Err(RoleError::NoLink(new_host)),
                },
            }
        }));
        Ok(())
    }

    fn begin_become_host(&mut self) -> Result<(), RoleError> {
        match &self.role {
            RoleState::Migrating { .. } => {
                tracing::error!("handoff requested while another is in flight");
                return Err(RoleError::HandoffInProgress);
            }
            RoleState::Host(_) => return Err(RoleError::NotClient),
            RoleState::Client(client) if !client.is_connected() => {
                return Err(RoleError::NoLink(client.host()));
            }
            RoleState::Client(_) => {}
        }

        let local = self.identity.local;
        let migrating = RoleState::Migrating {
            to: Role::Host,
            host: local,
        };
        let client = match std::mem::replace(&mut self.role, migrating) {
            RoleState::Client(client) => client,
            other => {
                self.role = other;
                return Err(RoleError::NotClient);
            }
        };

        tracing::info!("handing off: becoming host");
        self.emit(SessionEvent::HandoffStarted {
            role: Role::Host,
            host: local,
        });

        let codec = self.codec.clone();
        let link_sink = self.link_sink.clone();
        self.handoff = Some(Box::pin(async move {
            let old_host = client.host();
            let peers = match client.detach().await {
                Some(conn) => vec![(old_host, conn)],
                None => {
                    tracing::warn!(%old_host, "host transport closed during handoff; hosting alone");
                    Vec::new()
                }
            };
            HandoffOutcome {
                role: RoleState::Host(HostRole::new(local, codec, &link_sink, peers)),
                result: Ok(()),
            }
        }));
        Ok(())
    }

    async fn finish_handoff(&mut self, outcome: HandoffOutcome<K>) {
        // Events the retired role queued after the window opened.
        let was_client = matches!(self.role, RoleState::Migrating { to: Role::Host, .. });
        self.drain_pending(was_client);

        self.role = outcome.role;
        self.register_links();
        let role = self.current_role().unwrap_or(Role::Host);
        if let RoleState::Client(client) = &self.role {
            self.host = client.host();
            self.host_lost = false;
        } else {
            self.host = self.identity.local;
        }

        match &outcome.result {
            Ok(()) => {
                self.flipped_once = true;
                tracing::info!(%role, host = %self.host, "handoff complete");
                self.emit(SessionEvent::RoleChanged {
                    role,
                    host: self.host,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "handoff failed; prior role restored");
                self.emit(SessionEvent::HandoffFailed {
                    reason: e.to_string(),
                });
            }
        }

        self.priority = HostPriority::roll(
            PriorityTier::from_arrival(self.config.arrival, self.flipped_once, role),
            self.identity.local,
        );
        self.bid_sent = false;

        if role == Role::Host && outcome.result.is_ok() {
            self.broadcast_host_identity();
        }
        if let Some(reply) = self.handoff_reply.take() {
            let _ = reply.send(outcome.result);
        }

        let parked = std::mem::take(&mut self.deferred);
        tracing::debug!(count = parked.len(), "replaying deferred work");
        for item in parked {
            match item {
                Deferred::Command(cmd) => {
                    let _ = self.on_command(cmd).await;
                }
                Deferred::Link(event) => self.on_link_event(event),
                // Addressed to us by the host of the time.
                Deferred::Supervisor(SupervisorEvent::Message(envelope))
                    if !self.is_migrating()
                        && !envelope.peer_message().is_some_and(PeerMessage::is_role_control) =>
                {
                    self.apply(envelope)
                }
                Deferred::Supervisor(event) => self.on_supervisor_event(event),
            }
        }
    }

    /// Moves events already queued by either event source into `deferred`.
    /// The retired role's source goes first.
    fn drain_pending(&mut self, supervisor_first: bool) {
        let mut links = Vec::new();
        while let Ok(event) = self.link_rx.try_recv() {
            links.push(Deferred::Link(event));
        }
        let mut supervisor = Vec::new();
        while let Ok(event) = self.supervisor_rx.try_recv() {
            supervisor.push(Deferred::Supervisor(event));
        }
        if supervisor_first {
            self.deferred.extend(supervisor);
            self.deferred.extend(links);
        } else {
            self.deferred.extend(links);
            self.deferred.extend(supervisor);
        }
    }

    fn register_links(&mut self) {
        if let RoleState::Host(host) = &self.role {
            self.link_owner.extend(host.owners());
        }
    }

    // -- misc ---------------------------------------------------------------

    fn is_migrating(&self) -> bool {
        matches!(self.role, RoleState::Migrating { .. })
    }

    fn current_role(&self) -> Option<Role> {
        match self.role {
            RoleState::Host(_) => Some(Role::Host),
            RoleState::Client(_) => Some(Role::Client),
            RoleState::Migrating { .. } => None,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let transports = match &self.role {
            RoleState::Host(host) => host.peer_count(),
            RoleState::Client(client) => usize::from(client.is_connected()),
            RoleState::Migrating { .. } => 0,
        };
        SessionSnapshot {
            session: self.identity.session,
            local: self.identity.local,
            role: self.current_role(),
            host: self.host,
            members: self.members.values().cloned().collect(),
            priority: self.priority,
            transports,
            migrating: self.is_migrating(),
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    async fn shutdown(&mut self) {
        self.link_sink.kill();
        self.supervisor_sink.kill();
        self.handoff = None;
        if let Some(reply) = self.handoff_reply.take() {
            let _ = reply.send(Err(RoleError::Shutdown));
        }
        let role = std::mem::replace(
            &mut self.role,
            RoleState::Migrating {
                to: Role::Client,
                host: self.host,
            },
        );
        match role {
            RoleState::Host(host) => host.close_all(),
            RoleState::Client(client) => client.stop().await,
            RoleState::Migrating { .. } => {}
        }
        self.deferred.clear();
    }
}

/// Messages only a host may originate.
fn is_host_only(message: &PeerMessage) -> bool {
    matches!(
        message,
        PeerMessage::Welcome { .. }
            | PeerMessage::AssignSlot { .. }
            | PeerMessage::AssignTotalSlots { .. }
            | PeerMessage::Kick { .. }
            | PeerMessage::Spectator { .. }
            | PeerMessage::LaunchAs { .. }
    )
}

async fn next_handoff<K: Codec>(
    handoff: &mut Option<BoxFuture<'static, HandoffOutcome<K>>>,
) -> HandoffOutcome<K> {
    match handoff {
        Some(fut) => {
            let outcome = fut.await;
            *handoff = None;
            outcome
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_only_messages() {
        assert!(is_host_only(&PeerMessage::Kick {
            participant: ParticipantId(2),
            reason: KickReason::Removed,
        }));
        assert!(!is_host_only(&PeerMessage::Quit));
        assert!(!is_host_only(&PeerMessage::TextMessage { text: "gg".into() }));
    }

    #[test]
    fn test_mutating_commands_are_deferrable() {
        let (tx, _rx) = oneshot::channel();
        assert!(SessionCommand::ContestHost { reply: tx }.is_mutating());
        let (tx, _rx) = oneshot::channel();
        assert!(!SessionCommand::BecomeHost { reply: tx }.is_mutating());
        let (tx, _rx) = oneshot::channel();
        assert!(!SessionCommand::Snapshot { reply: tx }.is_mutating());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbox_numbers_envelopes() {
        let mut outbox = Outbox {
            local: ParticipantId(4),
            next_seq: 0,
            started: Instant::now(),
        };
        tokio::time::advance(std::time::Duration::from_millis(250)).await;
        let a = outbox.peer(PeerMessage::Go);
        let b = outbox.peer(PeerMessage::Go);
        assert_eq!((a.seq, b.seq), (0, 1));
        assert_eq!(a.timestamp, 250);
        assert_eq!(a.sender, ParticipantId(4));
    }
}
