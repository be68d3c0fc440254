//! The two role strategies a session swaps between.
//!
//! A [`HostRole`] owns one [`PeerLink`] per member. The local participant
//! is a member of its own host layer through a loopback pair:
//!
//! ```text
//!   local send ─→ loopback ══ memory pair ══ self link ─→ host relay ─→ peers
//!   apply ←──── loopback ←═══════════════════ self link ←── host relay ←── peers
//! ```
//!
//! so the host's own traffic takes the same path as everyone else's.
//!
//! A [`ClientRole`] is a connection supervisor adopted onto the transport
//! that leads to the host.

use std::collections::HashMap;

use parley_protocol::{Codec, Envelope, ParticipantId};
use parley_transport::{
    AnyConnection, Connection, ConnectionId, ConnectionSupervisor, EventSink, LinkEvent,
    MemoryConnection, PeerLink, SupervisorConfig, SupervisorEvent, SupervisorHandle, Unroutable,
};

use crate::RoleError;

/// Who sits at the far end of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkOwner {
    /// A member's transport, including the host end of the loopback.
    Member(ParticipantId),
    /// The local participant's end of the loopback.
    Loopback,
}

pub(crate) struct HostRole<K: Codec> {
    local: ParticipantId,
    links: HashMap<ParticipantId, PeerLink<K>>,
    loopback: PeerLink<K>,
    sink: EventSink<LinkEvent>,
    accepting: bool,
}

impl<K: Codec> HostRole<K> {
    /// Builds a host layer seeded with a fresh loopback and `peers`.
    pub(crate) fn new(
        local: ParticipantId,
        codec: K,
        sink: &EventSink<LinkEvent>,
        peers: Vec<(ParticipantId, AnyConnection)>,
    ) -> Self {
        let sink = sink.fork();
        let (self_end, local_end) = MemoryConnection::pair();

        let mut links = HashMap::new();
        links.insert(
            local,
            PeerLink::spawn(AnyConnection::new(self_end), codec.clone(), sink.clone()),
        );
        let loopback = PeerLink::spawn(AnyConnection::new(local_end), codec.clone(), sink.clone());

        for (participant, conn) in peers {
            links.insert(participant, PeerLink::spawn(conn, codec.clone(), sink.clone()));
        }

        Self {
            local,
            links,
            loopback,
            sink,
            accepting: true,
        }
    }

    /// Every link id this layer owns, with its owner.
    pub(crate) fn owners(&self) -> Vec<(ConnectionId, LinkOwner)> {
        self.links
            .iter()
            .map(|(p, link)| (link.id(), LinkOwner::Member(*p)))
            .chain(std::iter::once((self.loopback.id(), LinkOwner::Loopback)))
            .collect()
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub(crate) fn stop_accepting(&mut self) {
        self.accepting = false;
    }

    pub(crate) fn has(&self, participant: ParticipantId) -> bool {
        self.links.contains_key(&participant)
    }

    /// Members reachable over a real transport.
    pub(crate) fn peer_count(&self) -> usize {
        self.links.len().saturating_sub(1)
    }

    pub(crate) fn add(&mut self, participant: ParticipantId, conn: AnyConnection, codec: K) -> ConnectionId {
        let link = PeerLink::spawn(conn, codec, self.sink.clone());
        let id = link.id();
        if let Some(old) = self.links.insert(participant, link) {
            old.close();
        }
        id
    }

    /// Drops a member's link, closing its transport.
    pub(crate) fn remove(&mut self, participant: ParticipantId) -> bool {
        match self.links.remove(&participant) {
            Some(link) => {
                link.close();
                true
            }
            None => false,
        }
    }

    /// Local participant → own host layer.
    pub(crate) fn send_local(&self, envelope: &Envelope) -> Result<(), RoleError> {
        self.loopback.send(envelope).map_err(RoleError::from)
    }

    pub(crate) fn send_to(&self, participant: ParticipantId, envelope: &Envelope) -> Result<(), RoleError> {
        let link = self
            .links
            .get(&participant)
            .ok_or(RoleError::NoLink(participant))?;
        link.send(envelope).map_err(RoleError::from)
    }

    /// Sends to every member except `from`.
    pub(crate) fn relay(&self, from: ParticipantId, envelope: &Envelope) {
        for (participant, link) in &self.links {
            if *participant == from {
                continue;
            }
            if let Err(e) = link.send(envelope) {
                tracing::warn!(%participant, error = %e, "relay failed");
            }
        }
    }

    /// Sends to every member, the local participant included.
    pub(crate) fn broadcast(&self, envelope: &Envelope) {
        for (participant, link) in &self.links {
            if let Err(e) = link.send(envelope) {
                tracing::warn!(%participant, error = %e, "broadcast failed");
            }
        }
    }

    /// Suspends the layer and hands back every open peer transport. The
    /// loopback is closed.
    pub(crate) async fn detach_all(self) -> Vec<(ParticipantId, AnyConnection)> {
        self.sink.kill();
        let mut detached = Vec::with_capacity(self.links.len());
        for (participant, link) in self.links {
            if participant == self.local {
                link.close();
                continue;
            }
            match link.detach().await {
                Some(conn) => detached.push((participant, conn)),
                None => tracing::debug!(%participant, "link already gone at detach"),
            }
        }
        self.loopback.close();
        detached
    }

    pub(crate) fn close_all(self) {
        self.sink.kill();
        for link in self.links.into_values() {
            link.close();
        }
        self.loopback.close();
    }
}

pub(crate) struct ClientRole {
    host: ParticipantId,
    supervisor: SupervisorHandle,
}

impl ClientRole {
    /// Adopts an established transport to `host`. A transport inherited
    /// this way cannot be redialed, so losing it ends in `GaveUp`.
    pub(crate) fn adopt<K: Codec>(
        host: ParticipantId,
        conn: AnyConnection,
        codec: K,
        config: SupervisorConfig,
        sink: &EventSink<SupervisorEvent>,
    ) -> Self {
        tracing::debug!(%host, conn = %conn.id(), "client role adopting transport");
        let supervisor = ConnectionSupervisor::adopt(conn, Unroutable, codec, config, sink.clone());
        Self { host, supervisor }
    }

    pub(crate) fn host(&self) -> ParticipantId {
        self.host
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.supervisor.status().is_connected()
    }

    pub(crate) async fn send(&self, envelope: Envelope) -> Result<(), RoleError> {
        self.supervisor.send(envelope).await.map_err(RoleError::from)
    }

    pub(crate) async fn detach(self) -> Option<AnyConnection> {
        self.supervisor.stop_and_provide_open_connection().await
    }

    pub(crate) async fn stop(self) {
        self.supervisor.stop().await;
    }
}
