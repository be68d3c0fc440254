//! The connection supervisor: one transport endpoint, one status machine.
//!
//! A supervisor runs as its own Tokio task (actor model). Owners talk to it
//! through a cloneable [`SupervisorHandle`] and hear back through an
//! [`EventSink`] that posts into the owner's queue.
//!
//! ```text
//!  NeverConnected ─┐
//!                  ├─→ Pending ─→ Connected ─→ Failed ──────────┐
//!  Disconnected ───┘      │           ├──────→ Broken ──────────┤
//!       ↑                 │           └──────→ PeerDisconnected ┤
//!       │                 └─→ Failed ───────────────────────────┤
//!       └───────────────────────────────────────────────────────┘
//!                       (then retry after the policy's delay)
//! ```
//!
//! Dialing, receiving, and the retry timer are all branches of one
//! `tokio::select!` loop, so transitions are serialized and cancelling a
//! pending retry is race-free.

use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::BoxFuture;
use parley_protocol::{Codec, Envelope};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::{AnyConnection, Backoff, Connection, EventSink, RetryPolicy, TransportError};

// ---------------------------------------------------------------------------
// ConnectionStatus
// ---------------------------------------------------------------------------

/// The status of one transport endpoint. Exactly one at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// No attempt was ever made.
    NeverConnected,
    /// An attempt is in flight.
    Pending,
    /// The transport is up.
    Connected,
    /// The attempt (or a send on the live transport) failed.
    Failed,
    /// The live transport broke without a clean close.
    Broken,
    /// The peer closed the transport cleanly.
    PeerDisconnected,
    /// Idle after a failure or a local disconnect.
    Disconnected,
}

impl ConnectionStatus {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (NeverConnected | Disconnected, Pending)
                | (Pending, Connected | Failed | Disconnected)
                | (Connected, Failed | Broken | PeerDisconnected | Disconnected)
                | (Failed | Broken | PeerDisconnected, Disconnected)
        )
    }

    /// Idle statuses from which a new attempt may start.
    pub fn is_idle(self) -> bool {
        matches!(self, Self::NeverConnected | Self::Disconnected)
    }

    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NeverConnected => "NeverConnected",
            Self::Pending => "Pending",
            Self::Connected => "Connected",
            Self::Failed => "Failed",
            Self::Broken => "Broken",
            Self::PeerDisconnected => "PeerDisconnected",
            Self::Disconnected => "Disconnected",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Dialer
// ---------------------------------------------------------------------------

/// Produces one established transport per call.
///
/// A direct dialer opens a socket; the matchmaking client runs a whole
/// rendezvous negotiation. Returning [`TransportError::Terminal`] tells the
/// supervisor that retrying cannot help.
pub trait Dialer: Send + Sync + 'static {
    type Connection: Connection;

    fn dial(&self) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// A dialer for transports that cannot be re-established by redialing,
/// such as a peer link inherited through a role handoff.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unroutable;

impl Dialer for Unroutable {
    type Connection = AnyConnection;

    async fn dial(&self) -> Result<AnyConnection, TransportError> {
        Err(TransportError::Terminal("no route back to this peer".into()))
    }
}

// ---------------------------------------------------------------------------
// Config, events, commands
// ---------------------------------------------------------------------------

/// Supervisor settings.
#[derive(Clone)]
pub struct SupervisorConfig {
    /// Retry after a failure without waiting for another `connect()`.
    pub auto_reconnect: bool,
    /// Consulted before every Pending attempt.
    pub retry: Arc<dyn RetryPolicy>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            retry: Arc::new(Backoff::default()),
        }
    }
}

impl fmt::Debug for SupervisorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorConfig")
            .field("auto_reconnect", &self.auto_reconnect)
            .finish_non_exhaustive()
    }
}

/// What a supervisor reports to its owner.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// Fired for every status transition.
    StatusChanged {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
    /// A well-formed envelope arrived.
    Message(Envelope),
    /// A frame arrived that does not decode. Status is unchanged; whether
    /// to disconnect is the owner's decision.
    InvalidMessage { reason: String },
    /// Dialing failed terminally. Fired once; no further attempts follow.
    GaveUp { reason: String },
}

enum SupervisorCommand {
    Connect,
    Disconnect,
    Send {
        envelope: Envelope,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Detach {
        reply: oneshot::Sender<Option<AnyConnection>>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running supervisor actor. Cheap to clone.
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::UnboundedSender<SupervisorCommand>,
    status: watch::Receiver<ConnectionStatus>,
    alive: Arc<AtomicBool>,
}

impl SupervisorHandle {
    /// Requests a connection. Retries per policy until connected, stopped,
    /// or a terminal failure.
    pub fn connect(&self) {
        let _ = self.commands.send(SupervisorCommand::Connect);
    }

    /// Drops the live transport (or the attempt in flight) and stops
    /// retrying.
    pub fn disconnect(&self) {
        let _ = self.commands.send(SupervisorCommand::Disconnect);
    }

    /// The current status. Always up to date.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// A receiver that wakes on every status change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Encodes and writes `envelope` on the live transport.
    pub async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SupervisorCommand::Send { envelope, reply })
            .map_err(|_| TransportError::Shutdown)?;
        rx.await.map_err(|_| TransportError::Shutdown)?
    }

    /// Stops the supervisor and closes its transport. Idempotent; safe from
    /// any status. No event is posted after this returns.
    pub async fn stop(&self) {
        self.alive.store(false, Ordering::Release);
        let (reply, rx) = oneshot::channel();
        if self.commands.send(SupervisorCommand::Stop { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stops the supervisor and hands over its live transport without
    /// closing it. Returns `None` if it was not connected.
    pub async fn stop_and_provide_open_connection(&self) -> Option<AnyConnection> {
        self.alive.store(false, Ordering::Release);
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SupervisorCommand::Detach { reply })
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Returns `true` once `stop` (or a detach) was requested.
    pub fn is_stopped(&self) -> bool {
        !self.alive.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// Entry points for starting supervisor actors.
pub struct ConnectionSupervisor;

impl ConnectionSupervisor {
    /// Spawns an idle supervisor (`NeverConnected`). Call
    /// [`SupervisorHandle::connect`] to start dialing.
    pub fn spawn<D: Dialer, K: Codec>(
        dialer: D,
        codec: K,
        config: SupervisorConfig,
        sink: EventSink<SupervisorEvent>,
    ) -> SupervisorHandle {
        start(dialer, codec, config, sink, None)
    }

    /// Spawns a supervisor that starts out `Connected` on an already
    /// established transport. `dialer` is used if it ever has to reconnect.
    pub fn adopt<D: Dialer, K: Codec>(
        conn: AnyConnection,
        dialer: D,
        codec: K,
        config: SupervisorConfig,
        sink: EventSink<SupervisorEvent>,
    ) -> SupervisorHandle {
        start(dialer, codec, config, sink, Some(conn))
    }
}

fn start<D: Dialer, K: Codec>(
    dialer: D,
    codec: K,
    config: SupervisorConfig,
    sink: EventSink<SupervisorEvent>,
    conn: Option<AnyConnection>,
) -> SupervisorHandle {
    // Each supervisor gets its own liveness flag, even if the owner hands
    // the same queue to several components.
    let sink = sink.fork();
    let initial = if conn.is_some() {
        ConnectionStatus::Connected
    } else {
        ConnectionStatus::NeverConnected
    };
    let (status_tx, status_rx) = watch::channel(initial);
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    let actor = SupervisorActor {
        dialer: Arc::new(dialer),
        codec,
        wants_connection: conn.is_some(),
        config,
        status: initial,
        status_tx,
        conn,
        dialing: None,
        retry_at: None,
        attempt: 0,
        alive: sink.liveness(),
        sink,
        commands: cmd_rx,
    };
    let alive = actor.alive.clone();
    tokio::spawn(actor.run());

    SupervisorHandle {
        commands: cmd_tx,
        status: status_rx,
        alive,
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

type DialFuture = BoxFuture<'static, Result<AnyConnection, TransportError>>;

struct SupervisorActor<D: Dialer, K: Codec> {
    dialer: Arc<D>,
    codec: K,
    config: SupervisorConfig,
    status: ConnectionStatus,
    status_tx: watch::Sender<ConnectionStatus>,
    conn: Option<AnyConnection>,
    dialing: Option<DialFuture>,
    retry_at: Option<Instant>,
    /// Set by `connect()`, cleared by `disconnect()`, stop, or give-up.
    wants_connection: bool,
    /// Consecutive attempts since the last successful connection.
    attempt: u32,
    alive: Arc<AtomicBool>,
    sink: EventSink<SupervisorEvent>,
    commands: mpsc::UnboundedReceiver<SupervisorCommand>,
}

impl<D: Dialer, K: Codec> SupervisorActor<D, K> {
    async fn run(mut self) {
        tracing::debug!(status = %self.status, "connection supervisor started");

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        // Every handle dropped.
                        self.teardown();
                        break;
                    };
                    if self.handle_command(cmd).await.is_break() {
                        break;
                    }
                }
                result = next_dial(&mut self.dialing) => {
                    self.on_dial_result(result);
                }
                frame = next_frame(self.conn.as_ref()) => {
                    self.on_frame(frame);
                }
                () = sleep_until(self.retry_at) => {
                    self.retry_at = None;
                    self.begin_attempt();
                }
            }
        }

        tracing::debug!(status = %self.status, "connection supervisor stopped");
    }

    async fn handle_command(&mut self, cmd: SupervisorCommand) -> ControlFlow<()> {
        match cmd {
            SupervisorCommand::Connect => {
                self.wants_connection = true;
                if self.status.is_idle() && self.dialing.is_none() && self.retry_at.is_none() {
                    self.schedule_attempt();
                }
            }
            SupervisorCommand::Disconnect => {
                self.wants_connection = false;
                self.cancel_attempts();
                self.close_live();
                if matches!(
                    self.status,
                    ConnectionStatus::Pending | ConnectionStatus::Connected
                ) {
                    self.transition(ConnectionStatus::Disconnected);
                }
            }
            SupervisorCommand::Send { envelope, reply } => {
                let result = self.send(&envelope).await;
                let _ = reply.send(result);
            }
            SupervisorCommand::Stop { reply } => {
                self.teardown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
            SupervisorCommand::Detach { reply } => {
                let conn = if self.status.is_connected() {
                    self.conn.take()
                } else {
                    None
                };
                match &conn {
                    Some(c) => {
                        tracing::info!(conn = %c.id(), "detaching live transport for handoff");
                        self.cancel_attempts();
                        self.wants_connection = false;
                        self.transition(ConnectionStatus::Disconnected);
                    }
                    None => self.teardown(),
                }
                let _ = reply.send(conn);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let Some(conn) = &self.conn else {
            return Err(TransportError::ConnectionClosed("not connected".into()));
        };
        let bytes = self.codec.encode(envelope)?;
        if let Err(e) = conn.send(&bytes).await {
            tracing::warn!(error = %e, "send on live transport failed");
            self.close_live();
            self.transition(ConnectionStatus::Failed);
            self.settle_and_retry();
            return Err(e);
        }
        Ok(())
    }

    fn on_dial_result(&mut self, result: Result<AnyConnection, TransportError>) {
        match result {
            Ok(conn) => {
                tracing::info!(conn = %conn.id(), "transport connected");
                self.conn = Some(conn);
                self.attempt = 0;
                self.transition(ConnectionStatus::Connected);
            }
            Err(e) if e.is_terminal() => {
                tracing::warn!(error = %e, "dial failed terminally, giving up");
                self.transition(ConnectionStatus::Failed);
                self.wants_connection = false;
                self.sink.post(SupervisorEvent::GaveUp {
                    reason: e.to_string(),
                });
                self.transition(ConnectionStatus::Disconnected);
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt = self.attempt, "dial failed");
                self.transition(ConnectionStatus::Failed);
                self.settle_and_retry();
            }
        }
    }

    fn on_frame(&mut self, frame: Result<Option<Vec<u8>>, TransportError>) {
        match frame {
            Ok(Some(bytes)) => match self.codec.decode::<Envelope>(&bytes) {
                Ok(envelope) => {
                    self.sink.post(SupervisorEvent::Message(envelope));
                }
                Err(e) => {
                    tracing::debug!(error = %e, "invalid frame received");
                    self.sink.post(SupervisorEvent::InvalidMessage {
                        reason: e.to_string(),
                    });
                }
            },
            Ok(None) => {
                tracing::info!("peer closed the transport");
                self.conn = None;
                self.transition(ConnectionStatus::PeerDisconnected);
                self.settle_and_retry();
            }
            Err(e) => {
                tracing::warn!(error = %e, "transport broke");
                self.close_live();
                self.transition(ConnectionStatus::Broken);
                self.settle_and_retry();
            }
        }
    }

    /// Asks the policy for a delay, then starts (or schedules) an attempt.
    fn schedule_attempt(&mut self) {
        let delay = self.config.retry.retry_delay(self.attempt, self.status);
        self.attempt = self.attempt.saturating_add(1);
        if delay.is_zero() {
            self.begin_attempt();
        } else {
            tracing::debug!(?delay, attempt = self.attempt, "retry scheduled");
            self.retry_at = Some(Instant::now() + delay);
        }
    }

    fn begin_attempt(&mut self) {
        if !self.wants_connection {
            return;
        }
        self.transition(ConnectionStatus::Pending);
        let dialer = Arc::clone(&self.dialer);
        self.dialing = Some(Box::pin(async move {
            dialer.dial().await.map(AnyConnection::new)
        }));
    }

    fn settle_and_retry(&mut self) {
        self.transition(ConnectionStatus::Disconnected);
        if self.wants_connection && self.config.auto_reconnect {
            self.schedule_attempt();
        }
    }

    fn cancel_attempts(&mut self) {
        self.retry_at = None;
        self.dialing = None;
    }

    /// Closes the live transport off the actor's queue.
    fn close_live(&mut self) {
        if let Some(conn) = self.conn.take() {
            tokio::spawn(async move {
                let _ = conn.close().await;
            });
        }
    }

    fn teardown(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.wants_connection = false;
        self.cancel_attempts();
        self.close_live();
        if matches!(
            self.status,
            ConnectionStatus::Pending | ConnectionStatus::Connected
        ) {
            self.transition(ConnectionStatus::Disconnected);
        }
    }

    fn transition(&mut self, to: ConnectionStatus) {
        let from = self.status;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            tracing::error!(%from, %to, "illegal connection status transition");
        }
        debug_assert!(
            from.can_transition_to(to),
            "illegal connection status transition {from} -> {to}"
        );
        self.status = to;
        self.status_tx.send_replace(to);
        tracing::debug!(%from, %to, "connection status changed");
        self.sink.post(SupervisorEvent::StatusChanged { from, to });
    }
}

async fn next_dial(dialing: &mut Option<DialFuture>) -> Result<AnyConnection, TransportError> {
    match dialing {
        Some(fut) => {
            let result = fut.await;
            *dialing = None;
            result
        }
        None => std::future::pending().await,
    }
}

async fn next_frame(
    conn: Option<&AnyConnection>,
) -> Result<Option<Vec<u8>>, TransportError> {
    match conn {
        Some(conn) => conn.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// =========================================================================
// Tests
// =========================================================================
