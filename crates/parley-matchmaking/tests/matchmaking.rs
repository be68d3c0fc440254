//! Matchmaking client against scripted rendezvous and traversal fakes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley_matchmaking::{
    MatchmakingClient, MatchmakingConfig, MatchmakingError, MatchmakingEvent, RendezvousService,
    Traversal,
};
use parley_protocol::{
    JsonCodec, MatchTicket, ParticipantId, PeerCandidate, RejectReason, RendezvousReply,
    SessionId, TicketErrorCode,
};
use parley_transport::{
    Connection, ConnectionStatus, ConnectionSupervisor, Dialer, EventSink, MemoryConnection,
    SupervisorConfig, SupervisorEvent,
};
use tokio::sync::broadcast;

const SESSION: SessionId = SessionId(77);
const ME: ParticipantId = ParticipantId(1);
const PEER: ParticipantId = ParticipantId(2);

type Reply = Result<RendezvousReply, MatchmakingError>;

#[derive(Clone, Default)]
struct Counters {
    ticket_requests: Arc<AtomicUsize>,
    submissions: Arc<AtomicUsize>,
    traversals: Arc<AtomicUsize>,
}

/// Replays scripted replies. An exhausted ticket script hands out fresh
/// tickets; an exhausted submit script rejects with `Full`.
struct ScriptedRendezvous {
    tickets: Mutex<VecDeque<Reply>>,
    submits: Mutex<VecDeque<Reply>>,
    counters: Counters,
}

impl RendezvousService for ScriptedRendezvous {
    async fn request_ticket(&self, session: SessionId, _participant: ParticipantId) -> Reply {
        let n = self.counters.ticket_requests.fetch_add(1, Ordering::SeqCst);
        let next = self.tickets.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ticket_for(session, &format!("t{n}"))))
    }

    async fn submit_ticket(&self, _ticket: &MatchTicket) -> Reply {
        self.counters.submissions.fetch_add(1, Ordering::SeqCst);
        let next = self.submits.lock().unwrap().pop_front();
        next.unwrap_or(Ok(RendezvousReply::Reject {
            reason: RejectReason::Full,
        }))
    }
}

/// Succeeds or fails per script; successful traversals keep the remote
/// end alive.
struct ScriptedTraversal {
    outcomes: Mutex<VecDeque<bool>>,
    remotes: Mutex<Vec<MemoryConnection>>,
    counters: Counters,
}

impl Traversal for ScriptedTraversal {
    type Connection = MemoryConnection;

    async fn traverse(&self, peer: &PeerCandidate) -> Result<MemoryConnection, MatchmakingError> {
        self.counters.traversals.fetch_add(1, Ordering::SeqCst);
        let ok = self.outcomes.lock().unwrap().pop_front().unwrap_or(true);
        if !ok {
            return Err(MatchmakingError::Traversal(format!(
                "{} unreachable",
                peer.participant
            )));
        }
        let (remote, local) = MemoryConnection::pair();
        self.remotes.lock().unwrap().push(remote);
        Ok(local)
    }
}

fn ticket_for(session: SessionId, token: &str) -> RendezvousReply {
    RendezvousReply::Ticket {
        ticket: MatchTicket {
            session,
            token: token.into(),
        },
    }
}

fn matched() -> Reply {
    Ok(RendezvousReply::Match {
        peer: PeerCandidate {
            participant: PEER,
            addresses: vec!["10.0.0.2:7400".into()],
        },
    })
}

fn reject(reason: RejectReason) -> Reply {
    Ok(RendezvousReply::Reject { reason })
}

fn client(
    tickets: Vec<Reply>,
    submits: Vec<Reply>,
    traversals: Vec<bool>,
) -> (
    MatchmakingClient<ScriptedRendezvous, ScriptedTraversal>,
    Counters,
) {
    let counters = Counters::default();
    let service = ScriptedRendezvous {
        tickets: Mutex::new(tickets.into()),
        submits: Mutex::new(submits.into()),
        counters: counters.clone(),
    };
    let traversal = ScriptedTraversal {
        outcomes: Mutex::new(traversals.into()),
        remotes: Mutex::new(Vec::new()),
        counters: counters.clone(),
    };
    let client = MatchmakingClient::new(SESSION, ME, service, traversal, MatchmakingConfig::default());
    (client, counters)
}

fn drain(rx: &mut broadcast::Receiver<MatchmakingEvent>) -> Vec<MatchmakingEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// =========================================================================
// Happy paths
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_dial_match_then_traverse_establishes() {
    let (client, counters) = client(vec![], vec![matched()], vec![true]);
    let mut rx = client.subscribe();

    let conn = client.dial().await.expect("established");
    assert!(conn.send(b"hi").await.is_ok());

    assert_eq!(
        drain(&mut rx),
        vec![
            MatchmakingEvent::AcquiringTicket,
            MatchmakingEvent::TicketAcquired,
            MatchmakingEvent::Submitting,
            MatchmakingEvent::Matched { peer: PEER },
            MatchmakingEvent::Traversing { peer: PEER },
            MatchmakingEvent::Established { peer: PEER },
        ]
    );
    assert_eq!(counters.ticket_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dial_promise_is_polled_until_match() {
    let (client, counters) = client(
        vec![],
        vec![Ok(RendezvousReply::Promise), Ok(RendezvousReply::Promise), matched()],
        vec![],
    );
    let mut rx = client.subscribe();

    client.dial().await.expect("established");

    assert_eq!(counters.submissions.load(Ordering::SeqCst), 3);
    assert_eq!(counters.ticket_requests.load(Ordering::SeqCst), 1);
    let promised = drain(&mut rx)
        .into_iter()
        .filter(|e| *e == MatchmakingEvent::Promised)
        .count();
    assert_eq!(promised, 2);
}

// =========================================================================
// Recoverable failures
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_dial_blank_ticket_is_reacquired() {
    let (client, counters) = client(vec![Ok(ticket_for(SESSION, "   "))], vec![matched()], vec![]);

    client.dial().await.expect("established");

    assert_eq!(counters.ticket_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dial_ticket_for_other_session_is_not_used() {
    let (client, counters) = client(
        vec![Ok(ticket_for(SessionId(5), "stale"))],
        vec![matched()],
        vec![],
    );

    client.dial().await.expect("established");

    assert_eq!(counters.ticket_requests.load(Ordering::SeqCst), 2);
    assert_eq!(counters.submissions.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dial_ticket_timeout_code_retries() {
    let (client, counters) = client(
        vec![Ok(RendezvousReply::Error {
            code: TicketErrorCode::Timeout,
            reason: "slow".into(),
        })],
        vec![matched()],
        vec![],
    );

    client.dial().await.expect("established");
    assert_eq!(counters.ticket_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dial_expired_ticket_is_reacquired() {
    let (client, counters) = client(
        vec![],
        vec![reject(RejectReason::MatchticketExpired), matched()],
        vec![],
    );

    client.dial().await.expect("established");

    assert_eq!(counters.ticket_requests.load(Ordering::SeqCst), 2);
    assert_eq!(counters.submissions.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dial_port_randomization_resubmits_same_ticket() {
    let (client, counters) = client(
        vec![],
        vec![reject(RejectReason::PortRandomization), matched()],
        vec![],
    );

    client.dial().await.expect("established");

    assert_eq!(counters.ticket_requests.load(Ordering::SeqCst), 1);
    assert_eq!(counters.submissions.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dial_traversal_failure_returns_to_submit() {
    let (client, counters) = client(vec![], vec![matched(), matched()], vec![false, true]);

    client.dial().await.expect("established");

    assert_eq!(counters.ticket_requests.load(Ordering::SeqCst), 1);
    assert_eq!(counters.submissions.load(Ordering::SeqCst), 2);
    assert_eq!(counters.traversals.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dial_sustained_failure_emits_one_still_trying() {
    let mut submits: Vec<Reply> = (0..10).map(|_| reject(RejectReason::Full)).collect();
    submits.push(matched());
    let (client, _) = client(vec![], submits, vec![]);
    let mut rx = client.subscribe();

    client.dial().await.expect("established");

    let events = drain(&mut rx);
    let still_trying = events
        .iter()
        .filter(|e| matches!(e, MatchmakingEvent::StillTrying { .. }))
        .count();
    let retries = events
        .iter()
        .filter(|e| matches!(e, MatchmakingEvent::Retrying { .. }))
        .count();
    assert_eq!(still_trying, 1);
    assert_eq!(retries, 10);
}

// =========================================================================
// Terminal failures
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_dial_session_closed_is_terminal() {
    let (client, counters) = client(
        vec![Ok(RendezvousReply::Error {
            code: TicketErrorCode::SessionClosed,
            reason: "lobby ended".into(),
        })],
        vec![],
        vec![],
    );
    let mut rx = client.subscribe();

    let err = client.dial().await.unwrap_err();
    assert!(err.is_terminal());
    assert_eq!(counters.submissions.load(Ordering::SeqCst), 0);
    assert!(matches!(
        drain(&mut rx).last(),
        Some(MatchmakingEvent::GaveUp { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_nonce_stops_supervisor_with_one_gave_up() {
    let (client, counters) = client(vec![], vec![reject(RejectReason::InvalidNonce)], vec![]);
    let mut progress = client.subscribe();

    let (sink, mut events) = EventSink::channel();
    let handle = ConnectionSupervisor::spawn(client, JsonCodec, SupervisorConfig::default(), sink);
    handle.connect();

    let mut supervisor_gave_up = 0;
    loop {
        match events.recv().await.expect("supervisor queue") {
            SupervisorEvent::GaveUp { .. } => supervisor_gave_up += 1,
            SupervisorEvent::StatusChanged {
                to: ConnectionStatus::Disconnected,
                ..
            } => break,
            _ => {}
        }
    }

    // Long enough for any retry timer to have fired.
    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(supervisor_gave_up, 1);
    assert!(events.try_recv().is_err(), "no further connect attempts");
    assert_eq!(counters.ticket_requests.load(Ordering::SeqCst), 1);
    assert_eq!(counters.submissions.load(Ordering::SeqCst), 1);
    assert_eq!(handle.status(), ConnectionStatus::Disconnected);

    let gave_up = drain(&mut progress)
        .into_iter()
        .filter(|e| matches!(e, MatchmakingEvent::GaveUp { .. }))
        .count();
    assert_eq!(gave_up, 1);
}
