//! Lobby bridged onto a live session: votes travel as peer messages and the
//! launch outcome comes back as `LaunchAs`.

use std::time::Duration;

use parley::prelude::*;
use parley::lobby::{LobbySnapshot, RecordStatus};
use tokio::sync::broadcast;

const LOBBY: SessionId = SessionId(11);
const DUEL: ConfigId = ConfigId(1);
const ANN: ParticipantId = ParticipantId(1);
const BO: ParticipantId = ParticipantId(2);

async fn session_pair() -> (SessionHandle, SessionHandle) {
    let (host_end, client_end) = MemoryConnection::pair();
    let ann = SessionHandle::spawn_host(
        SessionIdentity::new(LOBBY, ANN, "ann"),
        JsonCodec,
        SessionConfig::default(),
        vec![],
    );
    ann.add_member(BO, "bo", AnyConnection::new(host_end)).await.unwrap();
    let bo = SessionHandle::spawn_client(
        SessionIdentity::new(LOBBY, BO, "bo"),
        JsonCodec,
        SessionConfig::default(),
        ANN,
        AnyConnection::new(client_end),
    );
    (ann, bo)
}

fn duel_lobby() -> LobbyHandle {
    duel_lobby_counting(2)
}

/// Halt grace is the lobby default of ten seconds.
fn duel_lobby_counting(countdown_secs: u32) -> LobbyHandle {
    let duel = LaunchConfig {
        quorum: 2,
        max_participants: 2,
        countdown_secs,
        ..LaunchConfig::new(DUEL, "duel")
    };
    spawn_lobby(LOBBY, LobbyConfig::default(), [duel])
}

fn duel_status(snap: &LobbySnapshot) -> Option<RecordStatus> {
    snap.records.first().map(|r| r.status())
}

/// Both members vote over the session; returns once the countdown runs.
async fn both_vote(ann: &SessionHandle, bo: &SessionHandle, lobby: &LobbyHandle) {
    lobby_until(lobby, |s| s.members.len() == 2).await;
    ann.send(PeerMessage::Vote { config: DUEL, enabled: true }).await.unwrap();
    bo.send(PeerMessage::Vote { config: DUEL, enabled: true }).await.unwrap();
    lobby_until(lobby, |s| duel_status(s) == Some(RecordStatus::Active)).await;
}

async fn lobby_until(lobby: &LobbyHandle, pred: impl Fn(&LobbySnapshot) -> bool) -> LobbySnapshot {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let snap = lobby.snapshot().await.unwrap();
            if pred(&snap) {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("lobby condition reached")
}

async fn next_launch(rx: &mut broadcast::Receiver<SessionEvent>) -> Launch {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let event = rx.recv().await.unwrap();
            if let Some(launch) = launch_from(&event) {
                return launch.clone();
            }
        }
    })
    .await
    .expect("launch delivered")
}

#[tokio::test(start_paused = true)]
async fn test_votes_over_session_launch_both_members() {
    let (ann, bo) = session_pair().await;
    let mut bo_events = bo.subscribe();
    let lobby = duel_lobby();
    let bridge = LobbyBridge::start(ann.clone(), lobby.clone()).await.unwrap();
    let mut ann_launch = bridge.subscribe_launch();

    lobby_until(&lobby, |s| s.members.len() == 2).await;

    ann.send(PeerMessage::Vote { config: DUEL, enabled: true }).await.unwrap();
    bo.send(PeerMessage::Vote { config: DUEL, enabled: true }).await.unwrap();

    let bo_launch = next_launch(&mut bo_events).await;
    let ann_launch = tokio::time::timeout(Duration::from_secs(30), ann_launch.recv())
        .await
        .expect("local outcome")
        .unwrap();

    let package = ann_launch.package().expect("ann is included").clone();
    assert_eq!(bo_launch.package(), Some(&package));
    assert_eq!(package.roster_ids().len(), 2);
    assert!(package.absentees.is_empty());

    let hosts = [&ann_launch, &bo_launch]
        .iter()
        .filter(|l| matches!(l, Launch::Host { .. }))
        .count();
    assert_eq!(hosts, 1);

    bridge.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_host_vote_over_session_reaches_lobby() {
    let (ann, _bo) = session_pair().await;
    let lobby = duel_lobby();
    let _bridge = LobbyBridge::start(ann.clone(), lobby.clone()).await.unwrap();
    lobby_until(&lobby, |s| s.members.len() == 2).await;

    ann.send(PeerMessage::Vote { config: DUEL, enabled: true }).await.unwrap();

    let snap = lobby_until(&lobby, |s| !s.records.is_empty()).await;
    assert_eq!(snap.records[0].votes(), &[ANN]);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_voter_halts_countdown_until_readmitted() {
    let (ann, bo) = session_pair().await;
    let lobby = duel_lobby_counting(10);
    let _bridge = LobbyBridge::start(ann.clone(), lobby.clone()).await.unwrap();
    both_vote(&ann, &bo, &lobby).await;

    bo.stop().await;
    let snap = lobby_until(&lobby, |s| duel_status(s) == Some(RecordStatus::Halted)).await;
    assert_eq!(snap.members.len(), 2, "bo stays in the lobby while halted");
    assert_eq!(snap.records[0].vote_count(), 2);

    let (host_end, client_end) = MemoryConnection::pair();
    ann.add_member(BO, "bo", AnyConnection::new(host_end)).await.unwrap();
    let bo_again = SessionHandle::spawn_client(
        SessionIdentity::new(LOBBY, BO, "bo"),
        JsonCodec,
        SessionConfig::default(),
        ANN,
        AnyConnection::new(client_end),
    );
    let mut bo_events = bo_again.subscribe();

    lobby_until(&lobby, |s| duel_status(s) == Some(RecordStatus::Active)).await;
    let launch = next_launch(&mut bo_events).await;
    assert!(launch.package().is_some_and(|p| p.includes(BO)));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_voter_is_dropped_after_grace() {
    let (ann, bo) = session_pair().await;
    let lobby = duel_lobby_counting(10);
    let _bridge = LobbyBridge::start(ann.clone(), lobby.clone()).await.unwrap();
    both_vote(&ann, &bo, &lobby).await;

    bo.stop().await;
    lobby_until(&lobby, |s| duel_status(s) == Some(RecordStatus::Halted)).await;

    let snap = lobby_until(&lobby, |s| s.members.len() == 1).await;
    assert!(snap.records.is_empty(), "halted countdown destroyed once grace ran out");
    assert!(snap.members.iter().all(|m| m.participant != BO));
}

#[tokio::test(start_paused = true)]
async fn test_quitting_member_leaves_lobby_at_once() {
    let (ann, bo) = session_pair().await;
    let lobby = duel_lobby();
    let _bridge = LobbyBridge::start(ann.clone(), lobby.clone()).await.unwrap();
    lobby_until(&lobby, |s| s.members.len() == 2).await;

    bo.send(PeerMessage::Vote { config: DUEL, enabled: true }).await.unwrap();
    lobby_until(&lobby, |s| !s.records.is_empty()).await;
    bo.send(PeerMessage::Quit).await.unwrap();

    let snap = lobby_until(&lobby, |s| s.members.len() == 1).await;
    assert!(snap.records.is_empty(), "bo's vote is withdrawn");
}

#[tokio::test(start_paused = true)]
async fn test_bridge_requires_hosting_session() {
    let (_ann, bo) = session_pair().await;
    let lobby = duel_lobby();

    let err = LobbyBridge::start(bo, lobby).await.err().expect("client cannot bridge");
    assert!(matches!(err, ParleyError::Role(parley::role::RoleError::NotHost)));
}

#[tokio::test(start_paused = true)]
async fn test_stopped_bridge_forwards_nothing() {
    let (ann, bo) = session_pair().await;
    let lobby = duel_lobby();
    let bridge = LobbyBridge::start(ann.clone(), lobby.clone()).await.unwrap();
    lobby_until(&lobby, |s| s.members.len() == 2).await;

    bridge.stop().await;
    bo.send(PeerMessage::Vote { config: DUEL, enabled: true }).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(lobby.snapshot().await.unwrap().records.is_empty());
}
