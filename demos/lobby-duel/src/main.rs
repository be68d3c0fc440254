//! Two participants meet in a lobby, vote for a duel, launch it, hand the
//! host role over mid-game and rewind to a checkpoint.
//!
//! Everything runs in one process over in-memory transports:
//!
//! ```text
//! cargo run -p lobby-duel
//! RUST_LOG=debug cargo run -p lobby-duel
//! ```

use std::time::Duration;

use parley::prelude::*;
use serde_json::json;

const ANN: ParticipantId = ParticipantId(1);
const BO: ParticipantId = ParticipantId(2);
const DUEL: ConfigId = ConfigId(1);

// ---------------------------------------------------------------------------
// Lobby
// ---------------------------------------------------------------------------

/// Runs the lobby until the duel commits. Returns Ann's and Bo's outcomes.
async fn run_lobby() -> Result<Option<(Launch, Launch)>, ParleyError> {
    let lobby_id = SessionId::random();
    let (ann_end, bo_end) = MemoryConnection::pair();

    let ann = SessionHandle::spawn_host(
        SessionIdentity::new(lobby_id, ANN, "ann"),
        JsonCodec,
        SessionConfig::default(),
        vec![],
    );
    ann.add_member(BO, "bo", AnyConnection::new(ann_end)).await?;
    let bo = SessionHandle::spawn_client(
        SessionIdentity::new(lobby_id, BO, "bo"),
        JsonCodec,
        SessionConfig::default(),
        ANN,
        AnyConnection::new(bo_end),
    );
    let mut bo_events = bo.subscribe();

    let duel = LaunchConfig {
        quorum: 2,
        max_participants: 2,
        countdown_secs: 3,
        ..LaunchConfig::new(DUEL, "duel")
    };
    let lobby = spawn_lobby(lobby_id, LobbyConfig::default(), [duel]);
    let bridge = LobbyBridge::start(ann.clone(), lobby.clone()).await?;
    let mut ann_outcome = bridge.subscribe_launch();

    while lobby.snapshot().await?.members.len() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tracing::info!(session = %lobby_id, "lobby open; both participants voting for the duel");

    ann.send(PeerMessage::Vote { config: DUEL, enabled: true }).await?;
    bo.send(PeerMessage::Vote { config: DUEL, enabled: true }).await?;

    let ann_launch = ann_outcome.recv().await.ok();
    let bo_launch = loop {
        match bo_events.recv().await {
            Ok(event) => {
                if let Some(launch) = launch_from(&event) {
                    break Some(launch.clone());
                }
            }
            Err(_) => break None,
        }
    };

    bridge.stop().await;
    lobby.shutdown().await;
    ann.stop().await;
    bo.stop().await;

    Ok(ann_launch.zip(bo_launch))
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

async fn wait_for_role(session: &SessionHandle, role: Role) -> Result<(), ParleyError> {
    loop {
        let snap = session.snapshot().await?;
        if snap.role == Some(role) && !snap.migrating {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn run_game(package: &SessionStartPackage) -> Result<(), ParleyError> {
    let (host, client) = if package.host == ANN { (ANN, BO) } else { (BO, ANN) };
    let name = |p: ParticipantId| {
        package
            .roster
            .iter()
            .find(|entry| entry.participant == p)
            .map(|entry| entry.name.clone())
            .unwrap_or_else(|| p.to_string())
    };
    tracing::info!(session = %package.session, %host, "duel launching");

    let (host_end, client_end) = MemoryConnection::pair();
    let game_host = SessionHandle::spawn_host(
        SessionIdentity::new(package.session, host, name(host)),
        JsonCodec,
        SessionConfig::default(),
        vec![],
    );
    game_host
        .add_member(client, name(client), AnyConnection::new(host_end))
        .await?;
    let game_client = SessionHandle::spawn_client(
        SessionIdentity::new(package.session, client, name(client)),
        JsonCodec,
        SessionConfig::default(),
        host,
        AnyConnection::new(client_end),
    );

    let store = CheckpointStore::in_memory();
    let key = package.session.to_string();
    let mut results = ResultSummary::new();

    results.add("round", 1);
    results.add("score", 10);
    game_host.send_game(b"round 1".to_vec()).await?;
    store.save_checkpoint(&key, 0, CheckpointRecord::new(json!({ "round": 1 }), results.clone()))?;

    results.add("round", 1);
    results.add("score", 25);
    game_host.send_game(b"round 2".to_vec()).await?;
    store.save(&key, CheckpointRecord::new(json!({ "round": 2 }), results.clone()))?;
    tracing::info!(score = results.get("score"), "round 2 saved");

    game_client.become_host().await?;
    wait_for_role(&game_host, Role::Client).await?;
    tracing::info!(new_host = %client, "host role handed over");

    let ticket = store.begin(&key, Resolution::Rewind(0), &mut results)?;
    tracing::info!(
        round = ?ticket.snapshot()["round"].as_u64(),
        score = results.get("score"),
        "rewound to checkpoint 0"
    );
    store.finish(ticket);

    game_client.stop().await;
    game_host.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ParleyError> {
    init_tracing();

    let Some((ann_launch, bo_launch)) = run_lobby().await? else {
        tracing::error!("lobby closed before the duel launched");
        return Ok(());
    };
    tracing::info!(ann = ?ann_launch, bo = ?bo_launch, "launch outcomes");

    match ann_launch.package() {
        Some(package) => run_game(package).await,
        None => {
            tracing::warn!("ann was left out of the duel");
            Ok(())
        }
    }
}
