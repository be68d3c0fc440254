//! Checkpoint store behavior over both backends.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use parley_checkpoint::{
    CheckpointBackend, CheckpointConfig, CheckpointError, CheckpointRecord, CheckpointStore,
    FileBackend, MemoryBackend, Resolution, ResultSummary, Slot,
};
use serde_json::json;

fn record(level: u32, score: i64) -> CheckpointRecord {
    CheckpointRecord::new(json!({ "level": level }), ResultSummary::new().with("score", score))
}

fn level(record: &CheckpointRecord) -> u64 {
    record.snapshot["level"].as_u64().unwrap_or(u64::MAX)
}

/// Memory backend whose first shadow removal reports in and then stalls
/// until released (or a timeout passes).
struct StallingBackend {
    inner: MemoryBackend,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<Option<mpsc::Receiver<()>>>,
}

impl CheckpointBackend for StallingBackend {
    fn read(&self, key: &str, slot: Slot) -> Result<Option<CheckpointRecord>, CheckpointError> {
        self.inner.read(key, slot)
    }

    fn write(&self, key: &str, slot: Slot, record: &CheckpointRecord) -> Result<(), CheckpointError> {
        self.inner.write(key, slot, record)
    }

    fn remove(&self, key: &str, slot: Slot) -> Result<bool, CheckpointError> {
        if slot == Slot::Shadow {
            let entered = self.entered.lock().unwrap().take();
            let release = self.release.lock().unwrap().take();
            if let (Some(entered), Some(release)) = (entered, release) {
                entered.send(()).unwrap();
                let _ = release.recv_timeout(Duration::from_secs(5));
            }
        }
        self.inner.remove(key, slot)
    }
}

// =========================================================================
// Saves
// =========================================================================

#[test]
fn test_load_prefers_ephemeral_save() {
    let store = CheckpointStore::in_memory();
    store.save("run", record(1, 10)).unwrap();
    store.save_ephemeral("run", record(2, 20)).unwrap();

    let loaded = store.load("run").unwrap().unwrap();
    assert_eq!(level(&loaded), 2);
    assert!(loaded.ephemeral);
}

#[test]
fn test_ephemeral_save_racing_a_commit_is_not_lost() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let backend = StallingBackend {
        inner: MemoryBackend::new(),
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(Some(release_rx)),
    };
    let store = Arc::new(CheckpointStore::new(backend, CheckpointConfig::default()));
    store
        .save_ephemeral("run", CheckpointRecord::new(json!({ "turn": 1 }), ResultSummary::new()))
        .unwrap();

    let committer = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.commit_ephemeral("run").unwrap())
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let saver = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            store
                .save_ephemeral("run", CheckpointRecord::new(json!({ "turn": 2 }), ResultSummary::new()))
                .unwrap()
        })
    };
    thread::sleep(Duration::from_millis(100));
    release_tx.send(()).unwrap();

    assert!(committer.join().unwrap());
    saver.join().unwrap();

    let loaded = store.load("run").unwrap().unwrap();
    assert_eq!(loaded.snapshot, json!({ "turn": 2 }));
    assert!(loaded.ephemeral);
    let durable = store.backend().inner.read("run", Slot::Primary).unwrap().unwrap();
    assert_eq!(durable.snapshot, json!({ "turn": 1 }));
}

#[test]
fn test_second_ephemeral_save_overwrites_first() {
    let store = CheckpointStore::in_memory();
    store.save_ephemeral("run", record(2, 20)).unwrap();
    store.save_ephemeral("run", record(3, 30)).unwrap();

    assert_eq!(level(&store.load("run").unwrap().unwrap()), 3);
}

#[test]
fn test_discard_restores_last_durable_save() {
    let store = CheckpointStore::in_memory();
    store.save("run", record(1, 10)).unwrap();
    store.save_ephemeral("run", record(2, 20)).unwrap();

    assert!(store.discard_ephemeral("run").unwrap());

    let loaded = store.load("run").unwrap().unwrap();
    assert_eq!(level(&loaded), 1);
    assert!(!loaded.ephemeral);
}

#[test]
fn test_discard_after_commit_is_noop() {
    let store = CheckpointStore::in_memory();
    store.save("run", record(1, 10)).unwrap();
    store.save_ephemeral("run", record(2, 20)).unwrap();

    assert!(store.commit_ephemeral("run").unwrap());
    assert!(!store.discard_ephemeral("run").unwrap());

    let loaded = store.load("run").unwrap().unwrap();
    assert_eq!(level(&loaded), 2);
    assert!(!loaded.ephemeral);
}

#[test]
fn test_commit_without_ephemeral_returns_false() {
    let store = CheckpointStore::in_memory();
    assert!(!store.commit_ephemeral("run").unwrap());
    assert!(store.load("run").unwrap().is_none());
}

#[test]
fn test_checkpoints_are_separate_from_primary_save() {
    let store = CheckpointStore::in_memory();
    store.save_checkpoint("run", 0, record(1, 10)).unwrap();

    assert!(store.load("run").unwrap().is_none());
    assert_eq!(level(&store.load_checkpoint("run", 0).unwrap().unwrap()), 1);
    assert!(store.load_checkpoint("run", 1).unwrap().is_none());
}

#[test]
fn test_every_write_bumps_version() {
    let store = CheckpointStore::in_memory();
    assert_eq!(store.version("run").unwrap(), 0);
    assert_eq!(store.save("run", record(1, 1)).unwrap(), 1);
    assert_eq!(store.save_ephemeral("run", record(2, 2)).unwrap(), 2);
    assert_eq!(store.save_checkpoint("run", 0, record(2, 2)).unwrap(), 3);
    store.commit_ephemeral("run").unwrap();
    assert_eq!(store.version("run").unwrap(), 4);
    assert_eq!(store.version("other").unwrap(), 0);
}

#[test]
fn test_checkpoint_index_is_bounded() {
    let store = CheckpointStore::new(
        parley_checkpoint::MemoryBackend::new(),
        CheckpointConfig { max_checkpoints: 2 },
    );
    assert!(matches!(
        store.save_checkpoint("run", 2, record(1, 1)),
        Err(CheckpointError::IndexOutOfRange { index: 2, max: 2 })
    ));
}

#[test]
fn test_key_with_path_separator_is_rejected() {
    let store = CheckpointStore::in_memory();
    assert!(matches!(
        store.save("../escape", record(1, 1)),
        Err(CheckpointError::InvalidKey(_))
    ));
}

// =========================================================================
// Resolution
// =========================================================================

#[test]
fn test_continue_replaces_live_results() {
    let store = CheckpointStore::in_memory();
    store.save("run", record(4, 40)).unwrap();
    let mut live = ResultSummary::new().with("score", 99).with("deaths", 3);

    let ticket = store.begin("run", Resolution::Continue, &mut live).unwrap();

    assert_eq!(ticket.snapshot()["level"], 4);
    assert_eq!(live, ResultSummary::new().with("score", 40));
    store.finish(ticket);
}

#[test]
fn test_replay_replaces_live_results_with_checkpoint() {
    let store = CheckpointStore::in_memory();
    store.save_checkpoint("run", 1, record(2, 15)).unwrap();
    let mut live = ResultSummary::new().with("score", 70);

    let ticket = store.begin("run", Resolution::Replay(1), &mut live).unwrap();

    assert_eq!(live.get("score"), 15);
    store.finish(ticket);
}

#[test]
fn test_rewind_after_continue_restores_checkpoint_accumulator() {
    let store = CheckpointStore::in_memory();
    store.save_checkpoint("run", 0, record(1, 10)).unwrap();
    store.save("run", record(5, 80)).unwrap();

    let mut live = ResultSummary::new();
    let ticket = store.begin("run", Resolution::Continue, &mut live).unwrap();
    store.finish(ticket);
    assert_eq!(live.get("score"), 80);
    live.add("deaths", 2);
    live.add("coins", 7);

    let ticket = store.begin("run", Resolution::Rewind(0), &mut live).unwrap();

    assert_eq!(live.get("score"), 10);
    assert_eq!(live.get("deaths"), 0, "counters started after the checkpoint are reset");
    assert_eq!(live.get("coins"), 0);
    store.finish(ticket);
}

#[test]
fn test_second_resolution_while_in_flight_fails() {
    let store = CheckpointStore::in_memory();
    store.save("run", record(1, 10)).unwrap();
    store.save_checkpoint("run", 0, record(0, 0)).unwrap();
    let mut live = ResultSummary::new();

    let ticket = store.begin("run", Resolution::Continue, &mut live).unwrap();
    assert!(store.is_resolving("run"));
    assert!(matches!(
        store.begin("run", Resolution::Rewind(0), &mut live),
        Err(CheckpointError::ResolutionInFlight(_))
    ));
    assert_eq!(live.get("score"), 10, "failed begin leaves results alone");

    store.finish(ticket);
    assert!(!store.is_resolving("run"));
    let ticket = store.begin("run", Resolution::Replay(0), &mut live).unwrap();
    store.finish(ticket);
}

#[test]
fn test_begin_on_missing_record_does_not_lock_key() {
    let store = CheckpointStore::in_memory();
    let mut live = ResultSummary::new();

    assert!(matches!(
        store.begin("run", Resolution::Replay(3), &mut live),
        Err(CheckpointError::NotFound { .. })
    ));
    assert!(!store.is_resolving("run"));
}

// =========================================================================
// File backend and async saves
// =========================================================================

#[test]
fn test_file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = CheckpointStore::new(FileBackend::new(dir.path()), CheckpointConfig::default());
        store.save("run", record(1, 10)).unwrap();
        store.save_ephemeral("run", record(2, 20)).unwrap();
    }

    let store = CheckpointStore::new(FileBackend::new(dir.path()), CheckpointConfig::default());
    assert_eq!(level(&store.load("run").unwrap().unwrap()), 2);
    assert_eq!(store.version("run").unwrap(), 2);
    assert_eq!(store.save("run", record(3, 30)).unwrap(), 3);
}

#[tokio::test]
async fn test_save_async_is_visible_after_completion() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(FileBackend::new(dir.path()), CheckpointConfig::default());

    let version = store.save_async("run", record(7, 70)).await.unwrap();

    assert_eq!(version, 1);
    assert_eq!(level(&store.load("run").unwrap().unwrap()), 7);

    store.save_ephemeral_async("run", record(8, 80)).await.unwrap();
    assert!(store.load("run").unwrap().unwrap().ephemeral);
}
