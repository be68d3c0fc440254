//! The checkpoint store: durable and ephemeral saves, numbered checkpoints,
//! and continue / replay / rewind resolution.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    CheckpointBackend, CheckpointConfig, CheckpointError, CheckpointRecord, MemoryBackend,
    ResultSummary, Slot,
};

/// How a session picks up from stored progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Resume from the latest save (the shadow slot if present). Replaces
    /// the live results.
    Continue,
    /// Restart from checkpoint `i`. Replaces the live results.
    Replay(u32),
    /// Go back to checkpoint `i`, applying its results as a delta over the
    /// live ones.
    Rewind(u32),
}

impl Resolution {
    fn slot(self) -> Option<Slot> {
        match self {
            Self::Continue => None,
            Self::Replay(i) | Self::Rewind(i) => Some(Slot::Checkpoint(i)),
        }
    }
}

/// Proof that a resolution is in flight. Hand it back to
/// [`CheckpointStore::finish`] once the session has restored the snapshot.
#[derive(Debug)]
#[must_use = "the key stays locked until the ticket is passed to finish()"]
pub struct ResolutionTicket {
    key: String,
    resolution: Resolution,
    record: CheckpointRecord,
}

impl ResolutionTicket {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// The record the session resumes from.
    pub fn record(&self) -> &CheckpointRecord {
        &self.record
    }

    pub fn snapshot(&self) -> &serde_json::Value {
        &self.record.snapshot
    }
}

struct Inner<B> {
    backend: B,
    config: CheckpointConfig,
    /// Last version written per key. Seeded from the backend on first use.
    versions: Mutex<HashMap<String, u64>>,
    resolving: Mutex<HashSet<String>>,
}

/// Keyed session checkpoints over a [`CheckpointBackend`].
///
/// Synchronous methods are read-after-write consistent. Clones share the
/// same backend and bookkeeping.
pub struct CheckpointStore<B = MemoryBackend> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for CheckpointStore<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl CheckpointStore<MemoryBackend> {
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new(), CheckpointConfig::default())
    }
}

impl<B: CheckpointBackend> CheckpointStore<B> {
    pub fn new(backend: B, config: CheckpointConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                config: config.validated(),
                versions: Mutex::new(HashMap::new()),
                resolving: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    // -- saves --------------------------------------------------------------

    /// Overwrites the durable save. Returns the new version.
    pub fn save(&self, key: &str, record: CheckpointRecord) -> Result<u64, CheckpointError> {
        self.write(key, Slot::Primary, record, false)
    }

    /// Writes the shadow slot, replacing any earlier ephemeral save whole.
    pub fn save_ephemeral(&self, key: &str, record: CheckpointRecord) -> Result<u64, CheckpointError> {
        self.write(key, Slot::Shadow, record, true)
    }

    /// Writes numbered checkpoint `index`.
    pub fn save_checkpoint(
        &self,
        key: &str,
        index: u32,
        record: CheckpointRecord,
    ) -> Result<u64, CheckpointError> {
        self.check_index(index)?;
        self.write(key, Slot::Checkpoint(index), record, false)
    }

    /// Promotes the ephemeral save to the durable slot. Returns `false` when
    /// there was nothing to promote.
    pub fn commit_ephemeral(&self, key: &str) -> Result<bool, CheckpointError> {
        validate_key(key)?;
        // Held from the shadow read to its removal: no ephemeral save lands
        // between the promotion and the delete.
        let mut versions = self.versions();
        let Some(shadow) = self.inner.backend.read(key, Slot::Shadow)? else {
            return Ok(false);
        };
        let version = self.write_locked(&mut versions, key, Slot::Primary, shadow, false)?;
        self.inner.backend.remove(key, Slot::Shadow)?;
        tracing::info!(key, version, "ephemeral save committed");
        Ok(true)
    }

    /// Drops the ephemeral save. A no-op when there is none, including right
    /// after a commit.
    pub fn discard_ephemeral(&self, key: &str) -> Result<bool, CheckpointError> {
        validate_key(key)?;
        let _versions = self.versions();
        let removed = self.inner.backend.remove(key, Slot::Shadow)?;
        if removed {
            tracing::debug!(key, "ephemeral save discarded");
        }
        Ok(removed)
    }

    /// [`save`](Self::save) on a blocking thread.
    ///
    /// The record moves into the task, so the caller cannot touch the
    /// snapshot until the write has finished. Must be called from within a
    /// Tokio runtime; the write starts immediately, not on first poll.
    pub fn save_async(
        &self,
        key: impl Into<String>,
        record: CheckpointRecord,
    ) -> impl Future<Output = Result<u64, CheckpointError>> + Send + 'static {
        let store = self.clone();
        let key = key.into();
        spawn_write(move || store.save(&key, record))
    }

    /// [`save_ephemeral`](Self::save_ephemeral) on a blocking thread.
    pub fn save_ephemeral_async(
        &self,
        key: impl Into<String>,
        record: CheckpointRecord,
    ) -> impl Future<Output = Result<u64, CheckpointError>> + Send + 'static {
        let store = self.clone();
        let key = key.into();
        spawn_write(move || store.save_ephemeral(&key, record))
    }

    // -- loads --------------------------------------------------------------

    /// The latest save: the ephemeral one while present, else the durable.
    pub fn load(&self, key: &str) -> Result<Option<CheckpointRecord>, CheckpointError> {
        validate_key(key)?;
        match self.inner.backend.read(key, Slot::Shadow)? {
            Some(shadow) => Ok(Some(shadow)),
            None => self.inner.backend.read(key, Slot::Primary),
        }
    }

    pub fn load_checkpoint(
        &self,
        key: &str,
        index: u32,
    ) -> Result<Option<CheckpointRecord>, CheckpointError> {
        validate_key(key)?;
        self.check_index(index)?;
        self.inner.backend.read(key, Slot::Checkpoint(index))
    }

    /// Last version written under `key`; 0 if never written.
    pub fn version(&self, key: &str) -> Result<u64, CheckpointError> {
        validate_key(key)?;
        let mut versions = self.versions();
        self.seed_version(&mut versions, key)
    }

    // -- resolution ---------------------------------------------------------

    /// Starts resuming `key` and updates `live` to match.
    ///
    /// Only one resolution may be in flight per key until its ticket is
    /// handed to [`finish`](Self::finish).
    pub fn begin(
        &self,
        key: &str,
        resolution: Resolution,
        live: &mut ResultSummary,
    ) -> Result<ResolutionTicket, CheckpointError> {
        validate_key(key)?;
        if let Some(Slot::Checkpoint(index)) = resolution.slot() {
            self.check_index(index)?;
        }
        if !self.resolving().insert(key.to_owned()) {
            tracing::error!(key, ?resolution, "resolution started while another is in flight");
            return Err(CheckpointError::ResolutionInFlight(key.to_owned()));
        }

        let record = match self.resolve_record(key, resolution) {
            Ok(record) => record,
            Err(e) => {
                self.resolving().remove(key);
                return Err(e);
            }
        };

        match resolution {
            Resolution::Continue | Resolution::Replay(_) => *live = record.result.clone(),
            Resolution::Rewind(_) => {
                let delta = record.result.delta(live);
                live.apply(&delta);
            }
        }
        tracing::info!(key, ?resolution, version = record.version, "resolution started");

        Ok(ResolutionTicket {
            key: key.to_owned(),
            resolution,
            record,
        })
    }

    /// Ends the resolution `ticket` stands for.
    pub fn finish(&self, ticket: ResolutionTicket) {
        self.resolving().remove(&ticket.key);
        tracing::debug!(key = %ticket.key, resolution = ?ticket.resolution, "resolution finished");
    }

    pub fn is_resolving(&self, key: &str) -> bool {
        self.resolving().contains(key)
    }

    // -- internals ----------------------------------------------------------

    fn resolve_record(&self, key: &str, resolution: Resolution) -> Result<CheckpointRecord, CheckpointError> {
        let found = match resolution.slot() {
            None => self.load(key)?,
            Some(slot) => self.inner.backend.read(key, slot)?,
        };
        found.ok_or_else(|| CheckpointError::NotFound {
            key: key.to_owned(),
            slot: resolution.slot().unwrap_or(Slot::Primary),
        })
    }

    fn write(
        &self,
        key: &str,
        slot: Slot,
        record: CheckpointRecord,
        ephemeral: bool,
    ) -> Result<u64, CheckpointError> {
        validate_key(key)?;
        // Held across the backend write: versions reach storage in issue order.
        let mut versions = self.versions();
        self.write_locked(&mut versions, key, slot, record, ephemeral)
    }

    fn write_locked(
        &self,
        versions: &mut HashMap<String, u64>,
        key: &str,
        slot: Slot,
        mut record: CheckpointRecord,
        ephemeral: bool,
    ) -> Result<u64, CheckpointError> {
        let version = self.seed_version(versions, key)? + 1;

        record.ephemeral = ephemeral;
        record.version = version;
        self.inner.backend.write(key, slot, &record)?;
        versions.insert(key.to_owned(), version);

        tracing::debug!(key, %slot, version, "checkpoint written");
        Ok(version)
    }

    fn seed_version(
        &self,
        versions: &mut HashMap<String, u64>,
        key: &str,
    ) -> Result<u64, CheckpointError> {
        if let Some(v) = versions.get(key) {
            return Ok(*v);
        }
        let mut seeded = 0;
        for slot in [Slot::Primary, Slot::Shadow] {
            if let Some(record) = self.inner.backend.read(key, slot)? {
                seeded = seeded.max(record.version);
            }
        }
        versions.insert(key.to_owned(), seeded);
        Ok(seeded)
    }

    fn check_index(&self, index: u32) -> Result<(), CheckpointError> {
        let max = self.inner.config.max_checkpoints;
        if index >= max {
            return Err(CheckpointError::IndexOutOfRange { index, max });
        }
        Ok(())
    }

    fn versions(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.inner
            .versions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn resolving(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner
            .resolving
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn spawn_write(
    write: impl FnOnce() -> Result<u64, CheckpointError> + Send + 'static,
) -> impl Future<Output = Result<u64, CheckpointError>> + Send + 'static {
    let task = tokio::task::spawn_blocking(write);
    async move {
        task.await
            .map_err(|e| CheckpointError::Task(e.to_string()))?
    }
}

/// Keys become directory names, so only plain names are accepted.
fn validate_key(key: &str) -> Result<(), CheckpointError> {
    let plain = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if plain {
        Ok(())
    } else {
        Err(CheckpointError::InvalidKey(key.to_owned()))
    }
}
