//! Storage backends. Both are synchronous; the store moves calls onto a
//! blocking thread when the caller asks for `save_async`.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::{CheckpointError, CheckpointRecord, Slot};

/// Raw slot storage. Keys are validated by the store before they get here.
pub trait CheckpointBackend: Send + Sync + 'static {
    fn read(&self, key: &str, slot: Slot) -> Result<Option<CheckpointRecord>, CheckpointError>;

    fn write(&self, key: &str, slot: Slot, record: &CheckpointRecord) -> Result<(), CheckpointError>;

    /// Returns `true` if something was removed.
    fn remove(&self, key: &str, slot: Slot) -> Result<bool, CheckpointError>;
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// Keeps every slot in a map. Lost on drop.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    slots: Mutex<HashMap<(String, Slot), CheckpointRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<(String, Slot), CheckpointRecord>> {
        // Every mutation is a single map call, so a poisoned map is still whole.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CheckpointBackend for MemoryBackend {
    fn read(&self, key: &str, slot: Slot) -> Result<Option<CheckpointRecord>, CheckpointError> {
        Ok(self.slots().get(&(key.to_owned(), slot)).cloned())
    }

    fn write(&self, key: &str, slot: Slot, record: &CheckpointRecord) -> Result<(), CheckpointError> {
        self.slots().insert((key.to_owned(), slot), record.clone());
        Ok(())
    }

    fn remove(&self, key: &str, slot: Slot) -> Result<bool, CheckpointError> {
        Ok(self.slots().remove(&(key.to_owned(), slot)).is_some())
    }
}

// ---------------------------------------------------------------------------
// FileBackend
// ---------------------------------------------------------------------------

/// One JSON file per slot: `<root>/<key>/<slot>.json`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous record readable.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
    pretty: bool,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pretty: false,
        }
    }

    /// Indented JSON, for saves meant to be read by people.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str, slot: Slot) -> PathBuf {
        self.root.join(key).join(format!("{slot}.json"))
    }
}

impl CheckpointBackend for FileBackend {
    fn read(&self, key: &str, slot: Slot) -> Result<Option<CheckpointRecord>, CheckpointError> {
        let bytes = match fs::read(self.path(key, slot)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn write(&self, key: &str, slot: Slot, record: &CheckpointRecord) -> Result<(), CheckpointError> {
        let path = self.path(key, slot);
        fs::create_dir_all(self.root.join(key))?;

        let bytes = if self.pretty {
            serde_json::to_vec_pretty(record)?
        } else {
            serde_json::to_vec(record)?
        };
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;

        tracing::trace!(path = %path.display(), "checkpoint file written");
        Ok(())
    }

    fn remove(&self, key: &str, slot: Slot) -> Result<bool, CheckpointError> {
        match fs::remove_file(self.path(key, slot)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ResultSummary;

    fn record(level: u32) -> CheckpointRecord {
        CheckpointRecord::new(json!({ "level": level }), ResultSummary::new().with("score", 1))
    }

    #[test]
    fn test_file_backend_missing_slot_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        assert!(backend.read("run", Slot::Primary).unwrap().is_none());
        assert!(!backend.remove("run", Slot::Primary).unwrap());
    }

    #[test]
    fn test_file_backend_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).pretty(true);

        backend.write("run", Slot::Checkpoint(2), &record(4)).unwrap();

        assert!(dir.path().join("run").join("checkpoint-2.json").exists());
        assert_eq!(backend.read("run", Slot::Checkpoint(2)).unwrap(), Some(record(4)));
        assert!(backend.remove("run", Slot::Checkpoint(2)).unwrap());
        assert!(backend.read("run", Slot::Checkpoint(2)).unwrap().is_none());
    }

    #[test]
    fn test_file_backend_corrupt_file_is_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("run")).unwrap();
        fs::write(dir.path().join("run").join("primary.json"), b"{not json").unwrap();

        let backend = FileBackend::new(dir.path());
        assert!(matches!(
            backend.read("run", Slot::Primary),
            Err(CheckpointError::Encoding(_))
        ));
    }

    #[test]
    fn test_memory_backend_slots_are_independent() {
        let backend = MemoryBackend::new();
        backend.write("run", Slot::Primary, &record(1)).unwrap();
        backend.write("run", Slot::Shadow, &record(2)).unwrap();

        assert!(backend.remove("run", Slot::Shadow).unwrap());
        assert_eq!(backend.read("run", Slot::Primary).unwrap(), Some(record(1)));
    }
}
