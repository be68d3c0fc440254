//! Checkpoint store settings.

/// Limits applied by [`CheckpointStore`](crate::CheckpointStore).
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Numbered checkpoints per key; indexes run `0..max_checkpoints`.
    pub max_checkpoints: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { max_checkpoints: 64 }
    }
}

impl CheckpointConfig {
    pub fn validated(mut self) -> Self {
        if self.max_checkpoints == 0 {
            tracing::warn!("max_checkpoints is 0, using 1");
            self.max_checkpoints = 1;
        }
        self
    }
}
