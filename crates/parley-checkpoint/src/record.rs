//! What gets stored: a snapshot, the result counters captured with it, and
//! where it lives.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Named result counters (score, kills, coins, ...) accumulated during play.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSummary {
    counters: BTreeMap<String, i64>,
}

impl ResultSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: i64) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn set(&mut self, name: impl Into<String>, value: i64) {
        self.counters.insert(name.into(), value);
    }

    /// Saturates at the `i64` bounds.
    pub fn add(&mut self, name: impl Into<String>, amount: i64) {
        let counter = self.counters.entry(name.into()).or_insert(0);
        *counter = counter.saturating_add(amount);
    }

    pub fn counters(&self) -> impl Iterator<Item = (&str, i64)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// `self - base` over the counters of both. A counter missing from
    /// either side counts as 0, so applying the delta to `base` lands on
    /// `self`'s values everywhere.
    pub fn delta(&self, base: &ResultSummary) -> ResultSummary {
        ResultSummary {
            counters: self
                .counters
                .keys()
                .chain(base.counters.keys())
                .map(|name| (name.clone(), self.get(name).saturating_sub(base.get(name))))
                .collect(),
        }
    }

    /// Adds every counter of `delta`.
    pub fn apply(&mut self, delta: &ResultSummary) {
        for (name, amount) in delta.counters() {
            self.add(name, amount);
        }
    }
}

/// One stored entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Game-defined state. Opaque to the store.
    pub snapshot: serde_json::Value,
    pub result: ResultSummary,
    /// Set by the store: `true` in the shadow slot.
    #[serde(default)]
    pub ephemeral: bool,
    /// Set by the store on every write to the key.
    #[serde(default)]
    pub version: u64,
}

impl CheckpointRecord {
    pub fn new(snapshot: serde_json::Value, result: ResultSummary) -> Self {
        Self {
            snapshot,
            result,
            ephemeral: false,
            version: 0,
        }
    }
}

/// Where a record lives under its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    /// The durable save.
    Primary,
    /// The ephemeral save; preferred by `load` while present.
    Shadow,
    /// A numbered checkpoint, separate from the primary save.
    Checkpoint(u32),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Shadow => write!(f, "shadow"),
            Self::Checkpoint(i) => write!(f, "checkpoint-{i}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_covers_counters_of_both_sides() {
        let checkpoint = ResultSummary::new().with("score", 10).with("coins", 3);
        let live = ResultSummary::new().with("score", 25).with("deaths", 2);

        let delta = checkpoint.delta(&live);

        assert_eq!(delta.get("score"), -15);
        assert_eq!(delta.get("coins"), 3);
        assert_eq!(delta.get("deaths"), -2);
        assert_eq!(delta.counters().count(), 3);
    }

    #[test]
    fn test_apply_delta_lands_on_checkpoint_values() {
        let checkpoint = ResultSummary::new().with("score", 10);
        let mut live = ResultSummary::new().with("score", 25).with("deaths", 2);

        live.apply(&checkpoint.delta(&live));

        assert_eq!(live.get("score"), 10);
        assert_eq!(live.get("deaths"), 0, "counter born after the checkpoint is reset");
    }

    #[test]
    fn test_extreme_counters_saturate() {
        let mut live = ResultSummary::new().with("score", i64::MAX);
        live.add("score", 1);
        assert_eq!(live.get("score"), i64::MAX);

        let low = ResultSummary::new().with("score", i64::MIN);
        let high = ResultSummary::new().with("score", i64::MAX);
        assert_eq!(low.delta(&high).get("score"), i64::MIN);
        assert_eq!(high.delta(&low).get("score"), i64::MAX);
    }

    #[test]
    fn test_slot_display() {
        assert_eq!(Slot::Primary.to_string(), "primary");
        assert_eq!(Slot::Checkpoint(3).to_string(), "checkpoint-3");
    }

    #[test]
    fn test_record_json_defaults_store_fields() {
        let json = r#"{"snapshot": {"level": 2}, "result": {"score": 7}}"#;
        let record: CheckpointRecord = serde_json::from_str(json).unwrap();
        assert!(!record.ephemeral);
        assert_eq!(record.version, 0);
        assert_eq!(record.result.get("score"), 7);
    }
}
