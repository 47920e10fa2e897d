//! Round History
//!
//! Bounded ring buffer of completed rounds, newest first. In-memory only;
//! lost on restart.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::multiplier::Multiplier;

/// Default number of rounds kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Immutable record of a completed round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Final multiplier, two decimals (e.g. `"1.06"`).
    pub multiplier: String,
    /// Always `"crash"` at engine level.
    pub result: String,
    /// Always 0 at engine level; per-user winnings live in settlement.
    pub winnings: u32,
}

impl HistoryEntry {
    /// Record for a round that crashed at `multiplier`.
    pub fn crash(multiplier: Multiplier) -> Self {
        Self {
            multiplier: multiplier.to_string(),
            result: "crash".to_string(),
            winnings: 0,
        }
    }
}

/// Newest-first ring buffer of [`HistoryEntry`].
#[derive(Clone, Debug)]
pub struct RoundHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl RoundHistory {
    /// Create with `capacity` (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Insert at the front, evicting the oldest past capacity.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_front(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    /// Entries newest first.
    pub fn items(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Newest entry.
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no round has completed yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RoundHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
