//! Round Events
//!
//! Typed events the engine publishes. Every event carries a process-wide
//! sequence number so subscribers can discard anything older than a snapshot
//! they already hold.

use serde::{Deserialize, Serialize};

use crate::core::multiplier::Multiplier;
use crate::game::history::HistoryEntry;
use crate::game::state::RoundPhase;

/// Event payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RoundEventData {
    /// Round entered a new phase.
    PhaseChanged {
        /// The new phase.
        phase: RoundPhase,
    },

    /// Multiplier changed (reset or tick).
    MultiplierUpdated {
        /// Current multiplier.
        value: Multiplier,
    },

    /// Crash point drawn at Driving entry. Engine-internal; must not reach
    /// clients.
    CrashPointDrawn {
        /// The hidden crash point.
        value: Multiplier,
        /// Whether an operator override produced it.
        forced: bool,
    },

    /// Round crashed; the crash point may now be revealed.
    CrashRevealed {
        /// The crash point that was drawn.
        crash_point: Multiplier,
        /// The final displayed multiplier.
        final_multiplier: Multiplier,
    },

    /// History ring buffer changed.
    HistoryUpdated {
        /// Entries newest first.
        items: Vec<HistoryEntry>,
    },
}

/// A sequenced round event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundEvent {
    /// Monotonic event sequence, starting at 1.
    pub seq: u64,
    /// Round the event belongs to.
    pub round_seq: u64,
    /// Payload.
    pub data: RoundEventData,
}

impl RoundEvent {
    /// Whether the event may be shown to clients.
    pub fn is_public(&self) -> bool {
        !matches!(self.data, RoundEventData::CrashPointDrawn { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_point_drawn_is_private() {
        let drawn = RoundEvent {
            seq: 1,
            round_seq: 1,
            data: RoundEventData::CrashPointDrawn { value: Multiplier::ONE, forced: false },
        };
        assert!(!drawn.is_public());

        let revealed = RoundEvent {
            seq: 2,
            round_seq: 1,
            data: RoundEventData::CrashRevealed {
                crash_point: Multiplier::ONE,
                final_multiplier: Multiplier::from_hundredths(102),
            },
        };
        assert!(revealed.is_public());
    }
}
