//! Round State
//!
//! The single authoritative round. Only the engine mutates a [`Round`];
//! everything else reads a [`RoundSnapshot`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::multiplier::Multiplier;

// =============================================================================
// ROUND PHASE
// =============================================================================

/// Lifecycle phase of a round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    /// Bets accepted; multiplier parked at 1.00.
    #[default]
    Betting,
    /// Short window closing bets before the climb.
    LockBets,
    /// Multiplier climbing toward the hidden crash point.
    Driving,
    /// Round over; result recorded in history.
    Crashed,
}

impl RoundPhase {
    /// Wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            RoundPhase::Betting => "betting",
            RoundPhase::LockBets => "lockbets",
            RoundPhase::Driving => "driving",
            RoundPhase::Crashed => "crashed",
        }
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ROUND
// =============================================================================

/// The unit of play.
#[derive(Clone, Debug)]
pub struct Round {
    /// Monotonic round identifier, starting at 1.
    pub seq: u64,
    /// Current phase.
    pub phase: RoundPhase,
    /// Displayed multiplier; non-decreasing within a round.
    pub multiplier: Multiplier,
    /// Hidden crash point; `Some` from Driving entry until the next Betting.
    pub crash_point: Option<Multiplier>,
    /// Set by the tick that reached the crash point.
    pub crashed: bool,
    /// When the current phase began.
    pub phase_started_at: DateTime<Utc>,
}

impl Round {
    /// Round `seq` at the start of Betting.
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            phase: RoundPhase::Betting,
            multiplier: Multiplier::ONE,
            crash_point: None,
            crashed: false,
            phase_started_at: Utc::now(),
        }
    }

    /// Whether the multiplier has reached the crash point.
    pub fn has_reached_crash(&self) -> bool {
        matches!(self.crash_point, Some(cp) if self.multiplier >= cp)
    }

    /// Read-only view for clients.
    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            seq: self.seq,
            phase: self.phase,
            multiplier: self.multiplier,
        }
    }
}

/// Client-safe view of a round. Never carries the crash point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Round identifier.
    pub seq: u64,
    /// Current phase.
    pub phase: RoundPhase,
    /// Current multiplier.
    pub multiplier: Multiplier,
}
