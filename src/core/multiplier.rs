//! Fixed-Point Multiplier
//!
//! Round multipliers and crash points are stored as integer hundredths so the
//! climb never accumulates float drift. `1.00x` is `100`, `2.57x` is `257`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Multiplier(u32) = value × 100                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  1.00x  ->  100        (every round starts here)            │
//! │  1.06x  ->  106                                             │
//! │  50.00x ->  5000                                            │
//! │                                                             │
//! │  Precision: exactly 2 decimal places                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Floats only appear at the edges: the crash-point generator works in `f64`
//! and is rounded in with [`Multiplier::from_f64`]; the wire format reads
//! values back out with [`Multiplier::as_f64`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hundredths per whole unit.
pub const HUNDREDTHS: u32 = 100;

/// A payout multiplier with 2-decimal precision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiplier(u32);

impl Multiplier {
    /// `1.00x`, the start of every round and the lowest possible crash point.
    pub const ONE: Multiplier = Multiplier(HUNDREDTHS);

    /// Build from raw hundredths.
    #[inline]
    pub const fn from_hundredths(hundredths: u32) -> Self {
        Self(hundredths)
    }

    /// Raw hundredths.
    #[inline]
    pub const fn hundredths(self) -> u32 {
        self.0
    }

    /// Round an `f64` to the nearest hundredth.
    ///
    /// Values below `1.00` (and NaN) saturate to [`Multiplier::ONE`].
    pub fn from_f64(value: f64) -> Self {
        if value.is_nan() || value < 1.0 {
            return Self::ONE;
        }
        let scaled = (value * HUNDREDTHS as f64).round();
        if scaled >= u32::MAX as f64 {
            Self(u32::MAX)
        } else {
            Self(scaled as u32)
        }
    }

    /// Value as `f64` (e.g. `1.06`).
    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / HUNDREDTHS as f64
    }

    /// Add raw hundredths, saturating.
    #[inline]
    pub fn saturating_add(self, hundredths: u32) -> Self {
        Self(self.0.saturating_add(hundredths))
    }

    /// Multiply a stake by this multiplier, rounded to 2 decimals.
    pub fn payout(self, stake: f64) -> f64 {
        (stake * self.as_f64() * 100.0).round() / 100.0
    }
}

impl fmt::Display for Multiplier {
    /// Always two decimals: `1.06`, `10.00`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / HUNDREDTHS, self.0 % HUNDREDTHS)
    }
}
