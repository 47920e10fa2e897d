//! Crash-Point Generator
//!
//! Pure function from settings plus two uniform draws to a crash point.
//!
//! ```text
//!   override > 1 ? ──yes──> min(override, max)
//!        │no
//!        v
//!   u ──> base curve (4 buckets, fixed house edge)
//!   v ──> skewed = v^exp × (max − 1) + 1
//!        │
//!        v
//!   easy modes: max(base, skewed)   hard modes: min(base, skewed)
//!        │
//!        v
//!   clamp to [1, max], round to 2dp
//! ```
//!
//! No hidden state: feed the same draws, get the same crash point.

use crate::core::multiplier::{Multiplier, HUNDREDTHS};
use crate::core::rng::RandomSource;
use crate::game::settings::{Mode, Settings};

/// One bucket of the base distribution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bucket {
    /// Upper bound of `u` for this bucket (exclusive).
    pub u_upper: f64,
    /// Lowest crash value in the bucket.
    pub low: f64,
    /// Highest crash value in the bucket.
    pub high: f64,
}

/// Base house-edge curve. Probability mass is the width in `u`.
pub const BASE_BUCKETS: [Bucket; 4] = [
    Bucket { u_upper: 0.70, low: 1.0, high: 2.5 },   // 70%
    Bucket { u_upper: 0.92, low: 2.5, high: 8.0 },   // 22%
    Bucket { u_upper: 0.98, low: 8.0, high: 10.0 },  // 6%
    Bucket { u_upper: 1.00, low: 10.0, high: 50.0 }, // 2%
];

/// Result of one draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrashDraw {
    /// The crash point for the round.
    pub crash_point: Multiplier,
    /// The override value that produced it, if any. The caller must
    /// neutralise the override after seeing this.
    pub override_consumed: Option<f64>,
}

/// Draw a crash point for the next round.
pub fn generate<R: RandomSource + ?Sized>(settings: &Settings, rng: &mut R) -> CrashDraw {
    let max = settings.effective_max();

    if let Some(n) = settings.active_override() {
        return CrashDraw {
            crash_point: clamp_round(n.min(max), max),
            override_consumed: Some(n),
        };
    }

    let base = base_value(rng.next_unit());
    let v = rng.next_unit();

    CrashDraw {
        crash_point: clamp_round(combine(settings.mode, base, v, max), max),
        override_consumed: None,
    }
}

/// Map `u ∈ [0, 1)` onto the base curve.
///
/// Within a bucket the value is uniform across its sub-range, using the
/// position of `u` inside the bucket.
pub fn base_value(u: f64) -> f64 {
    let u = u.clamp(0.0, 1.0);
    let mut lower = 0.0;
    for bucket in BASE_BUCKETS.iter() {
        if u < bucket.u_upper {
            let t = (u - lower) / (bucket.u_upper - lower);
            return bucket.low + t * (bucket.high - bucket.low);
        }
        lower = bucket.u_upper;
    }
    // u == 1.0 only reachable through the clamp above
    BASE_BUCKETS[BASE_BUCKETS.len() - 1].high
}

/// Skew exponent per mode. `None` means no skew.
pub fn skew_exponent(mode: Mode) -> Option<f64> {
    match mode {
        Mode::SuperEasy => Some(0.3),
        Mode::Easy => Some(0.6),
        Mode::Normal => Some(1.2),
        Mode::Hard => Some(2.0),
        Mode::SuperHard => Some(3.0),
        Mode::Unskewed => None,
    }
}

/// Apply the mode skew to a base value using draw `v`.
pub fn combine(mode: Mode, base: f64, v: f64, max: f64) -> f64 {
    let exponent = match skew_exponent(mode) {
        Some(e) => e,
        None => return base,
    };
    let skewed = v.powf(exponent) * (max - 1.0) + 1.0;

    match mode {
        Mode::SuperEasy | Mode::Easy => base.max(skewed),
        Mode::Normal | Mode::Hard | Mode::SuperHard => base.min(skewed),
        Mode::Unskewed => base,
    }
}

/// Round to hundredths and clamp into `[1.00, max]`.
///
/// The ceiling is `max` floored to hundredths so rounding can never push a
/// crash point above the operator's limit.
fn clamp_round(value: f64, max: f64) -> Multiplier {
    let ceiling = ((max * HUNDREDTHS as f64).floor() as u32).max(HUNDREDTHS);
    let rounded = Multiplier::from_f64(value).hundredths();
    Multiplier::from_hundredths(rounded.clamp(HUNDREDTHS, ceiling))
}

// =============================================================================
// TESTS
// =============================================================================
