//! Core primitives.
//!
//! Fixed-point multiplier arithmetic and the random sources the crash-point
//! generator draws from. Nothing in here touches the clock or the network.

pub mod multiplier;
pub mod rng;

// Re-export core types
pub use multiplier::Multiplier;
pub use rng::{DeterministicRng, RandomSource, SequenceRng};
