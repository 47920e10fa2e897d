//! Random Number Sources
//!
//! The crash-point generator only ever asks for independent `Uniform[0, 1)`
//! draws, so randomness is abstracted behind [`RandomSource`]. Production
//! uses [`DeterministicRng`] (Xorshift128+) seeded from fresh entropy; tests
//! inject fixed draw sequences.

use sha2::{Digest, Sha256};

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource {
    /// Next uniform value in `[0, 1)`.
    fn next_unit(&mut self) -> f64;
}

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// Given the same seed, this RNG produces the exact same sequence on any
/// platform, which keeps generator behaviour reproducible when a seed is
/// logged.
///
/// # Example
///
/// ```
/// use crash_round::core::rng::{DeterministicRng, RandomSource};
///
/// let mut rng = DeterministicRng::new(12345);
/// let u = rng.next_unit();
/// assert!((0.0..1.0).contains(&u));
/// ```
#[derive(Clone, Debug)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create an RNG seeded from fresh process entropy.
    ///
    /// Returns the seed alongside so it can be logged.
    pub fn from_entropy() -> (Self, u64) {
        let entropy = uuid::Uuid::new_v4().into_bytes();
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seed = derive_round_seed(&entropy, nanos as u64);
        (Self::new(seed), seed)
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }
}

impl RandomSource for DeterministicRng {
    /// Top 53 bits scaled into `[0, 1)`.
    #[inline]
    fn next_unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive an RNG seed from entropy bytes and a salt.
pub fn derive_round_seed(entropy: &[u8], salt: u64) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"CRASH_ROUND_SEED_V1");
    hasher.update(entropy);
    hasher.update(salt.to_le_bytes());

    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

/// Replays a fixed list of draws, cycling when exhausted.
///
/// Used to pin the generator to known buckets in tests.
#[derive(Clone, Debug)]
pub struct SequenceRng {
    draws: Vec<f64>,
    cursor: usize,
}

impl SequenceRng {
    /// Create from a list of draws in `[0, 1)`. An empty list always
    /// yields `0.0`.
    pub fn new(draws: Vec<f64>) -> Self {
        Self { draws, cursor: 0 }
    }
}

impl RandomSource for SequenceRng {
    fn next_unit(&mut self) -> f64 {
        if self.draws.is_empty() {
            return 0.0;
        }
        let value = self.draws[self.cursor % self.draws.len()];
        self.cursor += 1;
        value
    }
}

// =============================================================================
// TESTS
// =============================================================================
