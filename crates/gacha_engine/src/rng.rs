//! # Random Sources
//!
//! Every draw the engine makes flows through [`RandomSource`]. Two production
//! variants exist:
//!
//! - **[`SecureRandom`]** - `ChaCha20` seeded from OS entropy. Used for ordinary
//!   pulls. Unpredictable, not reproducible.
//!
//! - **[`SeededRandom`]** - `HMAC-SHA256(seed, counter)`. Used when a pull must be
//!   verifiable later (pre-purchased boxes, audits). The same seed yields the
//!   same stream on every machine, forever.
//!
//! ## Seeded Stream Format
//!
//! ```text
//! draw[n] = be48( HMAC-SHA256(key = utf8(seed), msg = be64(n))[0..6] ) / 2^48
//! ```
//!
//! The counter starts at 0 and advances by one per draw. Changing this format
//! breaks every recorded seed, so the golden vectors in the tests are frozen.

use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// 2^48 as a float; dividing a 48-bit integer by it is exact.
const TWO_POW_48: f64 = 281_474_976_710_656.0;

/// A stream of uniform draws in `[0, 1)`.
///
/// Draws never block and never touch shared state.
pub trait RandomSource {
    /// Returns the next uniform draw in `[0, 1)`.
    fn next_f64(&mut self) -> f64;

    /// The seed of a reproducible stream, if any.
    fn seed(&self) -> Option<&str> {
        None
    }

    /// Uniform index in `[0, len)` computed as `floor(next * len)`.
    ///
    /// Returns 0 for an empty range without consuming a draw.
    fn index(&mut self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let idx = (self.next_f64() * len as f64) as usize;
        idx.min(len - 1)
    }

    /// Uniform integer in `[0, total)` computed as `floor(next * total)`.
    fn below(&mut self, total: u64) -> u64 {
        if total == 0 {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let value = (self.next_f64() * total as f64) as u64;
        value.min(total - 1)
    }
}

/// Non-deterministic source backed by `ChaCha20` seeded from the OS.
pub struct SecureRandom {
    inner: ChaCha20Rng,
}

impl SecureRandom {
    /// Creates a source seeded from operating system entropy.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            inner: ChaCha20Rng::from_entropy(),
        }
    }
}

impl RandomSource for SecureRandom {
    #[allow(clippy::cast_precision_loss)]
    fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

impl std::fmt::Debug for SecureRandom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose generator state.
        f.debug_struct("SecureRandom").finish_non_exhaustive()
    }
}

/// Reproducible source: `HMAC-SHA256(seed, counter)` truncated to 48 bits.
#[derive(Clone)]
pub struct SeededRandom {
    seed: String,
    keyed: HmacSha256,
    counter: u64,
}

impl SeededRandom {
    /// Creates a stream for `seed`, positioned at draw 0.
    ///
    /// # Panics
    ///
    /// Never: HMAC takes keys of any length.
    #[must_use]
    pub fn new(seed: impl Into<String>) -> Self {
        let seed = seed.into();
        let keyed = HmacSha256::new_from_slice(seed.as_bytes())
            .expect("HMAC-SHA256 accepts keys of any length");
        Self {
            seed,
            keyed,
            counter: 0,
        }
    }

    /// Number of draws consumed so far.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.counter
    }

    /// Returns the next raw 48-bit value and advances the counter.
    pub fn next_raw(&mut self) -> u64 {
        let mut mac = self.keyed.clone();
        mac.update(&self.counter.to_be_bytes());
        let digest = mac.finalize().into_bytes();
        self.counter = self.counter.wrapping_add(1);

        let mut buf = [0u8; 8];
        buf[2..8].copy_from_slice(&digest[0..6]);
        u64::from_be_bytes(buf)
    }
}

impl RandomSource for SeededRandom {
    #[allow(clippy::cast_precision_loss)]
    fn next_f64(&mut self) -> f64 {
        self.next_raw() as f64 / TWO_POW_48
    }

    fn seed(&self) -> Option<&str> {
        Some(&self.seed)
    }
}

impl std::fmt::Debug for SeededRandom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRandom")
            .field("seed", &self.seed)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

/// Scripted source that replays a fixed list of draws, wrapping around.
///
/// Used to force specific branches (every trial failing, a pity boundary).
#[derive(Clone, Debug)]
pub struct SequenceRandom {
    draws: Vec<f64>,
    cursor: usize,
}

impl SequenceRandom {
    /// Creates a source from a list of draws. Values are clamped into `[0, 1)`.
    #[must_use]
    pub fn new(draws: Vec<f64>) -> Self {
        let draws = if draws.is_empty() { vec![0.0] } else { draws };
        Self {
            draws: draws
                .into_iter()
                .map(|d| d.clamp(0.0, 1.0 - f64::EPSILON))
                .collect(),
            cursor: 0,
        }
    }

    /// Creates a source that always returns `value`.
    #[must_use]
    pub fn constant(value: f64) -> Self {
        Self::new(vec![value])
    }

    /// Number of draws consumed so far.
    #[must_use]
    pub const fn consumed(&self) -> usize {
        self.cursor
    }
}

impl RandomSource for SequenceRandom {
    fn next_f64(&mut self) -> f64 {
        let value = self.draws[self.cursor % self.draws.len()];
        self.cursor += 1;
        value
    }
}
