//! The random number generators used to place probes.
//!
//! Per-site edge identifiers and the instrumentation-ratio gates are drawn
//! from here. None of this is cryptographically secure, nor does it need to be.
use core::fmt::Debug;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::current_nanos;

/// The standard rand implementation for `AFLGo`.
pub type StdRand = RomuDuoJrRand;

/// Faster and almost unbiased alternative to `rand % n`.
///
/// For N-bit bound, probability of getting a biased value is 1/2^(64-N).
///
/// See: [An optimal algorithm for bounded random integers](https://github.com/apple/swift/pull/39143).
#[inline]
#[must_use]
pub fn fast_bound(rand: u64, n: u64) -> u64 {
    debug_assert_ne!(n, 0);
    let mul = u128::from(rand).wrapping_mul(u128::from(n));
    (mul >> 64) as u64
}

/// Ways to get random around here.
pub trait Rand: Debug + Serialize + DeserializeOwned {
    /// Sets the seed of this Rand
    fn set_seed(&mut self, seed: u64);

    /// Gets the next 64 bit value
    fn next(&mut self) -> u64;

    /// Gets a value below the given 64 bit val (exclusive)
    #[inline]
    fn below(&mut self, upper_bound_excl: u64) -> u64 {
        fast_bound(self.next(), upper_bound_excl)
    }

    /// Rolls a percentage gate: true with probability `ratio`/100.
    ///
    /// Always consumes exactly one draw, whatever the ratio.
    #[inline]
    fn percent(&mut self, ratio: u32) -> bool {
        self.below(100) < u64::from(ratio)
    }
}

/// Initialize Rand types from a source of randomness.
pub trait RandomSeed: Rand + Default {
    /// Creates a new [`RandomSeed`], seeded with the current time in nanoseconds.
    fn new() -> Self;
}

// https://prng.di.unimi.it/splitmix64.c
fn splitmix64(x: &mut u64) -> u64 {
    *x = x.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = *x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// see <https://arxiv.org/pdf/2002.11331.pdf>
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct RomuDuoJrRand {
    x_state: u64,
    y_state: u64,
}

impl RomuDuoJrRand {
    /// Creates a new `RomuDuoJrRand` with the given seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        let mut rand = Self {
            x_state: 0,
            y_state: 0,
        };
        rand.set_seed(seed);
        rand
    }
}

impl Default for RomuDuoJrRand {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSeed for RomuDuoJrRand {
    fn new() -> Self {
        Self::with_seed(current_nanos())
    }
}

impl Rand for RomuDuoJrRand {
    fn set_seed(&mut self, mut seed: u64) {
        self.x_state = splitmix64(&mut seed);
        self.y_state = splitmix64(&mut seed);
    }

    #[inline]
    fn next(&mut self) -> u64 {
        let xp = self.x_state;
        self.x_state = 15241094284759029579_u64.wrapping_mul(self.y_state);
        self.y_state = self.y_state.wrapping_sub(xp).rotate_left(27);
        xp
    }
}
