//! # RNG Module
//!
//! Seedable uniform random draws over inclusive integer ranges. The
//! generator owns a `StdRng`; construction either derives a seed from
//! wall-clock seconds (the default) or accepts one explicitly so tests
//! are deterministic.

use rand::{rngs::StdRng, Rng, SeedableRng};

use std::time::{SystemTime, UNIX_EPOCH};

/// Random number source for program construction.
#[derive(Debug)]
pub struct NumGen {
    rng: StdRng,
}

impl NumGen {
    /// Creates a generator seeded with the given value.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Creates a generator seeded from wall-clock seconds.
    pub fn from_clock() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::with_seed(seed)
    }

    /// Returns a uniform draw from `[lo, hi]`, both ends inclusive.
    #[inline]
    pub fn rand_range(&mut self, lo: u64, hi: u64) -> u64 {
        self.rng.gen_range(lo..=hi)
    }
}
