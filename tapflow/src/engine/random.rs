//! Injectable randomness for probability gating and random delays

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of the engine's random draws
pub trait RandomSource: Send + Sync {
    /// Uniform integer in `[0, 100)`
    fn roll_percent(&mut self) -> u8;

    /// Uniform integer in `[min, max]`
    fn between(&mut self, min: u64, max: u64) -> u64;
}

/// `StdRng`-backed source; seed it for reproducible runs
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_os() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }
}

impl RandomSource for SeededRandom {
    fn roll_percent(&mut self) -> u8 {
        self.rng.random_range(0..100)
    }

    fn between(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        self.rng.random_range(min..=max)
    }
}
