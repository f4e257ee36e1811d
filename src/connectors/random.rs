//! Injectable randomness for mock outcomes
//!
//! All latency jitter and success draws go through a [`RandomSource`] owned by
//! the connector registry, so tests can pin outcomes.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform draws in `[0, 1)`
pub trait RandomSource: Send + Sync {
    fn next_unit(&self) -> f64;
}

/// Seedable pseudo-random source
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    /// Reproducible sequence for a given seed
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Non-reproducible sequence seeded from the OS
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_unit(&self) -> f64 {
        // Poisoned locks still hold a usable RNG
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen::<f64>()
    }
}

/// Always returns the same draw
///
/// `FixedRandom(0.5)` yields typical latency and success for every tool;
/// `FixedRandom(0.99)` fails every call.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next_unit(&self) -> f64 {
        self.0.clamp(0.0, 1.0 - f64::EPSILON)
    }
}
