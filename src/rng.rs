//! Seeded random source shared by every stochastic component of a run.

use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::Binomial;
use serde::{Deserialize, Serialize};

/// Deterministic pseudo-random stream.
///
/// Each run owns exactly one stream; the same seed and the same sequence of
/// draws reproduce the same values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomStream {
    rng: ChaCha12Rng,
}

impl RandomStream {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha12Rng::seed_from_u64(seed),
        }
    }

    /// Uniform draw in [0, 1).
    pub fn uniform(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Number of successes among `n` trials of probability `p`.
    ///
    /// `p` is clamped to [0, 1]; a non-finite `p` counts as 0.
    pub fn binomial(&mut self, n: u64, p: f64) -> u64 {
        if n == 0 {
            return 0;
        }
        let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
        match Binomial::new(n, p) {
            Ok(dist) => dist.sample(&mut self.rng).min(n),
            Err(_) => 0,
        }
    }
}
