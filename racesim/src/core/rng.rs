use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Seeded random stream threaded through the tick function.
///
/// Every random draw of a simulation flows through one of these, in a fixed
/// order within a tick, so that the same seed and command trace replay to a
/// byte-identical race. ChaCha8 is used for its stable output across
/// platforms and cheap seeking-free cloning.
#[derive(Debug, Clone)]
pub struct SimRng {
    inner: ChaCha8Rng,
}

impl SimRng {
    pub fn new(seed: u64) -> SimRng {
        SimRng {
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Uniform draw in [0, 1).
    pub fn random(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    /// Uniform draw in [a, b).
    pub fn uniform(&mut self, a: f64, b: f64) -> f64 {
        a + (b - a) * self.inner.gen::<f64>()
    }

    /// Bernoulli draw with the given success probability.
    pub fn chance(&mut self, probability: f64) -> bool {
        self.inner.gen::<f64>() < probability
    }

    /// Normal draw with mean 0. A non-positive std_dev returns 0 without
    /// consuming a draw, mirroring a disabled jitter.
    pub fn normal(&mut self, std_dev: f64) -> f64 {
        if std_dev <= 0.0 {
            return 0.0;
        }
        // std_dev is validated above, Normal::new cannot fail
        let normal = Normal::new(0.0, std_dev).unwrap();
        normal.sample(&mut self.inner)
    }
}
