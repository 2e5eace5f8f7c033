//! Process-wide random variate generator.
//!
//! Stochastic filters draw from per-thread generators forked off the global
//! seed, so a fixed seed reproduces the same output whatever the scheduling.

use crate::core::sync::{MutexLock, SingletonCell};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use std::sync::Arc;

/// Seed used when nothing else was asked for.
pub const DEFAULT_SEED: u64 = 121_212;

const STREAM_MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

static INSTANCE: SingletonCell<RandomVariateGenerator> = SingletonCell::new();

#[derive(Debug)]
struct GeneratorState {
    seed: u64,
    rng: StdRng,
}

/// Seeded generator guarded by a [`MutexLock`].
#[derive(Debug)]
pub struct RandomVariateGenerator {
    state: MutexLock<GeneratorState>,
}

impl RandomVariateGenerator {
    /// Create a standalone generator.
    pub fn new(seed: u64) -> Self {
        Self {
            state: MutexLock::new(GeneratorState {
                seed,
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    /// The shared instance, created with [`DEFAULT_SEED`] on first use.
    pub fn instance() -> Arc<Self> {
        INSTANCE.get_or_init(|| Self::new(DEFAULT_SEED))
    }

    /// Drop the shared instance; the next [`instance`](Self::instance)
    /// starts over from the default seed.
    pub fn teardown_instance() {
        INSTANCE.teardown();
    }

    /// Reseed, restarting the sequence.
    pub fn initialize(&self, seed: u64) {
        let mut state = self.state.lock();
        state.seed = seed;
        state.rng = StdRng::seed_from_u64(seed);
        debug!("Random variate generator seeded with {}", seed);
    }

    pub fn seed(&self) -> u64 {
        self.state.lock().seed
    }

    /// Uniform variate in `[0, 1)`.
    pub fn uniform(&self) -> f64 {
        self.state.lock().rng.gen::<f64>()
    }

    /// Uniform variate in `[low, high)`; returns `low` for an empty range.
    pub fn uniform_range(&self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        self.state.lock().rng.gen_range(low..high)
    }

    /// Uniform integer in `[0, n)`; zero when `n` is zero.
    pub fn integer_below(&self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        self.state.lock().rng.gen_range(0..n)
    }

    /// Normal variate with the given mean and variance.
    pub fn normal(&self, mean: f64, variance: f64) -> f64 {
        let mut state = self.state.lock();
        mean + variance.max(0.0).sqrt() * sample_normal(&mut state.rng)
    }

    /// An independent generator for `stream`, derived from the current seed.
    ///
    /// Forks do not advance this generator; equal seeds and streams give
    /// equal sequences.
    pub fn fork(&self, stream: u64) -> StdRng {
        let seed = self.state.lock().seed;
        StdRng::seed_from_u64(seed.wrapping_add(stream.wrapping_mul(STREAM_MULTIPLIER)))
    }
}

impl Default for RandomVariateGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

/// Standard normal variate.
pub fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    StandardNormal.sample(rng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let a = RandomVariateGenerator::new(7);
        let b = RandomVariateGenerator::new(7);
        for _ in 0..16 {
            assert_eq!(a.uniform(), b.uniform());
        }
    }

    #[test]
    fn test_initialize_restarts_sequence() {
        let generator = RandomVariateGenerator::new(3);
        let first = generator.uniform();
        generator.uniform();
        generator.initialize(3);
        assert_eq!(generator.uniform(), first);
        assert_eq!(generator.seed(), 3);
    }

    #[test]
    fn test_ranges() {
        let generator = RandomVariateGenerator::default();
        for _ in 0..200 {
            let u = generator.uniform_range(-2.0, 5.0);
            assert!((-2.0..5.0).contains(&u));
            assert!(generator.integer_below(6) < 6);
        }
        assert_eq!(generator.uniform_range(1.0, 1.0), 1.0);
        assert_eq!(generator.integer_below(0), 0);
    }

    #[test]
    fn test_normal_moments() {
        let generator = RandomVariateGenerator::new(11);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| generator.normal(3.0, 4.0)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 3.0).abs() < 0.1, "mean {}", mean);
        assert!((variance - 4.0).abs() < 0.25, "variance {}", variance);
    }

    #[test]
    fn test_forks_are_deterministic_and_distinct() {
        let generator = RandomVariateGenerator::new(5);
        let mut a = generator.fork(1);
        let mut b = generator.fork(1);
        let mut c = generator.fork(2);
        let x: u64 = a.gen();
        assert_eq!(x, b.gen::<u64>());
        assert_ne!(x, c.gen::<u64>());
    }

    #[test]
    fn test_standard_normal_is_finite_and_centered() {
        let mut rng = StdRng::seed_from_u64(19);
        let n = 50_000;
        let mut sum = 0.0;
        let mut sum_of_squares = 0.0;
        for _ in 0..n {
            let x = sample_normal(&mut rng);
            assert!(x.is_finite());
            sum += x;
            sum_of_squares += x * x;
        }
        let mean = sum / n as f64;
        assert!(mean.abs() < 0.03, "mean {}", mean);
        assert!((sum_of_squares / n as f64 - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_instance_is_shared() {
        let a = RandomVariateGenerator::instance();
        let b = RandomVariateGenerator::instance();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
