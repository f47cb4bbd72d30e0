// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

//! Small helpers shared by the lenstrace tests and benchmarks.

extern crate rand;
#[macro_use] extern crate slog;

use rand::Rng;

/// A logger that swallows everything. Most unit tests use this.
pub fn discard_log() -> slog::Logger {
    slog::Logger::root(slog::Discard, o!())
}


/// A simple utility for sampling random numbers.
///
/// The distribution can be uniform or log-uniform.
pub struct Sampler {
    is_log: bool,
    low: f64,
    range: f64
}

impl Sampler {
    /// Create a new Sampler.
    pub fn new(is_log: bool, mut low: f64, mut high: f64) -> Self {
        if low > high {
            std::mem::swap(&mut low, &mut high);
        }

        if is_log {
            low = low.ln();
            high = high.ln();
        }

        Sampler { is_log: is_log, low: low, range: high - low }
    }

    /// Sample a number from the distribution using the given generator.
    pub fn get_with<R: Rng>(&self, rng: &mut R) -> f64 {
        let n = self.low + rng.gen::<f64>() * self.range;

        if self.is_log {
            n.exp()
        } else {
            n
        }
    }

    /// Draw `n` samples.
    pub fn many<R: Rng>(&self, rng: &mut R, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.get_with(rng)).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::Sampler;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn samples_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(4);

        for v in Sampler::new(true, 1e3, 1e-2).many(&mut rng, 200) {
            assert!(v >= 1e-2 && v <= 1e3);
        }

        for v in Sampler::new(false, -1., 1.).many(&mut rng, 200) {
            assert!(v >= -1. && v <= 1.);
        }
    }
}
