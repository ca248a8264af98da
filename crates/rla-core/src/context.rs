//! Explicit per-run state handed to samplers and estimators.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Seeded randomness and verbosity for one unit of work.
///
/// Every sampler reset, fuzz pass and estimation task draws from the
/// context it is given; nothing reads a process-wide generator.
#[derive(Debug, Clone)]
pub struct RunContext {
    seed: u64,
    rng: ChaCha8Rng,
    pub verbose: bool,
}

impl RunContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// An independent context for sub-task `stream`, reproducible from the
    /// parent seed alone.
    pub fn fork(&self, stream: u64) -> RunContext {
        let seed = self
            .seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(stream.wrapping_add(1));
        RunContext {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            verbose: self.verbose,
        }
    }
}
