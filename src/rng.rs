//! Seeded, deterministic randomness.
//!
//! Every stochastic decision in the engine (cosmic rays, copy mutation,
//! allocation policy tie-breaks, disturbance sampling) draws from a single
//! `SmallRng` seeded from the configured seed, so two runs with the same
//! config and the same sequence of `tick`/`tick_batch` calls are bit-for-bit
//! identical.

use rand::rngs::SmallRng;
use rand::SeedableRng;

pub fn from_seed(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}
