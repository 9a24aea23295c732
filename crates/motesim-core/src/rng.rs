//! Seed-scoped deterministic random source.
//!
//! Every random draw that affects simulated state must come from this
//! generator, and draws must happen on the simulation thread. The generator
//! lives inside [`Simulation`](crate::sim::Simulation), which is owned by
//! exactly one thread at a time, so that contract holds by construction:
//! there is no way to reach the stream from a second thread while the
//! kernel runs.
//!
//! ChaCha is used rather than the `rand` default generator because its
//! stream is stable across platforms and releases; identical seeds must
//! replay identical simulations anywhere.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Pseudo-random generator seeded per simulation run. Reseeding resets the
/// stream.
pub struct SimRng {
    inner: ChaCha8Rng,
}

impl SimRng {
    pub(crate) fn new(seed: i64) -> Self {
        SimRng {
            inner: ChaCha8Rng::seed_from_u64(seed as u64),
        }
    }

    pub(crate) fn reseed(&mut self, seed: i64) {
        self.inner = ChaCha8Rng::seed_from_u64(seed as u64);
    }
}

impl RngCore for SimRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}
