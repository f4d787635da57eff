use std::{fmt, sync::Arc};

use parking_lot::{Mutex, MutexGuard};
use rand::{rngs::SmallRng, Rng, SeedableRng};

/// Handle to a random generator owned by a simulator.
///
/// Cloning the handle shares generator state; [`RandomSource::from_entropy`] and
/// [`RandomSource::seeded`] create independent state. Simulators construct their own
/// source unless one is passed in.
#[derive(Clone)]
pub struct RandomSource {
    inner: Arc<Mutex<SmallRng>>,
    seed: Option<u64>,
}

impl fmt::Debug for RandomSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomSource")
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl RandomSource {
    /// Fresh generator seeded from OS entropy.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SmallRng::from_entropy())),
            seed: None,
        }
    }

    /// Reproducible generator.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(seeded_rng(seed))),
            seed: Some(seed),
        }
    }

    /// Seed used at construction, if any.
    #[must_use]
    pub const fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Locks the generator for the duration of one sampling call.
    pub fn lock(&self) -> MutexGuard<'_, SmallRng> {
        self.inner.lock()
    }

    /// Whether two handles share the same generator state.
    #[must_use]
    pub fn shares_state_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::from_entropy()
    }
}

/// Generates a random seed for simulation runs.
#[must_use]
pub fn random_seed() -> u64 {
    rand::thread_rng().gen()
}

/// Returns a reproducible RNG.
#[must_use]
pub fn seeded_rng(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}
