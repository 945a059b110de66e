//! Epoch-seeded distributed sampling

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

/// Deterministic shuffling sampler that shards a dataset across workers.
///
/// Every rank shuffles the full index range with the same epoch-derived seed,
/// truncates to the largest multiple of `world_size` and takes a strided
/// slice. Shards are disjoint, equally sized and contain no duplicates, so
/// every worker runs the same number of steps per epoch.
pub struct EpochSampler {
    dataset_len: usize,
    world_size: usize,
    rank: usize,
    seed: u64,
}

impl EpochSampler {
    pub fn new(dataset_len: usize, world_size: usize, rank: usize, seed: u64) -> Self {
        debug_assert!(rank < world_size);
        Self {
            dataset_len,
            world_size,
            rank,
            seed,
        }
    }

    /// Number of samples each rank sees per epoch.
    pub fn samples_per_rank(&self) -> usize {
        self.dataset_len / self.world_size
    }

    /// The indices this rank processes in `epoch`, in iteration order.
    pub fn indices(&self, epoch: usize) -> Vec<usize> {
        let mut all: Vec<usize> = (0..self.dataset_len).collect();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
        all.shuffle(&mut rng);
        let total = self.samples_per_rank() * self.world_size;
        all.truncate(total);
        all.into_iter()
            .skip(self.rank)
            .step_by(self.world_size)
            .collect()
    }
}
