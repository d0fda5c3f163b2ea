//! Deterministic batch drawing across several datasets.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// How batches are drawn from several training datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SamplingStrategy {
    /// Shuffle each dataset, then take one sample from each in turn until
    /// all are exhausted.
    #[default]
    RoundRobin,
    /// Shuffle the concatenation of all datasets, so each contributes in
    /// proportion to its size.
    Proportional,
}

/// Position of a sample: `(dataset, index within the dataset)`.
pub type SampleIndex = (usize, usize);

/// Splits one epoch over several datasets into batches of sample indices.
///
/// The order only depends on the seed, the epoch and the dataset sizes, so
/// a run resumed at epoch `k` draws the same batches as an uninterrupted one.
#[derive(Debug, Clone)]
pub struct BatchSampler {
    dataset_sizes: Vec<usize>,
    batch_size: usize,
    strategy: SamplingStrategy,
    seed: u64,
}

impl BatchSampler {
    /// Create a sampler.
    pub fn new(
        dataset_sizes: Vec<usize>,
        batch_size: usize,
        strategy: SamplingStrategy,
        seed: u64,
    ) -> Self {
        Self {
            dataset_sizes,
            batch_size: batch_size.max(1),
            strategy,
            seed,
        }
    }

    /// Total number of samples per epoch.
    pub fn num_samples(&self) -> usize {
        self.dataset_sizes.iter().sum()
    }

    /// Number of batches per epoch.
    pub fn num_batches(&self) -> usize {
        self.num_samples().div_ceil(self.batch_size)
    }

    /// Batches of epoch `epoch`. The last batch may be smaller.
    pub fn epoch_batches(&self, epoch: usize) -> Vec<Vec<SampleIndex>> {
        let mut rng = StdRng::seed_from_u64(epoch_seed(self.seed, epoch));

        let order = match self.strategy {
            SamplingStrategy::RoundRobin => {
                let mut queues: Vec<Vec<SampleIndex>> = self
                    .dataset_sizes
                    .iter()
                    .enumerate()
                    .map(|(d, &n)| {
                        let mut queue: Vec<SampleIndex> = (0..n).map(|i| (d, i)).collect();
                        queue.shuffle(&mut rng);
                        queue.reverse();
                        queue
                    })
                    .collect();

                let mut order = Vec::with_capacity(self.num_samples());
                while order.len() < self.num_samples() {
                    for queue in &mut queues {
                        if let Some(index) = queue.pop() {
                            order.push(index);
                        }
                    }
                }
                order
            }
            SamplingStrategy::Proportional => {
                let mut order: Vec<SampleIndex> = self
                    .dataset_sizes
                    .iter()
                    .enumerate()
                    .flat_map(|(d, &n)| (0..n).map(move |i| (d, i)))
                    .collect();
                order.shuffle(&mut rng);
                order
            }
        };

        order.chunks(self.batch_size).map(<[SampleIndex]>::to_vec).collect()
    }
}

/// Seed of the generator for one epoch.
///
/// Neighbouring `(seed, epoch)` pairs such as `(s, e + 1)` and `(s + 1, e)`
/// map to unrelated values.
fn epoch_seed(seed: u64, epoch: usize) -> u64 {
    mix(seed ^ mix(epoch as u64))
}

/// SplitMix64 finalizer.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(batches: &[Vec<SampleIndex>]) -> Vec<SampleIndex> {
        let mut all: Vec<_> = batches.iter().flatten().copied().collect();
        all.sort();
        all
    }

    #[test]
    fn test_every_sample_once_per_epoch() {
        for strategy in [SamplingStrategy::RoundRobin, SamplingStrategy::Proportional] {
            let sampler = BatchSampler::new(vec![3, 5], 2, strategy, 7);
            let batches = sampler.epoch_batches(0);
            assert_eq!(batches.len(), 4);
            assert_eq!(sampler.num_batches(), 4);

            let expected: Vec<SampleIndex> = (0..3).map(|i| (0, i)).chain((0..5).map(|i| (1, i))).collect();
            assert_eq!(sorted(&batches), expected);
        }
    }

    #[test]
    fn test_round_robin_interleaves() {
        let sampler = BatchSampler::new(vec![2, 4], 6, SamplingStrategy::RoundRobin, 1);
        let order = &sampler.epoch_batches(3)[0];
        let datasets: Vec<usize> = order.iter().map(|&(d, _)| d).collect();
        assert_eq!(datasets, vec![0, 1, 0, 1, 1, 1]);
    }

    #[test]
    fn test_deterministic_per_epoch() {
        let sampler = BatchSampler::new(vec![10, 10], 4, SamplingStrategy::Proportional, 42);
        assert_eq!(sampler.epoch_batches(5), sampler.epoch_batches(5));
        assert_ne!(sampler.epoch_batches(5), sampler.epoch_batches(6));

        let other = BatchSampler::new(vec![10, 10], 4, SamplingStrategy::Proportional, 43);
        assert_ne!(sampler.epoch_batches(5), other.epoch_batches(5));
    }

    #[test]
    fn test_adjacent_seeds_do_not_share_epochs() {
        let a = BatchSampler::new(vec![20], 20, SamplingStrategy::Proportional, 42);
        let b = BatchSampler::new(vec![20], 20, SamplingStrategy::Proportional, 43);
        assert_ne!(a.epoch_batches(6), b.epoch_batches(5));
        assert_ne!(a.epoch_batches(1), b.epoch_batches(0));

        let mut seeds: Vec<u64> = (0..16u64)
            .flat_map(|seed| (0..16).map(move |epoch| epoch_seed(seed, epoch)))
            .collect();
        seeds.sort_unstable();
        seeds.dedup();
        assert_eq!(seeds.len(), 256);
    }
}
