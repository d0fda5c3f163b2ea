//! Datasets, batches and batch sampling.

mod dataset;
mod sampler;

pub use dataset::{collate, Batch, Dataset, Sample};
pub use sampler::{BatchSampler, SampleIndex, SamplingStrategy};
