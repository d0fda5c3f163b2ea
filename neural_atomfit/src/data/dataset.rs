//! In-memory datasets of structures and their reference targets.

use std::collections::{BTreeMap, BTreeSet};

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use atomfit_core::{DatasetInfo, System, TargetInfo};

use crate::block::TensorBlock;
use crate::error::{NeuralAtomfitError, Result};

/// One structure with its reference values.
///
/// Every target block describes this structure alone; its `system` column is
/// rewritten when the sample is batched.
#[derive(Debug, Clone)]
pub struct Sample<B: Backend> {
    /// The structure.
    pub system: System,
    /// Reference blocks keyed by target name. A sample may omit targets.
    pub targets: BTreeMap<String, TensorBlock<B>>,
}

impl<B: Backend> Sample<B> {
    /// A sample without targets.
    pub fn new(system: System) -> Self {
        Self {
            system,
            targets: BTreeMap::new(),
        }
    }

    /// Add a reference block.
    pub fn with_target(mut self, name: impl Into<String>, block: TensorBlock<B>) -> Self {
        self.targets.insert(name.into(), block);
        self
    }
}

/// Ordered samples plus the descriptor they were validated against.
#[derive(Debug, Clone)]
pub struct Dataset<B: Backend> {
    info: DatasetInfo,
    samples: Vec<Sample<B>>,
}

impl<B: Backend> Dataset<B> {
    /// Build a dataset, checking every sample against `info`.
    ///
    /// A sample may only name registered targets and may only contain
    /// species listed in `info`.
    pub fn new(info: DatasetInfo, samples: Vec<Sample<B>>) -> Result<Self> {
        for (i, sample) in samples.iter().enumerate() {
            if let Some(name) = sample.targets.keys().find(|name| !info.has_target(name)) {
                return Err(NeuralAtomfitError::InvalidData(format!(
                    "sample {i} has target '{name}' which is not registered in the dataset"
                )));
            }
            if let Some(species) = sample
                .system
                .types()
                .iter()
                .find(|&&t| !info.atomic_types.contains(&t))
            {
                return Err(NeuralAtomfitError::InvalidData(format!(
                    "sample {i} contains species {species} which is not listed in the dataset"
                )));
            }
        }
        Ok(Self { info, samples })
    }

    /// Build a dataset whose species set is computed from the samples.
    pub fn from_samples(
        length_unit: impl Into<String>,
        targets: BTreeMap<String, TargetInfo>,
        samples: Vec<Sample<B>>,
    ) -> Result<Self> {
        let info = DatasetInfo::from_systems(length_unit, samples.iter().map(|s| &s.system), targets);
        Self::new(info, samples)
    }

    /// The dataset descriptor.
    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample at `index`.
    pub fn get(&self, index: usize) -> Option<&Sample<B>> {
        self.samples.get(index)
    }

    /// Iterate over samples in order.
    pub fn iter(&self) -> impl Iterator<Item = &Sample<B>> + '_ {
        self.samples.iter()
    }
}

/// Structures and joined reference blocks of one batch.
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    /// Structures in batch order.
    pub systems: Vec<System>,
    /// Joined reference blocks. A target only covers the samples that have it.
    pub targets: BTreeMap<String, TensorBlock<B>>,
}

impl<B: Backend> Batch<B> {
    /// Copy of the batch with every block on `device`.
    pub fn to_device(&self, device: &B::Device) -> Self {
        Self {
            systems: self.systems.clone(),
            targets: self
                .targets
                .iter()
                .map(|(name, block)| (name.clone(), block.to_device(device)))
                .collect(),
        }
    }

    /// Number of structures.
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Whether the batch holds no structure.
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

impl<B: AutodiffBackend> Batch<B> {
    /// The batch on the inner backend.
    pub fn inner(&self) -> Batch<B::InnerBackend> {
        Batch {
            systems: self.systems.clone(),
            targets: self
                .targets
                .iter()
                .map(|(name, block)| (name.clone(), block.inner()))
                .collect(),
        }
    }
}

/// Join samples into a batch.
pub fn collate<B: Backend>(samples: &[&Sample<B>]) -> Result<Batch<B>> {
    let names: BTreeSet<&String> = samples.iter().flat_map(|s| s.targets.keys()).collect();

    let mut targets = BTreeMap::new();
    for name in names {
        let parts: Vec<(usize, &TensorBlock<B>)> = samples
            .iter()
            .enumerate()
            .filter_map(|(position, s)| s.targets.get(name).map(|block| (position, block)))
            .collect();
        targets.insert(name.clone(), TensorBlock::join(&parts)?);
    }

    Ok(Batch {
        systems: samples.iter().map(|s| s.system.clone()).collect(),
        targets,
    })
}
