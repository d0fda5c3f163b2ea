//! # neural_atomfit
//!
//! Training of atomistic machine-learning models with Burn.
//!
//! This crate builds on the data model of `atomfit_core` and provides the
//! tensor side: labeled blocks, the weighted multi-target loss, datasets and
//! batching, the model interface, and a data-parallel trainer with
//! validation, checkpointing and resume.
//!
//! ## Features
//!
//! - **Labeled blocks**: `TensorBlock<B>` pairs a tensor with sample,
//!   component and property labels, plus gradient blocks (forces, stress)
//! - **Loss functions**: `TensorBlockLoss` for one block, `TargetDictLoss`
//!   for a weighted set of targets
//! - **Datasets**: several training datasets drawn round-robin or in
//!   proportion to their size
//! - **Trainer**: sharding over devices, learning-rate warmup and plateau
//!   schedule, early stopping, atomic checkpoints
//!
//! ## Quick Start
//!
//! ```ignore
//! use neural_atomfit::prelude::*;
//! use burn::backend::{Autodiff, NdArray};
//!
//! type MyBackend = Autodiff<NdArray>;
//!
//! let device = Default::default();
//! let model = CompositionModelConfig::new(capabilities).init::<MyBackend>(&device);
//!
//! let weights = WeightTable::new().with("energy", 1.0)?;
//! let config = TrainingConfig::default()
//!     .with_num_epochs(50)
//!     .with_loss_weights(weights);
//! let trainer = Trainer::<MyBackend>::new(config, vec![device], "checkpoints")?;
//! let report = trainer.train(model, &[train], &[validation])?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! atomfit_core (labels, descriptors, negotiation, weights)
//!     │
//!     ▼
//! neural_atomfit
//!     block ──► loss ──► training ◄── data
//!                          ▲
//!                        model
//! ```
//!
//! ## Feature Flags
//!
//! - `ndarray` (default): CPU backend using ndarray
//! - `wgpu`: GPU acceleration via WebGPU

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod config;
pub mod data;
pub mod error;
pub mod loss;
pub mod model;
pub mod training;

// Re-export key types for convenience
pub use block::TensorBlock;
pub use config::TrainingConfig;
pub use error::{ErrorKind, NeuralAtomfitError, Result};
pub use loss::{TargetDictLoss, TensorBlockLoss};
pub use model::{AtomisticModel, CompositionModel};
pub use training::{Trainer, TrainingReport, TrainingStatus};

// Re-export from atomfit_core for convenience
pub use atomfit_core::{DatasetInfo, Labels, ModelCapabilities, ModelOutput, System, TargetInfo};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::block::{TensorBlock, ATOM_COLUMN, GRADIENT_SAMPLE_COLUMN, SYSTEM_COLUMN};
    pub use crate::config::{CompositionModelConfig, SamplingStrategy, TrainingConfig};
    pub use crate::data::{collate, Batch, BatchSampler, Dataset, Sample};
    pub use crate::error::{ErrorKind, NeuralAtomfitError, Result};
    pub use crate::loss::{TargetDictLoss, TensorBlockLoss};
    pub use crate::model::{check_architecture_name, Architecture, AtomisticModel, CompositionModel};
    pub use crate::training::{
        checkpoint_exists, find_latest_checkpoint, load_checkpoint, save_checkpoint,
        EpochSummary, FinishReason, Trainer, TrainingReport, TrainingState, TrainingStatus,
    };

    pub use atomfit_core::prelude::*;
}
