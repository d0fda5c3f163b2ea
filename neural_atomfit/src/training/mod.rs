//! Training infrastructure.
//!
//! This module provides:
//! - `Trainer`: data-parallel training loop with validation and resume
//! - Learning-rate scheduling and early stopping
//! - Loss tracking and validation RMSE
//! - Checkpoint save/load for training resumption

mod checkpoint;
mod metrics;
mod scheduler;
mod trainer;

pub use checkpoint::{
    checkpoint_exists, checkpoint_path, find_latest_checkpoint, list_checkpoints, load_checkpoint,
    save_checkpoint, TrainingState, CHECKPOINT_VERSION,
};
pub use metrics::{EpochSummary, LossTracker, RmseAccumulator};
pub use scheduler::{EarlyStopping, LearningRateScheduler};
pub use trainer::{FinishReason, Trainer, TrainingReport, TrainingStatus};
