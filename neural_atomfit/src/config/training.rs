//! Training configuration.

use burn::config::Config;
use burn::optim::AdamConfig;

use atomfit_core::WeightTable;

use crate::data::SamplingStrategy;

/// Configuration for the [`Trainer`](crate::training::Trainer).
#[derive(Config)]
pub struct TrainingConfig {
    /// Adam optimizer settings. The learning rate is driven by
    /// `learning_rate` and the scheduler, not by this struct.
    pub optimizer: AdamConfig,

    /// Number of epochs to train for, counted from epoch 0 even when
    /// resuming.
    #[config(default = 100)]
    pub num_epochs: usize,

    /// Structures per batch, before sharding across devices.
    #[config(default = 8)]
    pub batch_size: usize,

    /// Write a checkpoint every this many epochs. A value of 0 or less
    /// writes a single checkpoint before the first epoch.
    #[config(default = 25)]
    pub checkpoint_interval: i64,

    /// Run validation every this many epochs.
    #[config(default = 1)]
    pub validation_interval: usize,

    /// Log the running training loss every this many batches.
    #[config(default = 10)]
    pub log_interval: usize,

    /// Loss weights. Every target of the datasets needs a primary weight;
    /// gradients without an entry get weight 0.
    #[config(default = "WeightTable::new()")]
    pub loss_weights: WeightTable,

    /// Stop after this many validation passes without improvement.
    pub early_stopping_patience: Option<usize>,

    /// Seed of the batch order.
    #[config(default = 42)]
    pub seed: u64,

    /// How batches are drawn from several training datasets.
    #[config(default = "SamplingStrategy::RoundRobin")]
    pub sampling: SamplingStrategy,

    /// Optimizer steps of linear learning-rate warmup.
    #[config(default = 0)]
    pub warmup_steps: usize,

    /// Factor applied to the learning rate on a plateau.
    #[config(default = 0.5)]
    pub scheduler_factor: f64,

    /// Epochs without improvement before the learning rate is reduced.
    #[config(default = 10)]
    pub scheduler_patience: usize,

    /// Lower bound of the learning rate.
    #[config(default = 1e-6)]
    pub min_learning_rate: f64,

    /// Initial learning rate.
    #[config(default = 1e-3)]
    pub learning_rate: f64,

    /// Device kinds the run uses (`"cpu"`, `"cuda:1"`), checked against the
    /// model's supported devices. Empty skips the check.
    #[config(default = "Vec::new()")]
    pub device_kinds: Vec<String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::new(AdamConfig::new())
    }
}

impl TrainingConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be positive".to_string());
        }
        if self.validation_interval == 0 {
            return Err("validation_interval must be positive".to_string());
        }
        if self.log_interval == 0 {
            return Err("log_interval must be positive".to_string());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err("learning_rate must be positive".to_string());
        }
        if !(self.scheduler_factor > 0.0 && self.scheduler_factor <= 1.0) {
            return Err("scheduler_factor must be in (0, 1]".to_string());
        }
        if !(self.min_learning_rate >= 0.0 && self.min_learning_rate <= self.learning_rate) {
            return Err("min_learning_rate must be in [0, learning_rate]".to_string());
        }
        if self.early_stopping_patience == Some(0) {
            return Err("early_stopping_patience must be positive".to_string());
        }
        self.loss_weights.validate().map_err(|e| e.to_string())?;

        Ok(())
    }
}
