//! Learning-rate schedule and early stopping.
//!
//! Both are plain serializable state so they can be stored in checkpoints.

use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;

/// Relative decrease a metric needs to count as an improvement.
const IMPROVEMENT_THRESHOLD: f64 = 1e-4;

fn improves(metric: f64, best: Option<f64>) -> bool {
    match best {
        None => true,
        Some(best) => metric < best - best.abs() * IMPROVEMENT_THRESHOLD,
    }
}

/// Linear warmup followed by reduce-on-plateau.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRateScheduler {
    warmup_steps: usize,
    factor: f64,
    patience: usize,
    min_learning_rate: f64,
    current: f64,
    best: Option<f64>,
    bad_epochs: usize,
}

impl LearningRateScheduler {
    /// Scheduler starting at `learning_rate`.
    pub fn new(
        learning_rate: f64,
        warmup_steps: usize,
        factor: f64,
        patience: usize,
        min_learning_rate: f64,
    ) -> Self {
        Self {
            warmup_steps,
            factor,
            patience,
            min_learning_rate,
            current: learning_rate,
            best: None,
            bad_epochs: 0,
        }
    }

    /// Scheduler described by `config`.
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(
            config.learning_rate,
            config.warmup_steps,
            config.scheduler_factor,
            config.scheduler_patience,
            config.min_learning_rate,
        )
    }

    /// Learning rate for optimizer step `step` (0-based).
    pub fn learning_rate(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            self.current * (step + 1) as f64 / self.warmup_steps as f64
        } else {
            self.current
        }
    }

    /// Learning rate after warmup.
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Report the monitored metric of an epoch. Returns `true` if the
    /// learning rate was reduced.
    pub fn step(&mut self, metric: f64) -> bool {
        if !metric.is_finite() {
            return false;
        }
        if improves(metric, self.best) {
            self.best = Some(metric);
            self.bad_epochs = 0;
            return false;
        }

        self.bad_epochs += 1;
        if self.bad_epochs <= self.patience {
            return false;
        }
        self.bad_epochs = 0;

        let reduced = (self.current * self.factor).max(self.min_learning_rate);
        if reduced < self.current {
            log::info!(
                "Reducing learning rate from {:.2e} to {:.2e}",
                self.current,
                reduced
            );
            self.current = reduced;
            true
        } else {
            false
        }
    }
}

/// Stops training after a number of validation passes without improvement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopping {
    patience: Option<usize>,
    best: Option<f64>,
    bad_passes: usize,
}

impl EarlyStopping {
    /// Early stopping with the given patience; `None` never stops.
    pub fn new(patience: Option<usize>) -> Self {
        Self {
            patience,
            best: None,
            bad_passes: 0,
        }
    }

    /// Best validation loss seen so far.
    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Report a validation loss. Returns `true` when training should stop.
    pub fn update(&mut self, validation_loss: f64) -> bool {
        if validation_loss.is_finite() && improves(validation_loss, self.best) {
            self.best = Some(validation_loss);
            self.bad_passes = 0;
        } else {
            self.bad_passes += 1;
        }
        self.patience.is_some_and(|p| self.bad_passes >= p)
    }
}
