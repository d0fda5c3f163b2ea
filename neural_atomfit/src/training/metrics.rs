//! Loss tracking and validation metrics.

use std::collections::{BTreeMap, VecDeque};

use atomfit_core::WeightTable;
use burn::prelude::*;
use burn::tensor::ElementConversion;
use serde::{Deserialize, Serialize};

use crate::block::TensorBlock;
use crate::error::Result;
use crate::loss::TensorBlockLoss;

/// Read a one-element tensor as `f64`.
pub(crate) fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

/// Running average of the most recent batch losses.
#[derive(Debug, Clone)]
pub struct LossTracker {
    window_size: usize,
    window: VecDeque<f64>,
    total_steps: usize,
}

impl LossTracker {
    /// Tracker averaging over the last `window_size` values.
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            window: VecDeque::with_capacity(window_size),
            total_steps: 0,
        }
    }

    /// Record the loss of one batch.
    pub fn add(&mut self, loss: f64) {
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(loss);
        self.total_steps += 1;
    }

    /// Average over the window, 0 when nothing was recorded.
    pub fn average(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.window.iter().sum::<f64>() / self.window.len() as f64
        }
    }

    /// Number of values recorded.
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }
}

/// Accumulates squared errors to report a root-mean-square error per key.
///
/// Keys are target names for primary values and
/// `"<target>_<gradient>_gradients"` for gradient channels present in both
/// prediction and reference.
#[derive(Debug, Clone, Default)]
pub struct RmseAccumulator {
    sums: BTreeMap<String, (f64, usize)>,
}

impl RmseAccumulator {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the errors of every target present in both maps.
    pub fn update<B: Backend>(
        &mut self,
        predictions: &BTreeMap<String, TensorBlock<B>>,
        references: &BTreeMap<String, TensorBlock<B>>,
    ) -> Result<()> {
        for (name, reference) in references {
            let Some(predicted) = predictions.get(name) else {
                continue;
            };
            let gradient_weights = predicted
                .gradient_names()
                .filter(|g| reference.gradient(g).is_some())
                .map(|g| (g.to_string(), 1.0))
                .collect();
            let terms = TensorBlockLoss::new(gradient_weights).compute_terms(predicted, reference)?;

            self.add(name.clone(), scalar(terms.primary), reference.num_elements());
            for (gradient, term) in terms.gradients {
                let count = reference
                    .gradient(&gradient)
                    .map_or(0, TensorBlock::num_elements);
                self.add(WeightTable::gradient_key(name, &gradient), scalar(term), count);
            }
        }
        Ok(())
    }

    fn add(&mut self, key: String, squared_error: f64, count: usize) {
        let entry = self.sums.entry(key).or_insert((0.0, 0));
        entry.0 += squared_error;
        entry.1 += count;
    }

    /// RMSE per key. Keys that never saw an element are omitted.
    pub fn finalize(&self) -> BTreeMap<String, f64> {
        self.sums
            .iter()
            .filter(|(_, &(_, count))| count > 0)
            .map(|(key, &(sse, count))| (key.clone(), (sse / count as f64).sqrt()))
            .collect()
    }
}

/// What happened during one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// 0-based epoch index.
    pub epoch: usize,
    /// Mean training loss per batch.
    pub train_loss: f64,
    /// Mean validation loss per batch, when validation ran and was finite.
    pub validation_loss: Option<f64>,
    /// Validation RMSE per target and gradient channel.
    #[serde(default)]
    pub validation_rmse: BTreeMap<String, f64>,
    /// Learning rate at the end of the epoch.
    pub learning_rate: f64,
}

impl EpochSummary {
    /// Summary without validation results.
    pub fn new(epoch: usize, train_loss: f64, learning_rate: f64) -> Self {
        Self {
            epoch,
            train_loss,
            validation_loss: None,
            validation_rmse: BTreeMap::new(),
            learning_rate,
        }
    }

    /// Log the summary.
    pub fn log(&self) {
        match self.validation_loss {
            Some(validation) => log::info!(
                "epoch {} train_loss={:.6} val_loss={:.6} lr={:.2e}",
                self.epoch,
                self.train_loss,
                validation,
                self.learning_rate,
            ),
            None => log::info!(
                "epoch {} train_loss={:.6} lr={:.2e}",
                self.epoch,
                self.train_loss,
                self.learning_rate,
            ),
        }
        for (key, rmse) in &self.validation_rmse {
            log::info!("epoch {} val_rmse[{}]={:.6}", self.epoch, key, rmse);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomfit_core::Labels;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn block(values: Vec<f32>) -> TensorBlock<TestBackend> {
        let n = values.len();
        TensorBlock::from_data(
            values,
            Labels::range("system", n),
            Vec::new(),
            Labels::range("energy", 1),
            &Default::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_loss_tracker_window() {
        let mut tracker = LossTracker::new(10);
        for i in 0..20 {
            tracker.add(i as f64 * 0.1);
        }
        assert_eq!(tracker.total_steps(), 20);
        // Last 10 values: 1.0, 1.1, ..., 1.9
        assert!((tracker.average() - 1.45).abs() < 1e-9);
    }

    #[test]
    fn test_rmse() {
        let predictions = BTreeMap::from([("energy".to_string(), block(vec![1.0, 2.0]))]);
        let references = BTreeMap::from([("energy".to_string(), block(vec![0.0, 0.0]))]);

        let mut rmse = RmseAccumulator::new();
        rmse.update(&predictions, &references).unwrap();
        // sqrt((1 + 4) / 2)
        let value = rmse.finalize()["energy"];
        assert!((value - 2.5f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_rmse_accumulates_over_batches() {
        let mut rmse = RmseAccumulator::new();
        for (p, r) in [(3.0, 0.0), (0.0, 1.0)] {
            let predictions = BTreeMap::from([("energy".to_string(), block(vec![p]))]);
            let references = BTreeMap::from([("energy".to_string(), block(vec![r]))]);
            rmse.update(&predictions, &references).unwrap();
        }
        let value = rmse.finalize()["energy"];
        assert!((value - 5.0f64.sqrt()).abs() < 1e-6);
    }
}
