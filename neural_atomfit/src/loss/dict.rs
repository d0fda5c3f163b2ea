//! Weighted loss over a set of targets.

use std::collections::BTreeMap;

use burn::prelude::*;

use atomfit_core::WeightTable;

use crate::block::TensorBlock;
use crate::error::{NeuralAtomfitError, Result};

use super::block::TensorBlockLoss;

/// Multi-target loss driven by a [`WeightTable`].
///
/// Only targets present in both the predictions and the references
/// contribute. Each contributing target must have a primary weight; its
/// gradient channels use the `"<target>_<gradient>_gradients"` entries of
/// the table and count as 0 when absent.
#[derive(Debug, Clone)]
pub struct TargetDictLoss {
    weights: WeightTable,
}

impl TargetDictLoss {
    /// Create the loss from a weight table.
    pub fn new(weights: WeightTable) -> Self {
        Self { weights }
    }

    /// The weight table.
    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }

    /// Total weighted loss.
    ///
    /// Returns a zero scalar when no target is shared between `predictions`
    /// and `references`. It lives on the device of the predictions, or on
    /// the default device when there are none.
    pub fn compute<B: Backend>(
        &self,
        predictions: &BTreeMap<String, TensorBlock<B>>,
        references: &BTreeMap<String, TensorBlock<B>>,
    ) -> Result<Tensor<B, 1>> {
        let per_target = self.compute_per_target(predictions, references)?;
        let total = per_target.into_values().reduce(|acc, term| acc + term);
        Ok(total.unwrap_or_else(|| {
            let device = predictions
                .values()
                .next()
                .map(TensorBlock::device)
                .unwrap_or_default();
            Tensor::zeros([1], &device)
        }))
    }

    /// Weighted contribution of every shared target, in name order.
    pub fn compute_per_target<B: Backend>(
        &self,
        predictions: &BTreeMap<String, TensorBlock<B>>,
        references: &BTreeMap<String, TensorBlock<B>>,
    ) -> Result<BTreeMap<String, Tensor<B, 1>>> {
        let mut contributions = BTreeMap::new();
        for (target, predicted) in predictions {
            let Some(reference) = references.get(target) else {
                continue;
            };
            let primary_weight = self
                .weights
                .primary(target)
                .ok_or_else(|| NeuralAtomfitError::MissingWeight {
                    target: target.clone(),
                })?;
            let gradient_weights = self
                .weights
                .gradient_weights(target, predicted.gradient_names());

            let terms = TensorBlockLoss::new(gradient_weights.clone())
                .compute_terms(predicted, reference)
                .map_err(|e| for_target(e, target))?;
            contributions.insert(target.clone(), terms.weighted(primary_weight, &gradient_weights));
        }
        Ok(contributions)
    }
}

fn for_target(error: NeuralAtomfitError, target: &str) -> NeuralAtomfitError {
    match error {
        NeuralAtomfitError::ShapeMismatch {
            context,
            expected,
            got,
        } => NeuralAtomfitError::ShapeMismatch {
            context: format!("{context} of target '{target}'"),
            expected,
            got,
        },
        other => other,
    }
}
