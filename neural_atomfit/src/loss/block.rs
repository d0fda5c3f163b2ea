//! Squared-error loss between two labeled blocks.

use std::collections::BTreeMap;

use burn::prelude::*;

use crate::block::TensorBlock;
use crate::error::{NeuralAtomfitError, Result};

/// Unweighted loss terms of one block pair.
#[derive(Debug, Clone)]
pub struct BlockLossTerms<B: Backend> {
    /// Σ (p − r)² over the primary values.
    pub primary: Tensor<B, 1>,
    /// Loss of each gradient channel present on both sides and carrying a
    /// non-zero weight.
    pub gradients: BTreeMap<String, Tensor<B, 1>>,
}

impl<B: Backend> BlockLossTerms<B> {
    /// `primary_weight · primary + Σ_g w_g · gradient_g`.
    pub fn weighted(self, primary_weight: f64, gradient_weights: &BTreeMap<String, f64>) -> Tensor<B, 1> {
        let mut total = self.primary.mul_scalar(primary_weight);
        for (name, term) in self.gradients {
            let weight = gradient_weights.get(&name).copied().unwrap_or(0.0);
            total = total + term.mul_scalar(weight);
        }
        total
    }
}

/// Sum of squared differences between a predicted and a reference block.
///
/// The primary contribution is `Σ (p − r)²` over the whole values tensor,
/// without any normalisation. Each gradient channel present in both blocks
/// adds the same quantity computed on the gradient blocks, scaled by its
/// entry in `gradient_weights`. Channels without a weight count as 0 and
/// channels present on a single side are ignored.
#[derive(Debug, Clone, Default)]
pub struct TensorBlockLoss {
    gradient_weights: BTreeMap<String, f64>,
}

impl TensorBlockLoss {
    /// Create a loss with the given gradient weights.
    pub fn new(gradient_weights: BTreeMap<String, f64>) -> Self {
        Self { gradient_weights }
    }

    /// Weights of the gradient channels.
    pub fn gradient_weights(&self) -> &BTreeMap<String, f64> {
        &self.gradient_weights
    }

    /// Total loss between `predicted` and `reference`.
    pub fn compute<B: Backend>(
        &self,
        predicted: &TensorBlock<B>,
        reference: &TensorBlock<B>,
    ) -> Result<Tensor<B, 1>> {
        Ok(self
            .compute_terms(predicted, reference)?
            .weighted(1.0, &self.gradient_weights))
    }

    /// Primary and per-gradient terms, unweighted.
    ///
    /// Gradient channels with weight 0 are not evaluated.
    pub fn compute_terms<B: Backend>(
        &self,
        predicted: &TensorBlock<B>,
        reference: &TensorBlock<B>,
    ) -> Result<BlockLossTerms<B>> {
        check_labels(predicted, reference)?;

        let diff = predicted.values().clone() - reference.values().clone();
        let primary = (diff.clone() * diff).sum();

        let mut gradients = BTreeMap::new();
        for (name, predicted_gradient) in predicted.gradients() {
            let Some(reference_gradient) = reference.gradient(name) else {
                continue;
            };
            let weight = self.gradient_weights.get(name).copied().unwrap_or(0.0);
            if weight == 0.0 {
                continue;
            }
            let term = self
                .compute(predicted_gradient, reference_gradient)
                .map_err(|e| in_gradient(e, name))?;
            gradients.insert(name.clone(), term);
        }

        Ok(BlockLossTerms { primary, gradients })
    }
}

fn check_labels<B: Backend>(predicted: &TensorBlock<B>, reference: &TensorBlock<B>) -> Result<()> {
    if predicted.samples() != reference.samples() {
        return Err(NeuralAtomfitError::ShapeMismatch {
            context: "samples".to_string(),
            expected: reference.samples().to_string(),
            got: predicted.samples().to_string(),
        });
    }
    if predicted.components() != reference.components() {
        return Err(NeuralAtomfitError::ShapeMismatch {
            context: "components".to_string(),
            expected: format!("{:?}", reference.components()),
            got: format!("{:?}", predicted.components()),
        });
    }
    if predicted.properties() != reference.properties() {
        return Err(NeuralAtomfitError::ShapeMismatch {
            context: "properties".to_string(),
            expected: reference.properties().to_string(),
            got: predicted.properties().to_string(),
        });
    }
    Ok(())
}

fn in_gradient(error: NeuralAtomfitError, gradient: &str) -> NeuralAtomfitError {
    match error {
        NeuralAtomfitError::ShapeMismatch {
            context,
            expected,
            got,
        } => NeuralAtomfitError::ShapeMismatch {
            context: format!("{context} of gradient '{gradient}'"),
            expected,
            got,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomfit_core::Labels;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn block(values: &[f32]) -> TensorBlock<TestBackend> {
        TensorBlock::from_data(
            values.to_vec(),
            Labels::range("system", values.len()),
            vec![],
            Labels::new(vec!["energy"], vec![vec![0]]).unwrap(),
            &Default::default(),
        )
        .unwrap()
    }

    fn with_gradient(values: &[f32], gradient: &[f32]) -> TensorBlock<TestBackend> {
        let g = TensorBlock::from_data(
            gradient.to_vec(),
            Labels::range("sample", gradient.len()),
            vec![],
            Labels::new(vec!["energy"], vec![vec![0]]).unwrap(),
            &Default::default(),
        )
        .unwrap();
        block(values).with_gradient("positions", g).unwrap()
    }

    fn value(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_scalar()
    }

    #[test]
    fn test_no_gradients() {
        let loss = TensorBlockLoss::default();
        let a = block(&[1.0, 2.0, 3.0]);
        let b = block(&[0.0, 2.0, 3.0]);
        assert_eq!(value(loss.compute(&a, &a).unwrap()), 0.0);
        assert!((value(loss.compute(&a, &b).unwrap()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_weighted_gradient() {
        let loss = TensorBlockLoss::new(BTreeMap::from([("positions".to_string(), 0.5)]));
        let a = with_gradient(&[1.0, 2.0, 3.0], &[1.0, 3.0]);
        let b = with_gradient(&[1.0, 1.0, 3.0], &[0.0, 3.0]);
        assert!((value(loss.compute(&a, &b).unwrap()) - 1.5).abs() < 1e-6);

        let terms = loss.compute_terms(&a, &b).unwrap();
        assert!((value(terms.primary) - 1.0).abs() < 1e-6);
        assert!((value(terms.gradients["positions"].clone()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_gradient_weight_is_zero() {
        let loss = TensorBlockLoss::default();
        let a = with_gradient(&[1.0, 2.0, 3.0], &[1.0, 3.0]);
        let b = with_gradient(&[1.0, 2.0, 3.0], &[10.0, -3.0]);
        assert_eq!(value(loss.compute(&a, &b).unwrap()), 0.0);
    }

    #[test]
    fn test_label_mismatch() {
        let loss = TensorBlockLoss::default();
        let a = block(&[1.0, 2.0]);
        let b = block(&[1.0, 2.0, 3.0]);
        match loss.compute(&a, &b) {
            Err(NeuralAtomfitError::ShapeMismatch { context, .. }) => assert_eq!(context, "samples"),
            other => panic!("expected a shape mismatch, got {other:?}"),
        }
    }
}
