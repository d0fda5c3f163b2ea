//! Labeled blocks.
//!
//! A [`TensorBlock`] is a dense Burn tensor of shape
//! `[samples, components, properties]` together with the [`Labels`] that name
//! every row of each axis. Blocks without component axes keep a middle
//! dimension of 1.
//!
//! Gradient blocks (forces, virials, ...) are stored inside their parent and
//! carry a `sample` column that points at a row of the parent block.

use std::collections::{BTreeMap, HashMap};

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use atomfit_core::Labels;

use crate::error::{NeuralAtomfitError, Result};

/// Column of gradient sample labels pointing at a row of the parent block.
pub const GRADIENT_SAMPLE_COLUMN: &str = "sample";

/// Column of sample labels holding the index of the system in its batch.
pub const SYSTEM_COLUMN: &str = "system";

/// Column of per-atom sample labels holding the atom index.
pub const ATOM_COLUMN: &str = "atom";

/// Dense values plus sample, component and property labels.
#[derive(Debug, Clone)]
pub struct TensorBlock<B: Backend> {
    values: Tensor<B, 3>,
    samples: Labels,
    components: Vec<Labels>,
    properties: Labels,
    gradients: BTreeMap<String, TensorBlock<B>>,
}

fn mismatch(context: impl Into<String>, expected: impl ToString, got: impl ToString) -> NeuralAtomfitError {
    NeuralAtomfitError::ShapeMismatch {
        context: context.into(),
        expected: expected.to_string(),
        got: got.to_string(),
    }
}

fn components_len(components: &[Labels]) -> usize {
    components.iter().map(Labels::len).product()
}

fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    Tensor::from_data(TensorData::new(data, [indices.len()]), device)
}

impl<B: Backend> TensorBlock<B> {
    /// Create a block without component axes.
    pub fn new(values: Tensor<B, 3>, samples: Labels, properties: Labels) -> Result<Self> {
        Self::with_components(values, samples, Vec::new(), properties)
    }

    /// Create a block with component axes.
    ///
    /// The middle dimension of `values` must equal the product of the
    /// component label lengths.
    pub fn with_components(
        values: Tensor<B, 3>,
        samples: Labels,
        components: Vec<Labels>,
        properties: Labels,
    ) -> Result<Self> {
        let dims = values.dims();
        let expected = [samples.len(), components_len(&components), properties.len()];
        if dims != expected {
            return Err(mismatch("block values", format!("{expected:?}"), format!("{dims:?}")));
        }
        Ok(Self {
            values,
            samples,
            components,
            properties,
            gradients: BTreeMap::new(),
        })
    }

    /// Create a block from row-major `f32` data.
    pub fn from_data(
        data: Vec<f32>,
        samples: Labels,
        components: Vec<Labels>,
        properties: Labels,
        device: &B::Device,
    ) -> Result<Self> {
        let shape = [samples.len(), components_len(&components), properties.len()];
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(mismatch("block data length", expected, data.len()));
        }
        let values = Tensor::from_data(TensorData::new(data, shape), device);
        Self::with_components(values, samples, components, properties)
    }

    /// Attach a gradient block.
    ///
    /// The gradient must have a `sample` column whose values index rows of
    /// this block, and the same properties as this block.
    pub fn add_gradient(&mut self, name: impl Into<String>, gradient: TensorBlock<B>) -> Result<()> {
        let name = name.into();
        let parents = gradient.samples.column(GRADIENT_SAMPLE_COLUMN)?;
        if let Some(&bad) = parents
            .iter()
            .find(|&&p| p < 0 || p as usize >= self.samples.len())
        {
            return Err(NeuralAtomfitError::InvalidData(format!(
                "gradient '{name}' refers to sample {bad} but the block has {} samples",
                self.samples.len()
            )));
        }
        if gradient.properties != self.properties {
            return Err(mismatch(
                format!("properties of gradient '{name}'"),
                &self.properties,
                &gradient.properties,
            ));
        }
        self.gradients.insert(name, gradient);
        Ok(())
    }

    /// Builder-style [`TensorBlock::add_gradient`].
    pub fn with_gradient(mut self, name: impl Into<String>, gradient: TensorBlock<B>) -> Result<Self> {
        self.add_gradient(name, gradient)?;
        Ok(self)
    }

    /// The values tensor, `[samples, components, properties]`.
    pub fn values(&self) -> &Tensor<B, 3> {
        &self.values
    }

    /// Sample labels.
    pub fn samples(&self) -> &Labels {
        &self.samples
    }

    /// Component labels, outermost first.
    pub fn components(&self) -> &[Labels] {
        &self.components
    }

    /// Property labels.
    pub fn properties(&self) -> &Labels {
        &self.properties
    }

    /// Gradient block called `name`.
    pub fn gradient(&self, name: &str) -> Option<&TensorBlock<B>> {
        self.gradients.get(name)
    }

    /// All gradient blocks, keyed by name.
    pub fn gradients(&self) -> &BTreeMap<String, TensorBlock<B>> {
        &self.gradients
    }

    /// Names of the gradient blocks in order.
    pub fn gradient_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.gradients.keys().map(String::as_str)
    }

    /// Number of scalar values in this block, gradients excluded.
    pub fn num_elements(&self) -> usize {
        self.values.shape().num_elements()
    }

    /// Device of the values tensor.
    pub fn device(&self) -> B::Device {
        self.values.device()
    }

    /// Copy of this block (gradients included) on `device`.
    pub fn to_device(&self, device: &B::Device) -> Self {
        Self {
            values: self.values.clone().to_device(device),
            samples: self.samples.clone(),
            components: self.components.clone(),
            properties: self.properties.clone(),
            gradients: self
                .gradients
                .iter()
                .map(|(name, g)| (name.clone(), g.to_device(device)))
                .collect(),
        }
    }

    /// Concatenate per-sample blocks into one batch block.
    ///
    /// Each part comes with its position in the batch, which replaces the
    /// `system` column of its samples (and of its gradient samples). Gradient
    /// `sample` columns are shifted by the number of parent rows before the
    /// part. Only gradients present in every part are kept.
    pub fn join(parts: &[(usize, &TensorBlock<B>)]) -> Result<Self> {
        let Some(&(_, first)) = parts.first() else {
            return Err(NeuralAtomfitError::InvalidData(
                "cannot join an empty list of blocks".to_string(),
            ));
        };

        for (_, block) in parts {
            if block.samples.names() != first.samples.names() {
                return Err(mismatch(
                    "sample names",
                    first.samples.names().join(", "),
                    block.samples.names().join(", "),
                ));
            }
            if block.components != first.components {
                return Err(mismatch("components", format!("{:?}", first.components), format!("{:?}", block.components)));
            }
            if block.properties != first.properties {
                return Err(mismatch("properties", &first.properties, &block.properties));
            }
        }

        let samples = join_labels(parts.iter().map(|&(pos, b)| (pos, &b.samples, 0)))?;
        let values = Tensor::cat(parts.iter().map(|(_, b)| b.values.clone()).collect(), 0);

        let mut joined = Self::with_components(
            values,
            samples,
            first.components.clone(),
            first.properties.clone(),
        )?;

        for name in first.gradients.keys() {
            let mut pieces = Vec::with_capacity(parts.len());
            let mut offset = 0;
            for &(pos, block) in parts {
                let Some(gradient) = block.gradients.get(name) else {
                    break;
                };
                pieces.push((pos, gradient, offset));
                offset += block.samples.len();
            }
            if pieces.len() != parts.len() {
                continue;
            }

            let grad_first = pieces[0].1;
            for (_, gradient, _) in &pieces {
                if gradient.components != grad_first.components
                    || gradient.samples.names() != grad_first.samples.names()
                {
                    return Err(mismatch(
                        format!("gradient '{name}'"),
                        format!("{:?}", grad_first.components),
                        format!("{:?}", gradient.components),
                    ));
                }
            }

            let samples = join_labels(pieces.iter().map(|&(pos, g, off)| (pos, &g.samples, off)))?;
            let values = Tensor::cat(pieces.iter().map(|(_, g, _)| g.values.clone()).collect(), 0);
            let gradient = Self::with_components(
                values,
                samples,
                grad_first.components.clone(),
                grad_first.properties.clone(),
            )?;
            joined.gradients.insert(name.clone(), gradient);
        }

        Ok(joined)
    }

    /// Keep only the rows listed in `samples`, in that order.
    ///
    /// Every row of `samples` must exist in this block. Gradient rows whose
    /// parent is dropped are dropped too, and the remaining `sample` entries
    /// are renumbered. The selection is differentiable.
    pub fn restrict_to(&self, samples: &Labels) -> Result<Self> {
        if samples == &self.samples {
            return Ok(self.clone());
        }
        if samples.names() != self.samples.names() {
            return Err(mismatch(
                "sample names",
                self.samples.names().join(", "),
                samples.names().join(", "),
            ));
        }

        let index = self.samples.index_map();
        let mut rows = Vec::with_capacity(samples.len());
        for row in samples.rows() {
            let position = index
                .get(row)
                .ok_or_else(|| mismatch("samples", &self.samples, format!("row {row:?}")))?;
            rows.push(*position);
        }

        let device = self.values.device();
        let values = self.values.clone().select(0, index_tensor::<B>(&rows, &device));
        let mut restricted = Self::with_components(
            values,
            samples.clone(),
            self.components.clone(),
            self.properties.clone(),
        )?;

        let renumber: HashMap<i32, i32> = rows
            .iter()
            .enumerate()
            .map(|(new, &old)| (old as i32, new as i32))
            .collect();

        for (name, gradient) in &self.gradients {
            let column = gradient
                .samples
                .column_index(GRADIENT_SAMPLE_COLUMN)
                .ok_or_else(|| {
                    NeuralAtomfitError::InvalidData(format!("gradient '{name}' has no sample column"))
                })?;

            let mut keep = Vec::new();
            let mut kept_rows = Vec::new();
            for (i, row) in gradient.samples.rows().enumerate() {
                if let Some(&parent) = renumber.get(&row[column]) {
                    let mut row = row.to_vec();
                    row[column] = parent;
                    keep.push(i);
                    kept_rows.push(row);
                }
            }
            if keep.is_empty() {
                continue;
            }

            let labels = Labels::new(gradient.samples.names().to_vec(), kept_rows)?;
            let values = gradient
                .values
                .clone()
                .select(0, index_tensor::<B>(&keep, &device));
            let gradient = Self::with_components(
                values,
                labels,
                gradient.components.clone(),
                gradient.properties.clone(),
            )?;
            restricted.gradients.insert(name.clone(), gradient);
        }

        Ok(restricted)
    }
}

impl<B: AutodiffBackend> TensorBlock<B> {
    /// The same block on the inner backend, detached from the autodiff graph.
    pub fn inner(&self) -> TensorBlock<B::InnerBackend> {
        TensorBlock {
            values: self.values.clone().inner(),
            samples: self.samples.clone(),
            components: self.components.clone(),
            properties: self.properties.clone(),
            gradients: self
                .gradients
                .iter()
                .map(|(name, g)| (name.clone(), g.inner()))
                .collect(),
        }
    }

    /// Lift a block from the inner backend.
    pub fn from_inner(block: TensorBlock<B::InnerBackend>) -> Self {
        Self {
            values: Tensor::from_inner(block.values),
            samples: block.samples,
            components: block.components,
            properties: block.properties,
            gradients: block
                .gradients
                .into_iter()
                .map(|(name, g)| (name, Self::from_inner(g)))
                .collect(),
        }
    }
}

/// Concatenate sample labels, writing the batch position into the `system`
/// column and adding an offset to the `sample` column.
fn join_labels<'a>(parts: impl Iterator<Item = (usize, &'a Labels, usize)>) -> Result<Labels> {
    let mut names: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    for (position, labels, offset) in parts {
        let system = labels.column_index(SYSTEM_COLUMN);
        let sample = labels.column_index(GRADIENT_SAMPLE_COLUMN);
        for row in labels.rows() {
            let mut row = row.to_vec();
            if let Some(c) = system {
                row[c] = position as i32;
            }
            if let Some(c) = sample {
                row[c] += offset as i32;
            }
            rows.push(row);
        }
        names.get_or_insert_with(|| labels.names().to_vec());
    }
    Ok(Labels::new(names.unwrap_or_default(), rows)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn energy_block(system: i32, value: f32, forces: [f32; 6]) -> TensorBlock<TestBackend> {
        let device = Default::default();
        let samples = Labels::new(vec!["system"], vec![vec![system]]).unwrap();
        let properties = Labels::new(vec!["energy"], vec![vec![0]]).unwrap();
        let gradient = TensorBlock::from_data(
            forces.to_vec(),
            Labels::new(vec!["sample", "atom"], vec![vec![0, 0], vec![0, 1]]).unwrap(),
            vec![Labels::range("xyz", 3)],
            properties.clone(),
            &device,
        )
        .unwrap();
        TensorBlock::from_data(vec![value], samples, vec![], properties, &device)
            .unwrap()
            .with_gradient("positions", gradient)
            .unwrap()
    }

    #[test]
    fn test_shape_validation() {
        let device = Default::default();
        let values = Tensor::<TestBackend, 3>::zeros([2, 1, 1], &device);
        let err = TensorBlock::new(values, Labels::range("system", 3), Labels::single()).unwrap_err();
        assert!(matches!(err, NeuralAtomfitError::ShapeMismatch { .. }));

        let values = Tensor::<TestBackend, 3>::zeros([2, 3, 1], &device);
        assert!(TensorBlock::with_components(
            values,
            Labels::range("system", 2),
            vec![Labels::range("xyz", 3)],
            Labels::single(),
        )
        .is_ok());
    }

    #[test]
    fn test_gradient_must_point_at_parent_rows() {
        let device = Default::default();
        let mut block = TensorBlock::<TestBackend>::from_data(
            vec![1.0],
            Labels::range("system", 1),
            vec![],
            Labels::single(),
            &device,
        )
        .unwrap();
        let gradient = TensorBlock::from_data(
            vec![1.0],
            Labels::new(vec!["sample"], vec![vec![3]]).unwrap(),
            vec![],
            Labels::single(),
            &device,
        )
        .unwrap();
        assert!(block.add_gradient("positions", gradient).is_err());
    }

    #[test]
    fn test_join_rewrites_system_and_sample() {
        let a = energy_block(0, 1.0, [0.0; 6]);
        let b = energy_block(0, 2.0, [1.0; 6]);
        let joined = TensorBlock::join(&[(0, &a), (1, &b)]).unwrap();

        assert_eq!(joined.samples().column("system").unwrap(), vec![0, 1]);
        let values: Vec<f32> = joined.values().to_data().to_vec().unwrap();
        assert_eq!(values, vec![1.0, 2.0]);

        let forces = joined.gradient("positions").unwrap();
        assert_eq!(forces.samples().column("sample").unwrap(), vec![0, 0, 1, 1]);
        assert_eq!(forces.values().dims(), [4, 3, 1]);
    }

    #[test]
    fn test_join_drops_gradients_missing_from_a_part() {
        let device = Default::default();
        let a = energy_block(0, 1.0, [0.0; 6]);
        let b = TensorBlock::<TestBackend>::from_data(
            vec![3.0],
            Labels::new(vec!["system"], vec![vec![0]]).unwrap(),
            vec![],
            Labels::new(vec!["energy"], vec![vec![0]]).unwrap(),
            &device,
        )
        .unwrap();
        let joined = TensorBlock::join(&[(0, &a), (1, &b)]).unwrap();
        assert!(joined.gradient("positions").is_none());
    }

    #[test]
    fn test_join_rejects_different_properties() {
        let device = Default::default();
        let a = energy_block(0, 1.0, [0.0; 6]);
        let b = TensorBlock::<TestBackend>::from_data(
            vec![3.0],
            Labels::new(vec!["system"], vec![vec![0]]).unwrap(),
            vec![],
            Labels::new(vec!["dipole"], vec![vec![0]]).unwrap(),
            &device,
        )
        .unwrap();
        let err = TensorBlock::join(&[(0, &a), (1, &b)]).unwrap_err();
        assert!(matches!(err, NeuralAtomfitError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_restrict_to() {
        let a = energy_block(0, 1.0, [0.0; 6]);
        let b = energy_block(0, 2.0, [1.0; 6]);
        let c = energy_block(0, 3.0, [2.0; 6]);
        let joined = TensorBlock::join(&[(0, &a), (1, &b), (2, &c)]).unwrap();

        let wanted = Labels::new(vec!["system"], vec![vec![2], vec![0]]).unwrap();
        let restricted = joined.restrict_to(&wanted).unwrap();

        let values: Vec<f32> = restricted.values().to_data().to_vec().unwrap();
        assert_eq!(values, vec![3.0, 1.0]);

        let forces = restricted.gradient("positions").unwrap();
        assert_eq!(forces.samples().column("sample").unwrap(), vec![1, 1, 0, 0]);
        let force_values: Vec<f32> = forces.values().to_data().to_vec().unwrap();
        assert_eq!(&force_values[..6], &[0.0; 6]);

        let missing = Labels::new(vec!["system"], vec![vec![7]]).unwrap();
        assert!(joined.restrict_to(&missing).is_err());
    }
}
