//! Per-species linear baseline.

use std::collections::BTreeMap;

use burn::module::{Ignored, Param};
use burn::prelude::*;

use atomfit_core::{IncompatibilityError, Labels, ModelCapabilities, ModelOutput, System};

use crate::block::{TensorBlock, ATOM_COLUMN, SYSTEM_COLUMN};
use crate::error;

use super::AtomisticModel;

/// Configuration for [`CompositionModel`].
#[derive(Config, Debug)]
pub struct CompositionModelConfig {
    /// Declared capabilities. Species and outputs fix the weight shape.
    pub capabilities: ModelCapabilities,
    /// Initial value of every weight.
    #[config(default = 0.0)]
    pub init_value: f64,
}

impl CompositionModelConfig {
    /// Initialize the model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> CompositionModel<B> {
        let shape = [
            self.capabilities.atomic_types.len(),
            self.capabilities.outputs.len(),
        ];
        CompositionModel {
            weights: Param::from_tensor(Tensor::full(shape, self.init_value, device)),
            capabilities: Ignored(self.capabilities.clone()),
        }
    }
}

/// Predicts each output as a sum of one learnable weight per atom species.
///
/// For structure `s` and output `t`, the per-structure prediction is
/// `Σ_atoms w[species, t]`; the per-atom prediction is the weight of each
/// atom's species. Output properties are labeled `(<output name>) = [[0]]`.
#[derive(Module, Debug)]
pub struct CompositionModel<B: Backend> {
    /// Weights, `[species, outputs]`, rows in ascending species order and
    /// columns in output name order.
    weights: Param<Tensor<B, 2>>,
    capabilities: Ignored<ModelCapabilities>,
}

impl<B: Backend> CompositionModel<B> {
    /// Current weights, `[species, outputs]`.
    pub fn weights(&self) -> Tensor<B, 2> {
        self.weights.val()
    }

    fn species_index(&self, species: i32) -> error::Result<usize> {
        self.capabilities
            .atomic_types
            .iter()
            .position(|&t| t == species)
            .ok_or_else(|| {
                IncompatibilityError::UnsupportedSpecies {
                    missing: vec![species],
                    supported: self.capabilities.atomic_types.iter().copied().collect(),
                }
                .into()
            })
    }

    /// Species counts per structure, `[systems, species]`.
    fn counts(&self, systems: &[System], device: &B::Device) -> error::Result<Tensor<B, 2>> {
        let n_types = self.capabilities.atomic_types.len();
        let mut counts = vec![0.0f32; systems.len() * n_types];
        for (s, system) in systems.iter().enumerate() {
            for &species in system.types() {
                counts[s * n_types + self.species_index(species)?] += 1.0;
            }
        }
        Ok(Tensor::from_data(TensorData::new(counts, [systems.len(), n_types]), device))
    }

    /// One-hot species encoding per atom, `[atoms, species]`, plus the
    /// `(system, atom)` labels of the rows.
    fn one_hot(&self, systems: &[System], device: &B::Device) -> error::Result<(Tensor<B, 2>, Labels)> {
        let n_types = self.capabilities.atomic_types.len();
        let n_atoms: usize = systems.iter().map(System::len).sum();
        let mut encoding = vec![0.0f32; n_atoms * n_types];
        let mut rows = Vec::with_capacity(n_atoms);
        for (s, system) in systems.iter().enumerate() {
            for (a, &species) in system.types().iter().enumerate() {
                encoding[rows.len() * n_types + self.species_index(species)?] = 1.0;
                rows.push(vec![s as i32, a as i32]);
            }
        }
        let labels = Labels::new(vec![SYSTEM_COLUMN, ATOM_COLUMN], rows)?;
        let tensor = Tensor::from_data(TensorData::new(encoding, [n_atoms, n_types]), device);
        Ok((tensor, labels))
    }
}

impl<B: Backend> AtomisticModel<B> for CompositionModel<B> {
    fn capabilities(&self) -> &ModelCapabilities {
        &self.capabilities.0
    }

    fn forward(
        &self,
        systems: &[System],
        outputs: &BTreeMap<String, ModelOutput>,
    ) -> error::Result<BTreeMap<String, TensorBlock<B>>> {
        let weights = self.weights.val();
        let device = weights.device();

        let counts = self.counts(systems, &device)?;
        let (one_hot, atom_samples) = self.one_hot(systems, &device)?;
        let mut predictions = BTreeMap::new();

        for (name, requested) in outputs {
            let Some(column) = self.capabilities.outputs.keys().position(|k| k == name) else {
                return Err(IncompatibilityError::UnsupportedTarget {
                    target: name.clone(),
                    available: self.capabilities.outputs.keys().cloned().collect(),
                }
                .into());
            };
            let declared = &self.capabilities.outputs[name];
            let properties = Labels::new(vec![name.as_str()], vec![vec![0]])?;
            let w = weights.clone().narrow(1, column, 1);

            let block = if requested.per_atom {
                if !declared.per_atom {
                    return Err(IncompatibilityError::PerAtomUnsupported {
                        target: name.clone(),
                    }
                    .into());
                }
                let values = one_hot.clone().matmul(w).reshape([atom_samples.len(), 1, 1]);
                TensorBlock::new(values, atom_samples.clone(), properties)?
            } else {
                let values = counts.clone().matmul(w).reshape([systems.len(), 1, 1]);
                TensorBlock::new(values, Labels::range(SYSTEM_COLUMN, systems.len()), properties)?
            };
            predictions.insert(name.clone(), block);
        }

        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomfit_core::IncompatibleField;
    use burn::backend::NdArray;

    use crate::error::NeuralAtomfitError;

    type TestBackend = NdArray;

    fn model() -> CompositionModel<TestBackend> {
        let capabilities = ModelCapabilities::new(
            "Angstrom",
            [1, 8],
            BTreeMap::from([
                ("charges".to_string(), ModelOutput::new("charge", "e").with_per_atom(true)),
                ("energy".to_string(), ModelOutput::new("energy", "eV")),
            ]),
        );
        let model: CompositionModel<TestBackend> = CompositionModelConfig::new(capabilities).init(&Default::default());
        // H: energy -0.5, charge 0.4; O: energy -75.0, charge -0.8
        let weights = Tensor::from_data(
            TensorData::new(vec![0.4f32, -0.5, -0.8, -75.0], [2, 2]),
            &Default::default(),
        );
        CompositionModel {
            weights: Param::from_tensor(weights),
            capabilities: model.capabilities,
        }
    }

    fn water() -> System {
        System::new(vec![8, 1, 1], vec![[0.0; 3], [0.96, 0.0, 0.0], [-0.24, 0.93, 0.0]]).unwrap()
    }

    #[test]
    fn test_per_structure_energy() {
        let model = model();
        let outputs = BTreeMap::from([("energy".to_string(), ModelOutput::new("energy", "eV"))]);
        let predictions = model.forward(&[water(), water()], &outputs).unwrap();

        let energy = &predictions["energy"];
        assert_eq!(energy.samples(), &Labels::range("system", 2));
        assert_eq!(energy.properties(), &Labels::new(vec!["energy"], vec![vec![0]]).unwrap());
        let values: Vec<f32> = energy.values().to_data().to_vec().unwrap();
        assert_eq!(values, vec![-76.0, -76.0]);
    }

    #[test]
    fn test_per_atom_charges() {
        let model = model();
        let outputs = BTreeMap::from([(
            "charges".to_string(),
            ModelOutput::new("charge", "e").with_per_atom(true),
        )]);
        let predictions = model.forward(&[water()], &outputs).unwrap();

        let charges = &predictions["charges"];
        assert_eq!(charges.samples().column("atom").unwrap(), vec![0, 1, 2]);
        let values: Vec<f32> = charges.values().to_data().to_vec().unwrap();
        assert_eq!(values, vec![-0.8, 0.4, 0.4]);
    }

    #[test]
    fn test_unknown_species() {
        let model = model();
        let outputs = BTreeMap::from([("energy".to_string(), ModelOutput::new("energy", "eV"))]);
        let co = System::new(vec![6, 8], vec![[0.0; 3], [1.13, 0.0, 0.0]]).unwrap();
        match model.forward(&[co], &outputs) {
            Err(NeuralAtomfitError::Incompatible(e)) => assert_eq!(e.field(), IncompatibleField::Species),
            other => panic!("expected an incompatibility, got {other:?}"),
        }
    }

    #[test]
    fn test_capabilities_follow_the_module() {
        use burn::backend::Autodiff;
        use burn::module::AutodiffModule;

        let capabilities = model().capabilities().clone();
        let model = CompositionModelConfig::new(capabilities.clone())
            .init::<Autodiff<TestBackend>>(&Default::default());

        let inner = model.valid();
        assert_eq!(inner.capabilities(), &capabilities);
        assert_eq!(model.clone().fork(&Default::default()).capabilities(), &capabilities);
        assert_eq!(model.num_params(), 4);
    }

    #[test]
    fn test_per_atom_energy_is_rejected() {
        let model = model();
        let outputs = BTreeMap::from([(
            "energy".to_string(),
            ModelOutput::new("energy", "eV").with_per_atom(true),
        )]);
        assert!(model.forward(&[water()], &outputs).is_err());
    }
}
