//! Training loop over several datasets and devices.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::{GradientsAccumulator, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use atomfit_core::{check_compatibility, check_devices, DatasetInfo, ModelCapabilities, ModelOutput};

use crate::block::TensorBlock;
use crate::config::TrainingConfig;
use crate::data::{collate, BatchSampler, Dataset, Sample};
use crate::error::{NeuralAtomfitError, Result};
use crate::loss::TargetDictLoss;
use crate::model::AtomisticModel;

use super::checkpoint::{checkpoint_path, load_checkpoint, save_checkpoint, TrainingState};
use super::metrics::{scalar, EpochSummary, LossTracker, RmseAccumulator};

/// Why a run finished normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// `num_epochs` epochs were completed.
    EpochBudget,
    /// The validation loss stopped improving.
    EarlyStopping,
}

/// Final state of a training run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainingStatus {
    /// Training ran to completion.
    Finished {
        /// What ended the run.
        reason: FinishReason,
    },
    /// A loss became NaN or infinite; no optimizer step was taken with it.
    Aborted {
        /// Epoch of the offending batch.
        epoch: usize,
        /// Index of the offending batch within the epoch.
        batch: usize,
        /// Target whose contribution was non-finite, if isolable.
        target: Option<String>,
    },
}

impl TrainingStatus {
    /// Whether the run finished without aborting.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

/// Result of [`Trainer::train`].
#[derive(Debug)]
pub struct TrainingReport<M> {
    /// The trained model.
    pub model: M,
    /// How the run ended.
    pub status: TrainingStatus,
    /// Number of completed epochs, including those before a resume.
    pub epochs_completed: usize,
    /// Most recent checkpoint written or resumed from.
    pub last_checkpoint: Option<PathBuf>,
    /// Per-epoch summaries, including those before a resume.
    pub history: Vec<EpochSummary>,
}

/// Outputs to request and the loss, fixed at initialization.
struct Plan {
    outputs: BTreeMap<String, ModelOutput>,
    loss: TargetDictLoss,
}

/// Gradients of one batch, reduced onto the main device.
struct BatchStep {
    grads: GradientsParams,
    loss: f64,
}

/// Data-parallel trainer for [`AtomisticModel`]s.
///
/// The first device is the main device: it holds the model and optimizer
/// state. Each batch is split into contiguous shards, one per device; every
/// shard runs on a replica forked from the model and the gradients are
/// summed on the main device before a single optimizer step.
pub struct Trainer<B: AutodiffBackend> {
    config: TrainingConfig,
    devices: Vec<B::Device>,
    checkpoint_dir: PathBuf,
}

impl<B: AutodiffBackend> fmt::Debug for Trainer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trainer")
            .field("config", &format_args!("{}", self.config))
            .field("devices", &self.devices)
            .field("checkpoint_dir", &self.checkpoint_dir)
            .finish()
    }
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Create a trainer.
    ///
    /// Fails on an invalid configuration or an empty device list.
    pub fn new(
        config: TrainingConfig,
        devices: Vec<B::Device>,
        checkpoint_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        config.validate().map_err(NeuralAtomfitError::config)?;
        if devices.is_empty() {
            return Err(NeuralAtomfitError::EmptyDeviceList);
        }
        Ok(Self {
            config,
            devices,
            checkpoint_dir: checkpoint_dir.into(),
        })
    }

    /// Training configuration.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Devices, main device first.
    pub fn devices(&self) -> &[B::Device] {
        &self.devices
    }

    /// Directory checkpoints are written to.
    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    fn main_device(&self) -> &B::Device {
        &self.devices[0]
    }

    /// Train `model` from scratch.
    pub fn train<M>(
        &self,
        model: M,
        train: &[Dataset<B>],
        validation: &[Dataset<B>],
    ) -> Result<TrainingReport<M>>
    where
        M: AtomisticModel<B> + AutodiffModule<B>,
        M::InnerModule: AtomisticModel<B::InnerBackend>,
    {
        let plan = self.plan(model.capabilities(), train, validation)?;
        let optimizer = self.config.optimizer.init::<B, M>();
        let state = TrainingState::new(&self.config);
        self.run(model, optimizer, state, &plan, train, validation, None)
    }

    /// Resume training from a checkpoint written by a previous run.
    ///
    /// `model` provides the architecture; its parameters are replaced by
    /// the checkpointed ones. Continuing to `num_epochs` gives the same
    /// result as a run that was never interrupted.
    pub fn train_from_checkpoint<M>(
        &self,
        model: M,
        checkpoint: &Path,
        train: &[Dataset<B>],
        validation: &[Dataset<B>],
    ) -> Result<TrainingReport<M>>
    where
        M: AtomisticModel<B> + AutodiffModule<B>,
        M::InnerModule: AtomisticModel<B::InnerBackend>,
    {
        let plan = self.plan(model.capabilities(), train, validation)?;
        let optimizer = self.config.optimizer.init::<B, M>();
        let (model, optimizer, state) =
            load_checkpoint(checkpoint, model, optimizer, self.main_device())?;
        if state.seed != self.config.seed {
            log::warn!(
                "Checkpoint seed {} differs from configured seed {}; using the checkpoint seed",
                state.seed,
                self.config.seed
            );
        }
        log::info!("Resuming training at epoch {}", state.epoch);
        self.run(
            model,
            optimizer,
            state,
            &plan,
            train,
            validation,
            Some(checkpoint.to_path_buf()),
        )
    }

    /// Negotiate capabilities and build the loss for all datasets.
    fn plan(
        &self,
        capabilities: &ModelCapabilities,
        train: &[Dataset<B>],
        validation: &[Dataset<B>],
    ) -> Result<Plan> {
        if train.is_empty() {
            return Err(NeuralAtomfitError::config(
                "at least one training dataset is required",
            ));
        }
        if !self.config.device_kinds.is_empty() {
            check_devices(capabilities, self.config.device_kinds.as_slice())?;
        }
        for dataset in train.iter().chain(validation) {
            check_compatibility(capabilities, dataset.info())?;
        }

        let info = DatasetInfo::union(train.iter().chain(validation).map(Dataset::info))?
            .ok_or_else(|| NeuralAtomfitError::config("no dataset to train on"))?;
        let weights = &self.config.loss_weights;
        if let Some(target) = weights.unweighted_targets(&info).next() {
            return Err(NeuralAtomfitError::MissingWeight {
                target: target.to_string(),
            });
        }

        let mut outputs = BTreeMap::new();
        for (name, target) in &info.targets {
            let declared = capabilities.outputs.get(name).ok_or_else(|| {
                NeuralAtomfitError::InvalidData(format!("model has no output '{name}'"))
            })?;
            outputs.insert(
                name.clone(),
                ModelOutput::new(declared.quantity.clone(), declared.unit.clone())
                    .with_per_atom(target.per_atom),
            );
        }

        Ok(Plan {
            outputs,
            loss: TargetDictLoss::new(weights.clone()),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run<M, O>(
        &self,
        model: M,
        mut optimizer: O,
        mut state: TrainingState,
        plan: &Plan,
        train: &[Dataset<B>],
        validation: &[Dataset<B>],
        resumed_from: Option<PathBuf>,
    ) -> Result<TrainingReport<M>>
    where
        M: AtomisticModel<B> + AutodiffModule<B>,
        M::InnerModule: AtomisticModel<B::InnerBackend>,
        O: Optimizer<M, B>,
    {
        let mut model = model.fork(self.main_device());
        let sampler = BatchSampler::new(
            train.iter().map(Dataset::len).collect(),
            self.config.batch_size,
            self.config.sampling,
            state.seed,
        );
        log::info!(
            "Training on {} device(s): {} training dataset(s) with {} samples, {} batches per epoch",
            self.devices.len(),
            train.len(),
            sampler.num_samples(),
            sampler.num_batches()
        );

        let mut last_checkpoint = resumed_from;
        if self.config.checkpoint_interval <= 0 && state.epoch == 0 && last_checkpoint.is_none() {
            last_checkpoint = self.try_checkpoint(&model, &optimizer, &state);
        }

        let mut status = TrainingStatus::Finished {
            reason: FinishReason::EpochBudget,
        };

        'epochs: while state.epoch < self.config.num_epochs {
            let epoch = state.epoch;
            let batches = sampler.epoch_batches(epoch);
            let mut tracker = LossTracker::new(self.config.log_interval);
            let mut epoch_loss = 0.0;

            for (batch_index, indices) in batches.iter().enumerate() {
                let samples = indices
                    .iter()
                    .map(|&(d, i)| {
                        train[d].get(i).ok_or_else(|| {
                            NeuralAtomfitError::InvalidData(format!(
                                "sample {i} of training dataset {d} does not exist"
                            ))
                        })
                    })
                    .collect::<Result<Vec<&Sample<B>>>>()?;

                let step = match self.batch_gradients(&model, &samples, plan, epoch, batch_index) {
                    Ok(step) => step,
                    Err(NeuralAtomfitError::NumericalDivergence {
                        epoch,
                        batch,
                        target,
                    }) => {
                        log::error!(
                            "Non-finite loss at epoch {} batch {} (target: {}); aborting",
                            epoch,
                            batch,
                            target.as_deref().unwrap_or("unknown")
                        );
                        status = TrainingStatus::Aborted {
                            epoch,
                            batch,
                            target,
                        };
                        break 'epochs;
                    }
                    Err(e) => return Err(e),
                };

                let lr = state.scheduler.learning_rate(state.step);
                model = optimizer.step(lr, model, step.grads);
                state.step += 1;

                epoch_loss += step.loss;
                tracker.add(step.loss);
                if (batch_index + 1) % self.config.log_interval == 0 {
                    log::info!(
                        "Epoch {} batch {}/{}: loss = {:.6} (lr = {:.2e})",
                        epoch,
                        batch_index + 1,
                        batches.len(),
                        tracker.average(),
                        lr
                    );
                }
            }

            let train_loss = epoch_loss / batches.len().max(1) as f64;
            let mut summary = EpochSummary::new(epoch, train_loss, state.scheduler.current());

            let mut should_stop = false;
            if !validation.is_empty() && (epoch + 1) % self.config.validation_interval == 0 {
                let (validation_loss, rmse) = self.validate(&model, validation, plan)?;
                summary.validation_rmse = rmse;
                if validation_loss.is_finite() {
                    summary.validation_loss = Some(validation_loss);
                } else {
                    log::warn!("Validation loss at epoch {} is not finite", epoch);
                }
                state.scheduler.step(validation_loss);
                should_stop = state.early_stopping.update(validation_loss);
            } else if validation.is_empty() {
                state.scheduler.step(train_loss);
            }
            summary.learning_rate = state.scheduler.current();
            summary.log();

            state.history.push(summary);
            state.epoch = epoch + 1;

            let interval = self.config.checkpoint_interval;
            if interval > 0 && state.epoch as i64 % interval == 0 {
                if let Some(path) = self.try_checkpoint(&model, &optimizer, &state) {
                    last_checkpoint = Some(path);
                }
            }

            if should_stop {
                log::info!(
                    "No validation improvement for {} passes, stopping early",
                    self.config.early_stopping_patience.unwrap_or_default()
                );
                status = TrainingStatus::Finished {
                    reason: FinishReason::EarlyStopping,
                };
                break;
            }
        }

        Ok(TrainingReport {
            model,
            status,
            epochs_completed: state.epoch,
            last_checkpoint,
            history: state.history,
        })
    }

    /// Forward and backward one batch, sharded across devices.
    fn batch_gradients<M>(
        &self,
        model: &M,
        samples: &[&Sample<B>],
        plan: &Plan,
        epoch: usize,
        batch: usize,
    ) -> Result<BatchStep>
    where
        M: AtomisticModel<B> + AutodiffModule<B>,
    {
        let shard_size = samples.len().div_ceil(self.devices.len()).max(1);
        let mut accumulator = GradientsAccumulator::<M>::new();
        let mut total = 0.0;

        for (shard, device) in samples.chunks(shard_size).zip(&self.devices) {
            let replica = model.clone().fork(device);
            let shard_batch = collate(shard)?.to_device(device);
            let predictions = align(
                replica.forward(&shard_batch.systems, &plan.outputs)?,
                &shard_batch.targets,
            )?;

            let mut shard_loss: Option<Tensor<B, 1>> = None;
            for (target, term) in plan.loss.compute_per_target(&predictions, &shard_batch.targets)? {
                let value = scalar(term.clone());
                if !value.is_finite() {
                    return Err(NeuralAtomfitError::NumericalDivergence {
                        epoch,
                        batch,
                        target: Some(target),
                    });
                }
                total += value;
                shard_loss = Some(match shard_loss {
                    Some(sum) => sum + term,
                    None => term,
                });
            }

            let Some(shard_loss) = shard_loss else {
                continue;
            };
            let grads = GradientsParams::from_grads(shard_loss.backward(), &replica)
                .to_device(self.main_device(), model);
            accumulator.accumulate(model, grads);
        }

        if !total.is_finite() {
            return Err(NeuralAtomfitError::NumericalDivergence {
                epoch,
                batch,
                target: None,
            });
        }

        let grads = accumulator.grads();
        if !gradients_are_finite(model, &grads) {
            return Err(NeuralAtomfitError::NumericalDivergence {
                epoch,
                batch,
                target: None,
            });
        }

        Ok(BatchStep { grads, loss: total })
    }

    /// Mean validation loss per batch and RMSE per target.
    fn validate<M>(
        &self,
        model: &M,
        datasets: &[Dataset<B>],
        plan: &Plan,
    ) -> Result<(f64, BTreeMap<String, f64>)>
    where
        M: AutodiffModule<B>,
        M::InnerModule: AtomisticModel<B::InnerBackend>,
    {
        let model = model.valid();
        let mut total = 0.0;
        let mut num_batches = 0usize;
        let mut rmse = RmseAccumulator::new();

        for dataset in datasets {
            let samples: Vec<&Sample<B>> = dataset.iter().collect();
            for chunk in samples.chunks(self.config.batch_size) {
                let batch = collate(chunk)?.inner().to_device(self.main_device());
                let predictions = align(model.forward(&batch.systems, &plan.outputs)?, &batch.targets)?;
                total += scalar(plan.loss.compute(&predictions, &batch.targets)?);
                rmse.update(&predictions, &batch.targets)?;
                num_batches += 1;
            }
        }

        Ok((total / num_batches.max(1) as f64, rmse.finalize()))
    }

    fn try_checkpoint<M, O>(&self, model: &M, optimizer: &O, state: &TrainingState) -> Option<PathBuf>
    where
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        match save_checkpoint(&self.checkpoint_dir, model, optimizer, state) {
            Ok(path) => Some(path),
            Err(e) => {
                let error = NeuralAtomfitError::CheckpointWrite {
                    path: checkpoint_path(&self.checkpoint_dir, state.epoch),
                    message: e.to_string(),
                };
                log::warn!("{}; training continues", error);
                None
            }
        }
    }
}

/// Whether every gradient registered for a parameter of `model` is finite.
fn gradients_are_finite<B, M>(model: &M, grads: &GradientsParams) -> bool
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut visitor = FiniteGradients {
        grads,
        finite: true,
    };
    model.visit(&mut visitor);
    visitor.finite
}

struct FiniteGradients<'a> {
    grads: &'a GradientsParams,
    finite: bool,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for FiniteGradients<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if !self.finite {
            return;
        }
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            // NaN and infinity both survive the sum
            self.finite = scalar(grad.abs().sum()).is_finite();
        }
    }
}

/// Restrict each prediction to the samples its reference covers.
fn align<B: Backend>(
    predictions: BTreeMap<String, TensorBlock<B>>,
    references: &BTreeMap<String, TensorBlock<B>>,
) -> Result<BTreeMap<String, TensorBlock<B>>> {
    predictions
        .into_iter()
        .filter_map(|(name, block)| {
            let reference = references.get(&name)?;
            Some(block.restrict_to(reference.samples()).map(|b| (name, b)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomfit_core::{Labels, System, TargetInfo, WeightTable};
    use burn::backend::{Autodiff, NdArray};
    use burn::module::list_param_ids;

    use crate::model::{CompositionModel, CompositionModelConfig};

    type TestBackend = Autodiff<NdArray>;

    fn composition(init_value: f64) -> CompositionModel<TestBackend> {
        let capabilities = ModelCapabilities::new(
            "Angstrom",
            [1, 8],
            BTreeMap::from([("energy".to_string(), ModelOutput::new("energy", "eV"))]),
        );
        CompositionModelConfig::new(capabilities)
            .with_init_value(init_value)
            .init(&Default::default())
    }

    fn energy_dataset() -> Dataset<TestBackend> {
        let device = Default::default();
        let samples = [(vec![8, 1, 1], -3.0f32), (vec![1, 1], -1.0)]
            .into_iter()
            .map(|(types, energy)| {
                let positions = (0..types.len()).map(|i| [i as f32, 0.0, 0.0]).collect();
                let block = TensorBlock::from_data(
                    vec![energy],
                    Labels::range("system", 1),
                    vec![],
                    Labels::new(vec!["energy"], vec![vec![0]]).unwrap(),
                    &device,
                )
                .unwrap();
                Sample::new(System::new(types, positions).unwrap()).with_target("energy", block)
            })
            .collect();
        let targets = BTreeMap::from([("energy".to_string(), TargetInfo::new("energy", "eV"))]);
        Dataset::from_samples("Angstrom", targets, samples).unwrap()
    }

    fn trainer() -> Trainer<TestBackend> {
        let config = TrainingConfig::default()
            .with_loss_weights(WeightTable::new().with("energy", 1.0).unwrap());
        Trainer::new(config, vec![Default::default()], "ckpt").unwrap()
    }

    fn bits(model: &CompositionModel<TestBackend>) -> Vec<u32> {
        let values: Vec<f32> = model.weights().into_data().to_vec().unwrap();
        values.into_iter().map(f32::to_bits).collect()
    }

    #[test]
    fn test_new_rejects_empty_device_list() {
        let err = Trainer::<TestBackend>::new(TrainingConfig::default(), Vec::new(), "ckpt")
            .unwrap_err();
        assert!(matches!(err, NeuralAtomfitError::EmptyDeviceList));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = TrainingConfig::default().with_batch_size(0);
        let err = Trainer::<TestBackend>::new(config, vec![Default::default()], "ckpt").unwrap_err();
        assert!(matches!(err, NeuralAtomfitError::InvalidConfig { .. }));
    }

    #[test]
    fn test_align_drops_unreferenced_outputs() {
        let device = Default::default();
        let predicted = TensorBlock::<NdArray>::from_data(
            vec![1.0, 2.0, 3.0],
            Labels::range("system", 3),
            Vec::new(),
            Labels::range("energy", 1),
            &device,
        )
        .unwrap();
        let reference = TensorBlock::<NdArray>::from_data(
            vec![0.0],
            Labels::new(vec!["system"], vec![vec![2]]).unwrap(),
            Vec::new(),
            Labels::range("energy", 1),
            &device,
        )
        .unwrap();

        let predictions = BTreeMap::from([
            ("energy".to_string(), predicted.clone()),
            ("dipole".to_string(), predicted),
        ]);
        let references = BTreeMap::from([("energy".to_string(), reference)]);

        let aligned = align(predictions, &references).unwrap();
        assert_eq!(aligned.len(), 1);
        let values: Vec<f32> = aligned["energy"].values().clone().into_data().to_vec().unwrap();
        assert_eq!(values, vec![3.0]);
    }

    #[test]
    fn test_validation_leaves_parameters_untouched() {
        let trainer = trainer();
        let model = composition(0.25);
        let datasets = [energy_dataset()];
        let plan = trainer.plan(model.capabilities(), &datasets, &[]).unwrap();

        let before = bits(&model);
        let (loss, rmse) = trainer.validate(&model, &datasets, &plan).unwrap();
        let (again, _) = trainer.validate(&model, &datasets, &plan).unwrap();

        assert_eq!(bits(&model), before);
        assert!(loss > 0.0);
        assert_eq!(loss.to_bits(), again.to_bits());
        assert!(rmse.contains_key("energy"));
    }

    #[test]
    fn test_plan_requires_every_primary_weight() {
        let config = TrainingConfig::default()
            .with_loss_weights(WeightTable::new().with("energy_positions_gradients", 1.0).unwrap());
        let trainer = Trainer::<TestBackend>::new(config, vec![Default::default()], "ckpt").unwrap();
        let model = composition(0.0);

        match trainer.plan(model.capabilities(), &[energy_dataset()], &[]) {
            Err(NeuralAtomfitError::MissingWeight { target }) => assert_eq!(target, "energy"),
            Err(other) => panic!("expected MissingWeight, got {other:?}"),
            Ok(_) => panic!("expected MissingWeight"),
        }
    }

    #[test]
    fn test_non_finite_gradients_are_detected() {
        let model = composition(0.0);
        let id = list_param_ids(&model)[0];
        let device = Default::default();
        let gradient =
            |values: Vec<f32>| Tensor::<NdArray, 2>::from_data(TensorData::new(values, [2, 1]), &device);

        let mut grads = GradientsParams::new();
        assert!(gradients_are_finite::<TestBackend, _>(&model, &grads));

        grads.register(id, gradient(vec![0.5, -1.0]));
        assert!(gradients_are_finite::<TestBackend, _>(&model, &grads));

        grads.register(id, gradient(vec![0.5, f32::INFINITY]));
        assert!(!gradients_are_finite::<TestBackend, _>(&model, &grads));

        grads.register(id, gradient(vec![f32::NAN, 0.0]));
        assert!(!gradients_are_finite::<TestBackend, _>(&model, &grads));
    }

    #[test]
    fn test_debug_names_devices() {
        let debug = format!("{:?}", trainer());
        assert!(debug.starts_with("Trainer"));
        assert!(debug.contains("ckpt"));
    }
}
