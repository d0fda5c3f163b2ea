//! Checkpoint save/load for resumable training.
//!
//! A checkpoint is a directory `checkpoint_<epoch>` holding:
//! - `model.mpk`: the model record
//! - `optimizer.mpk`: the optimizer record
//! - `state.json`: counters, scheduler and early-stopping state, history
//!
//! Files are written into a hidden temporary directory that is renamed into
//! place once everything has been written, so a crash never leaves a
//! half-written `checkpoint_<epoch>` behind.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::error::{NeuralAtomfitError, Result};

use super::metrics::EpochSummary;
use super::scheduler::{EarlyStopping, LearningRateScheduler};

/// Format version of `state.json`.
pub const CHECKPOINT_VERSION: u32 = 1;

const CHECKPOINT_PREFIX: &str = "checkpoint_";
const STATE_FILE: &str = "state.json";
const MODEL_FILE: &str = "model";
const OPTIMIZER_FILE: &str = "optimizer";
const RECORD_EXTENSION: &str = "mpk";

type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Everything besides the model and optimizer records needed to resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Format version.
    pub version: u32,
    /// Number of completed epochs.
    pub epoch: usize,
    /// Number of optimizer steps taken.
    pub step: usize,
    /// Seed of the batch sampler.
    pub seed: u64,
    /// Learning-rate schedule.
    pub scheduler: LearningRateScheduler,
    /// Early-stopping state.
    pub early_stopping: EarlyStopping,
    /// Summaries of the completed epochs.
    #[serde(default)]
    pub history: Vec<EpochSummary>,
}

impl TrainingState {
    /// Fresh state for a run described by `config`.
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            epoch: 0,
            step: 0,
            seed: config.seed,
            scheduler: LearningRateScheduler::from_config(config),
            early_stopping: EarlyStopping::new(config.early_stopping_patience),
            history: Vec::new(),
        }
    }
}

/// Directory of the checkpoint for `epoch` under `base_dir`.
pub fn checkpoint_path(base_dir: &Path, epoch: usize) -> PathBuf {
    base_dir.join(format!("{CHECKPOINT_PREFIX}{epoch}"))
}

/// Save model, optimizer and state under `base_dir/checkpoint_<state.epoch>`.
///
/// An existing checkpoint for the same epoch is replaced. Returns the
/// checkpoint directory.
pub fn save_checkpoint<B, M, O>(
    base_dir: &Path,
    model: &M,
    optimizer: &O,
    state: &TrainingState,
) -> Result<PathBuf>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let final_dir = checkpoint_path(base_dir, state.epoch);
    let tmp_dir = base_dir.join(format!(".{CHECKPOINT_PREFIX}{}.tmp", state.epoch));

    if tmp_dir.exists() {
        fs::remove_dir_all(&tmp_dir)?;
    }
    fs::create_dir_all(&tmp_dir)?;

    let recorder = CheckpointRecorder::new();
    model
        .clone()
        .save_file(tmp_dir.join(MODEL_FILE), &recorder)?;
    Recorder::<B>::record(&recorder, optimizer.to_record(), tmp_dir.join(OPTIMIZER_FILE))?;
    fs::write(tmp_dir.join(STATE_FILE), serde_json::to_string_pretty(state)?)?;

    if final_dir.exists() {
        fs::remove_dir_all(&final_dir)?;
    }
    fs::rename(&tmp_dir, &final_dir)?;

    log::info!("Saved checkpoint to {:?}", final_dir);
    Ok(final_dir)
}

/// Load a checkpoint written by [`save_checkpoint`].
///
/// `model` and `optimizer` provide the structure the records are loaded
/// into; their current values are replaced.
pub fn load_checkpoint<B, M, O>(
    dir: &Path,
    model: M,
    optimizer: O,
    device: &B::Device,
) -> Result<(M, O, TrainingState)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    if !checkpoint_exists(dir) {
        return Err(NeuralAtomfitError::InvalidData(format!(
            "{:?} is not a complete checkpoint",
            dir
        )));
    }

    let state: TrainingState = serde_json::from_str(&fs::read_to_string(dir.join(STATE_FILE))?)?;
    if state.version != CHECKPOINT_VERSION {
        return Err(NeuralAtomfitError::InvalidData(format!(
            "unsupported checkpoint version {} (expected {})",
            state.version, CHECKPOINT_VERSION
        )));
    }

    let recorder = CheckpointRecorder::new();
    let model = model.load_file(dir.join(MODEL_FILE), &recorder, device)?;
    let record = Recorder::<B>::load(&recorder, dir.join(OPTIMIZER_FILE), device)?;
    let optimizer = optimizer.load_record(record);

    log::info!(
        "Loaded checkpoint from {:?} (epoch {}, step {})",
        dir,
        state.epoch,
        state.step
    );
    Ok((model, optimizer, state))
}

/// Whether `dir` holds a complete checkpoint.
pub fn checkpoint_exists(dir: &Path) -> bool {
    dir.join(STATE_FILE).is_file()
        && dir.join(MODEL_FILE).with_extension(RECORD_EXTENSION).is_file()
        && dir
            .join(OPTIMIZER_FILE)
            .with_extension(RECORD_EXTENSION)
            .is_file()
}

/// All complete checkpoints under `base_dir`, sorted by epoch.
pub fn list_checkpoints(base_dir: &Path) -> Vec<(usize, PathBuf)> {
    let Ok(entries) = fs::read_dir(base_dir) else {
        return Vec::new();
    };

    let mut checkpoints: Vec<(usize, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let epoch = path
                .file_name()?
                .to_str()?
                .strip_prefix(CHECKPOINT_PREFIX)?
                .parse()
                .ok()?;
            checkpoint_exists(&path).then_some((epoch, path))
        })
        .collect();
    checkpoints.sort_by_key(|(epoch, _)| *epoch);
    checkpoints
}

/// The most recent complete checkpoint under `base_dir`.
pub fn find_latest_checkpoint(base_dir: &Path) -> Option<PathBuf> {
    list_checkpoints(base_dir).pop().map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch_checkpoint(base: &Path, epoch: usize) -> PathBuf {
        let dir = checkpoint_path(base, epoch);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(STATE_FILE), "{}").unwrap();
        fs::write(dir.join("model.mpk"), b"").unwrap();
        fs::write(dir.join("optimizer.mpk"), b"").unwrap();
        dir
    }

    #[test]
    fn test_checkpoint_path() {
        assert_eq!(
            checkpoint_path(Path::new("runs"), 12),
            Path::new("runs").join("checkpoint_12")
        );
    }

    #[test]
    fn test_find_latest_checkpoint() {
        let dir = tempdir().unwrap();
        assert!(find_latest_checkpoint(dir.path()).is_none());

        let zero = touch_checkpoint(dir.path(), 0);
        assert_eq!(find_latest_checkpoint(dir.path()), Some(zero));

        touch_checkpoint(dir.path(), 2);
        let ten = touch_checkpoint(dir.path(), 10);
        // Incomplete checkpoints and stray temporaries are ignored
        fs::create_dir_all(checkpoint_path(dir.path(), 20)).unwrap();
        fs::create_dir_all(dir.path().join(".checkpoint_30.tmp")).unwrap();

        assert_eq!(find_latest_checkpoint(dir.path()), Some(ten));
        let epochs: Vec<usize> = list_checkpoints(dir.path()).into_iter().map(|(e, _)| e).collect();
        assert_eq!(epochs, vec![0, 2, 10]);
    }

    #[test]
    fn test_state_json() {
        let config = TrainingConfig::default().with_early_stopping_patience(Some(3));
        let mut state = TrainingState::new(&config);
        state.epoch = 4;
        state.step = 40;
        state.history.push(EpochSummary::new(3, 0.5, 1e-3));

        let json = serde_json::to_string_pretty(&state).unwrap();
        let parsed: TrainingState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
