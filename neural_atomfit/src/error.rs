//! Error types for neural_atomfit.

use std::path::PathBuf;

use thiserror::Error;

use atomfit_core::{CoreError, IncompatibilityError};

/// Errors that can occur while computing losses or training.
#[derive(Error, Debug)]
pub enum NeuralAtomfitError {
    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// A target contributing to the loss has no primary weight.
    #[error("missing loss weight for target '{target}'")]
    MissingWeight {
        /// Target name.
        target: String,
    },

    /// Training was requested on zero devices.
    #[error("device list is empty: at least one device is required")]
    EmptyDeviceList,

    /// Model and dataset capabilities do not match.
    #[error("incompatible model and dataset: {0}")]
    Incompatible(#[from] IncompatibilityError),

    /// Labels of two blocks that must line up differ.
    #[error("shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        /// Which block axis or target failed.
        context: String,
        /// Expected labels or shape.
        expected: String,
        /// Actual labels or shape.
        got: String,
    },

    /// The loss became NaN or infinite.
    #[error("non-finite loss at epoch {epoch}, batch {batch}{}", target_suffix(.target))]
    NumericalDivergence {
        /// Epoch index (0-based).
        epoch: usize,
        /// Batch index within the epoch (0-based).
        batch: usize,
        /// Target whose contribution was non-finite, if isolable.
        target: Option<String>,
    },

    /// Writing a checkpoint failed.
    #[error("failed to write checkpoint {path:?}: {message}")]
    CheckpointWrite {
        /// Checkpoint directory that was being written.
        path: PathBuf,
        /// Underlying failure.
        message: String,
    },

    /// Error from the backend-free data model.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error while recording or loading parameters.
    #[error("recorder error: {0}")]
    Recorder(#[from] burn::record::RecorderError),

    /// Error while encoding or decoding training state.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or corrupted data.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

fn target_suffix(target: &Option<String>) -> String {
    target
        .as_ref()
        .map(|t| format!(" (target '{t}')"))
        .unwrap_or_default()
}

/// Coarse classification of [`NeuralAtomfitError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Fatal before or at the start of a phase, reported with the offending key.
    Configuration,
    /// Capability negotiation failed.
    Incompatibility,
    /// Predicted and reference blocks do not line up.
    ShapeMismatch,
    /// Non-finite loss.
    NumericalDivergence,
    /// Checkpoint could not be written. Not fatal during training.
    CheckpointWrite,
    /// Malformed datasets or blocks.
    Data,
    /// File system or serialization failure.
    Io,
}

impl NeuralAtomfitError {
    /// Which class of failure this is.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig { .. } | Self::MissingWeight { .. } | Self::EmptyDeviceList => {
                ErrorKind::Configuration
            }
            Self::Core(CoreError::InvalidWeight { .. }) => ErrorKind::Configuration,
            Self::Incompatible(_) => ErrorKind::Incompatibility,
            Self::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            Self::NumericalDivergence { .. } => ErrorKind::NumericalDivergence,
            Self::CheckpointWrite { .. } => ErrorKind::CheckpointWrite,
            Self::Core(_) | Self::InvalidData(_) => ErrorKind::Data,
            Self::Io(_) | Self::Recorder(_) | Self::Json(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Result type for neural_atomfit operations.
pub type Result<T> = std::result::Result<T, NeuralAtomfitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind() {
        let err = NeuralAtomfitError::MissingWeight {
            target: "energy".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), "missing loss weight for target 'energy'");

        let err = NeuralAtomfitError::from(CoreError::InvalidWeight {
            key: "energy".to_string(),
            weight: -1.0,
        });
        assert_eq!(err.kind(), ErrorKind::Configuration);

        assert_eq!(NeuralAtomfitError::EmptyDeviceList.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_divergence_message_names_target() {
        let err = NeuralAtomfitError::NumericalDivergence {
            epoch: 2,
            batch: 5,
            target: Some("energy".to_string()),
        };
        assert_eq!(err.to_string(), "non-finite loss at epoch 2, batch 5 (target 'energy')");

        let err = NeuralAtomfitError::NumericalDivergence {
            epoch: 0,
            batch: 1,
            target: None,
        };
        assert_eq!(err.to_string(), "non-finite loss at epoch 0, batch 1");
    }
}
