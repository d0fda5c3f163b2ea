//! Compatibility checks between a model and a dataset.
//!
//! [`check_compatibility`] stops at the first failing check and returns an
//! [`IncompatibilityError`] naming the mismatched field, so callers can tell
//! an unsupported species from an unsupported target or a unit mismatch with
//! [`IncompatibilityError::field`].

use thiserror::Error;

use crate::capabilities::ModelCapabilities;
use crate::target::DatasetInfo;

/// The capability field that failed negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncompatibleField {
    /// Length units differ.
    LengthUnit,
    /// The dataset contains species the model does not support.
    Species,
    /// The dataset has a target the model cannot predict.
    Target,
    /// A target's unit differs between model and dataset.
    Unit,
    /// A per-atom target meets a per-structure model output.
    PerAtom,
    /// A requested device kind is not supported.
    Device,
}

/// A model cannot be used with a dataset.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IncompatibilityError {
    /// Length units differ.
    #[error("length unit mismatch: model uses '{model}' but dataset uses '{dataset}'")]
    LengthUnitMismatch {
        /// Model length unit.
        model: String,
        /// Dataset length unit.
        dataset: String,
    },

    /// Species present in the dataset are unknown to the model.
    #[error("unsupported atomic species {missing:?}: model supports {supported:?}")]
    UnsupportedSpecies {
        /// Species missing from the model, sorted.
        missing: Vec<i32>,
        /// Species the model supports, sorted.
        supported: Vec<i32>,
    },

    /// The model has no output for a dataset target.
    #[error("unsupported target '{target}': model outputs are {available:?}")]
    UnsupportedTarget {
        /// Target name.
        target: String,
        /// Output names the model declares.
        available: Vec<String>,
    },

    /// Units differ for a target.
    #[error("unit mismatch for target '{target}': model uses '{model}' but dataset uses '{dataset}'")]
    UnitMismatch {
        /// Target name.
        target: String,
        /// Model unit.
        model: String,
        /// Dataset unit.
        dataset: String,
    },

    /// The dataset target is per-atom but the model output is not.
    #[error("target '{target}' is per-atom but the model only predicts it per structure")]
    PerAtomUnsupported {
        /// Target name.
        target: String,
    },

    /// A device kind is not supported by the model.
    #[error("unsupported device '{device}': model supports {supported:?}")]
    UnsupportedDevice {
        /// Requested device kind.
        device: String,
        /// Supported device kinds.
        supported: Vec<String>,
    },
}

impl IncompatibilityError {
    /// Which capability field failed.
    pub fn field(&self) -> IncompatibleField {
        match self {
            Self::LengthUnitMismatch { .. } => IncompatibleField::LengthUnit,
            Self::UnsupportedSpecies { .. } => IncompatibleField::Species,
            Self::UnsupportedTarget { .. } => IncompatibleField::Target,
            Self::UnitMismatch { .. } => IncompatibleField::Unit,
            Self::PerAtomUnsupported { .. } => IncompatibleField::PerAtom,
            Self::UnsupportedDevice { .. } => IncompatibleField::Device,
        }
    }
}

/// Check that `capabilities` cover everything `dataset` requires.
pub fn check_compatibility(
    capabilities: &ModelCapabilities,
    dataset: &DatasetInfo,
) -> Result<(), IncompatibilityError> {
    let missing: Vec<i32> = dataset
        .atomic_types
        .difference(&capabilities.atomic_types)
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(IncompatibilityError::UnsupportedSpecies {
            missing,
            supported: capabilities.atomic_types.iter().copied().collect(),
        });
    }

    for (name, target) in &dataset.targets {
        let Some(output) = capabilities.outputs.get(name) else {
            return Err(IncompatibilityError::UnsupportedTarget {
                target: name.clone(),
                available: capabilities.outputs.keys().cloned().collect(),
            });
        };
        if output.unit != target.unit {
            return Err(IncompatibilityError::UnitMismatch {
                target: name.clone(),
                model: output.unit.clone(),
                dataset: target.unit.clone(),
            });
        }
        if target.per_atom && !output.per_atom {
            return Err(IncompatibilityError::PerAtomUnsupported {
                target: name.clone(),
            });
        }
    }

    if capabilities.length_unit != dataset.length_unit {
        return Err(IncompatibilityError::LengthUnitMismatch {
            model: capabilities.length_unit.clone(),
            dataset: dataset.length_unit.clone(),
        });
    }

    Ok(())
}

/// Check that every requested device kind is supported.
///
/// A device string may carry an index (`"cuda:1"`); only the kind before the
/// colon is compared.
pub fn check_devices<S: AsRef<str>>(
    capabilities: &ModelCapabilities,
    requested: &[S],
) -> Result<(), IncompatibilityError> {
    for device in requested {
        let device = device.as_ref();
        let kind = device.split(':').next().unwrap_or(device);
        if !capabilities.supported_devices.iter().any(|d| d == kind) {
            return Err(IncompatibilityError::UnsupportedDevice {
                device: device.to_string(),
                supported: capabilities.supported_devices.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ModelOutput;
    use crate::target::TargetInfo;
    use std::collections::BTreeMap;

    fn capabilities() -> ModelCapabilities {
        ModelCapabilities::new(
            "Angstrom",
            [1, 6, 7, 8],
            BTreeMap::from([("energy".to_string(), ModelOutput::new("energy", "eV"))]),
        )
    }

    fn dataset(types: &[i32]) -> DatasetInfo {
        DatasetInfo::new(
            "Angstrom",
            types.iter().copied(),
            BTreeMap::from([("energy".to_string(), TargetInfo::new("energy", "eV"))]),
        )
    }

    #[test]
    fn test_compatible() {
        assert!(check_compatibility(&capabilities(), &dataset(&[1, 8])).is_ok());
    }

    #[test]
    fn test_species_subset_is_fine_superset_is_not() {
        let err = check_compatibility(&capabilities(), &dataset(&[1, 16])).unwrap_err();
        assert_eq!(err.field(), IncompatibleField::Species);
        assert_eq!(
            err,
            IncompatibilityError::UnsupportedSpecies {
                missing: vec![16],
                supported: vec![1, 6, 7, 8],
            }
        );
    }

    #[test]
    fn test_per_atom_requires_per_atom_output() {
        let mut info = dataset(&[1]);
        info.targets
            .insert("energy".to_string(), TargetInfo::new("energy", "eV").with_per_atom(true));
        let err = check_compatibility(&capabilities(), &info).unwrap_err();
        assert_eq!(err.field(), IncompatibleField::PerAtom);
    }

    #[test]
    fn test_species_checked_before_length_unit() {
        let mut info = dataset(&[16]);
        info.length_unit = "Bohr".to_string();
        let err = check_compatibility(&capabilities(), &info).unwrap_err();
        assert_eq!(err.field(), IncompatibleField::Species);

        let mut info = dataset(&[1]);
        info.length_unit = "Bohr".to_string();
        let err = check_compatibility(&capabilities(), &info).unwrap_err();
        assert_eq!(err.field(), IncompatibleField::LengthUnit);
    }

    #[test]
    fn test_devices() {
        let caps = capabilities().with_supported_devices(vec!["cpu", "cuda"]);
        assert!(check_devices(&caps, &["cpu", "cuda:1"]).is_ok());
        let err = check_devices(&caps, &["mps"]).unwrap_err();
        assert_eq!(err.field(), IncompatibleField::Device);
    }
}
