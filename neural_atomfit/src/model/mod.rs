//! Model interface and architectures.
//!
//! Every architecture implements [`AtomisticModel`]: it declares its
//! [`ModelCapabilities`] and maps a batch of structures to one labeled block
//! per requested output. Architectures are selected by name through the
//! closed [`Architecture`] enum.

mod composition;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use atomfit_core::{ModelCapabilities, ModelOutput, System};

use crate::block::TensorBlock;
use crate::error::{NeuralAtomfitError, Result};

pub use composition::{CompositionModel, CompositionModelConfig};

/// A trainable model of atomistic properties.
pub trait AtomisticModel<B: Backend>: Module<B> {
    /// What the model can predict.
    fn capabilities(&self) -> &ModelCapabilities;

    /// Predict `outputs` for `systems`.
    ///
    /// Per-structure outputs have samples `(system)`, per-atom outputs
    /// `(system, atom)`, where `system` is the position in `systems`.
    fn forward(
        &self,
        systems: &[System],
        outputs: &BTreeMap<String, ModelOutput>,
    ) -> Result<BTreeMap<String, TensorBlock<B>>>;
}

/// Known architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    /// Per-species linear baseline, see [`CompositionModel`].
    Composition,
}

impl Architecture {
    /// Every architecture, in declaration order.
    pub const ALL: &'static [Architecture] = &[Architecture::Composition];

    /// Name used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            Architecture::Composition => "composition",
        }
    }

    /// Initialize a model of this architecture for `capabilities`.
    pub fn init<B: Backend>(
        self,
        capabilities: ModelCapabilities,
        device: &B::Device,
    ) -> CompositionModel<B> {
        match self {
            Architecture::Composition => CompositionModelConfig::new(capabilities).init(device),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Architecture {
    type Err = NeuralAtomfitError;

    fn from_str(name: &str) -> Result<Self> {
        check_architecture_name(name)
    }
}

/// Resolve an architecture name.
///
/// Unknown names fail with a configuration error listing the known ones,
/// with a suggestion when the name only differs by case or surrounding
/// whitespace.
pub fn check_architecture_name(name: &str) -> Result<Architecture> {
    if let Some(&arch) = Architecture::ALL.iter().find(|a| a.name() == name) {
        return Ok(arch);
    }

    let known: Vec<&str> = Architecture::ALL.iter().map(|a| a.name()).collect();
    let normalized = name.trim().to_lowercase();
    let hint = Architecture::ALL
        .iter()
        .find(|a| a.name() == normalized)
        .map(|a| format!(" Did you mean '{a}'?"))
        .unwrap_or_default();

    Err(NeuralAtomfitError::config(format!(
        "architecture '{name}' is not known, available architectures are {known:?}.{hint}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    use crate::error::ErrorKind;

    #[test]
    fn test_check_architecture_name() {
        assert_eq!(check_architecture_name("composition").unwrap(), Architecture::Composition);
        assert_eq!("composition".parse::<Architecture>().unwrap(), Architecture::Composition);

        let err = check_architecture_name(" Composition").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("Did you mean 'composition'?"));

        let err = check_architecture_name("soap_bpnn").unwrap_err();
        assert!(!err.to_string().contains("Did you mean"));
    }

    #[test]
    fn test_init_from_name() {
        let capabilities = ModelCapabilities::new(
            "Angstrom",
            [1, 6, 8],
            BTreeMap::from([("energy".to_string(), ModelOutput::new("energy", "eV"))]),
        );
        let model = check_architecture_name("composition")
            .unwrap()
            .init::<NdArray>(capabilities.clone(), &Default::default());

        assert_eq!(model.weights().dims(), [3, 1]);
        assert_eq!(model.capabilities(), &capabilities);
    }
}
