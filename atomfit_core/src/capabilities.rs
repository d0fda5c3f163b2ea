//! What a model declares it can predict.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One output a model can produce.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelOutput {
    /// Physical quantity kind.
    pub quantity: String,
    /// Unit of the output.
    pub unit: String,
    /// Whether the output is (or can be) produced per atom.
    #[serde(default)]
    pub per_atom: bool,
}

impl ModelOutput {
    /// A per-structure output.
    pub fn new(quantity: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            quantity: quantity.into(),
            unit: unit.into(),
            per_atom: false,
        }
    }

    /// Set the per-atom flag.
    pub fn with_per_atom(mut self, per_atom: bool) -> Self {
        self.per_atom = per_atom;
        self
    }
}

/// Capabilities declared by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Length unit the model expects for positions.
    pub length_unit: String,
    /// Atomic species the model can handle.
    pub atomic_types: BTreeSet<i32>,
    /// Outputs the model can produce, keyed by target name.
    pub outputs: BTreeMap<String, ModelOutput>,
    /// Device kinds the model runs on ("cpu", "cuda", ...).
    #[serde(default)]
    pub supported_devices: Vec<String>,
    /// Interaction cutoff in `length_unit`.
    #[serde(default)]
    pub interaction_range: f64,
    /// Floating point type of the parameters.
    #[serde(default = "default_dtype")]
    pub dtype: String,
}

fn default_dtype() -> String {
    "float32".to_string()
}

impl ModelCapabilities {
    /// Capabilities with the given unit, species and outputs, running on CPU.
    pub fn new(
        length_unit: impl Into<String>,
        atomic_types: impl IntoIterator<Item = i32>,
        outputs: BTreeMap<String, ModelOutput>,
    ) -> Self {
        Self {
            length_unit: length_unit.into(),
            atomic_types: atomic_types.into_iter().collect(),
            outputs,
            supported_devices: vec!["cpu".to_string()],
            interaction_range: 0.0,
            dtype: default_dtype(),
        }
    }

    /// Replace the supported device list.
    pub fn with_supported_devices<S: Into<String>>(mut self, devices: Vec<S>) -> Self {
        self.supported_devices = devices.into_iter().map(Into::into).collect();
        self
    }

    /// Set the interaction range.
    pub fn with_interaction_range(mut self, range: f64) -> Self {
        self.interaction_range = range;
        self
    }
}
