//! Target and dataset descriptors.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::system::System;

/// Gradient name used for derivatives with respect to atomic positions.
pub const POSITIONS_GRADIENT: &str = "positions";

/// Gradient name used for derivatives with respect to cell strain.
pub const STRAIN_GRADIENT: &str = "strain";

/// Describes one prediction target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    /// Physical quantity kind, e.g. "energy".
    pub quantity: String,
    /// Unit string. Only compared, never converted.
    pub unit: String,
    /// Whether the target is defined per atom rather than per structure.
    #[serde(default)]
    pub per_atom: bool,
    /// Gradient channels carried by the target.
    #[serde(default)]
    pub gradients: BTreeSet<String>,
}

impl TargetInfo {
    /// A per-structure target without gradients.
    pub fn new(quantity: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            quantity: quantity.into(),
            unit: unit.into(),
            per_atom: false,
            gradients: BTreeSet::new(),
        }
    }

    /// Mark the target as per-atom.
    pub fn with_per_atom(mut self, per_atom: bool) -> Self {
        self.per_atom = per_atom;
        self
    }

    /// Add a gradient channel.
    pub fn with_gradient(mut self, gradient: impl Into<String>) -> Self {
        self.gradients.insert(gradient.into());
        self
    }
}

/// Describes what a dataset contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    /// Unit of all lengths in the dataset.
    pub length_unit: String,
    /// Atomic species present in the dataset.
    pub atomic_types: BTreeSet<i32>,
    /// Target descriptors, keyed by target name.
    pub targets: BTreeMap<String, TargetInfo>,
}

impl DatasetInfo {
    /// Create a dataset descriptor.
    pub fn new(
        length_unit: impl Into<String>,
        atomic_types: impl IntoIterator<Item = i32>,
        targets: BTreeMap<String, TargetInfo>,
    ) -> Self {
        Self {
            length_unit: length_unit.into(),
            atomic_types: atomic_types.into_iter().collect(),
            targets,
        }
    }

    /// Create a descriptor whose species set is the union over `systems`.
    pub fn from_systems<'a>(
        length_unit: impl Into<String>,
        systems: impl IntoIterator<Item = &'a System>,
        targets: BTreeMap<String, TargetInfo>,
    ) -> Self {
        let atomic_types = systems
            .into_iter()
            .flat_map(|s| s.types().iter().copied())
            .collect();
        Self {
            length_unit: length_unit.into(),
            atomic_types,
            targets,
        }
    }

    /// Whether `name` is a registered target.
    pub fn has_target(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    /// Merge descriptors of several datasets.
    ///
    /// Length units must agree and a target registered by more than one
    /// dataset must be described identically.
    pub fn union<'a>(infos: impl IntoIterator<Item = &'a DatasetInfo>) -> Result<Option<Self>> {
        let mut merged: Option<Self> = None;
        for info in infos {
            match merged.as_mut() {
                None => merged = Some(info.clone()),
                Some(acc) => {
                    if acc.length_unit != info.length_unit {
                        return Err(CoreError::LengthUnitConflict {
                            first: acc.length_unit.clone(),
                            second: info.length_unit.clone(),
                        });
                    }
                    acc.atomic_types.extend(info.atomic_types.iter().copied());
                    for (name, target) in &info.targets {
                        match acc.targets.get(name) {
                            Some(existing) if existing != target => {
                                return Err(CoreError::TargetConflict(name.clone()));
                            }
                            Some(_) => {}
                            None => {
                                acc.targets.insert(name.clone(), target.clone());
                            }
                        }
                    }
                }
            }
        }
        Ok(merged)
    }
}
