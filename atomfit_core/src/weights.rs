//! Per-target and per-gradient loss weights.
//!
//! Keys are either a bare target name (`"energy"`) or the gradient key
//! `"<target>_<gradient>_gradients"` (`"energy_positions_gradients"`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::target::DatasetInfo;

/// Mapping from weight key to a finite, non-negative weight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightTable {
    weights: BTreeMap<String, f64>,
}

impl WeightTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a map, validating every weight.
    pub fn from_map(weights: BTreeMap<String, f64>) -> Result<Self> {
        for (key, &weight) in &weights {
            check_weight(key, weight)?;
        }
        Ok(Self { weights })
    }

    /// Weight key for the gradient `gradient` of `target`.
    pub fn gradient_key(target: &str, gradient: &str) -> String {
        format!("{target}_{gradient}_gradients")
    }

    /// Insert or replace a weight.
    pub fn insert(&mut self, key: impl Into<String>, weight: f64) -> Result<()> {
        let key = key.into();
        check_weight(&key, weight)?;
        self.weights.insert(key, weight);
        Ok(())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, weight: f64) -> Result<Self> {
        self.insert(key, weight)?;
        Ok(self)
    }

    /// Weight of the primary values of `target`, if configured.
    pub fn primary(&self, target: &str) -> Option<f64> {
        self.weights.get(target).copied()
    }

    /// Weight of gradient `gradient` of `target`, 0 when absent.
    pub fn gradient(&self, target: &str, gradient: &str) -> f64 {
        self.weights
            .get(&Self::gradient_key(target, gradient))
            .copied()
            .unwrap_or(0.0)
    }

    /// Gradient weights for `target` restricted to `gradients`.
    ///
    /// Every requested gradient name appears in the result; unconfigured
    /// ones get weight 0.
    pub fn gradient_weights<'a>(
        &self,
        target: &str,
        gradients: impl IntoIterator<Item = &'a str>,
    ) -> BTreeMap<String, f64> {
        gradients
            .into_iter()
            .map(|g| (g.to_string(), self.gradient(target, g)))
            .collect()
    }

    /// Raw lookup by key.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.weights.get(key).copied()
    }

    /// Iterate over `(key, weight)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.weights.iter().map(|(k, &w)| (k.as_str(), w))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Validate every stored weight.
    ///
    /// Tables deserialized from configuration bypass [`WeightTable::insert`].
    pub fn validate(&self) -> Result<()> {
        for (key, &weight) in &self.weights {
            check_weight(key, weight)?;
        }
        Ok(())
    }

    /// Targets of `info` without a primary weight, in name order.
    ///
    /// Gradient weights are never required: an absent one means the
    /// gradient does not contribute to the loss.
    pub fn unweighted_targets<'a>(
        &'a self,
        info: &'a DatasetInfo,
    ) -> impl Iterator<Item = &'a str> + 'a {
        info.targets
            .keys()
            .filter(|name| self.primary(name).is_none())
            .map(String::as_str)
    }
}

fn check_weight(key: &str, weight: f64) -> Result<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(CoreError::InvalidWeight {
            key: key.to_string(),
            weight,
        });
    }
    Ok(())
}
