//! Atomic structures.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// One atomic structure: species, positions, cell and periodicity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct System {
    types: Vec<i32>,
    positions: Vec<[f32; 3]>,
    cell: [[f32; 3]; 3],
    pbc: [bool; 3],
}

impl System {
    /// Create a non-periodic system.
    pub fn new(types: Vec<i32>, positions: Vec<[f32; 3]>) -> Result<Self> {
        if types.len() != positions.len() {
            return Err(CoreError::SystemSizeMismatch {
                types: types.len(),
                positions: positions.len(),
            });
        }
        if let Some(&bad) = types.iter().find(|&&t| t <= 0) {
            return Err(CoreError::InvalidSpecies(bad));
        }
        Ok(Self {
            types,
            positions,
            cell: [[0.0; 3]; 3],
            pbc: [false; 3],
        })
    }

    /// Set a periodic cell (rows are the cell vectors).
    pub fn with_cell(mut self, cell: [[f32; 3]; 3], pbc: [bool; 3]) -> Self {
        self.cell = cell;
        self.pbc = pbc;
        self
    }

    /// Number of atoms.
    #[inline]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the system has no atoms.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Atomic species of every atom.
    pub fn types(&self) -> &[i32] {
        &self.types
    }

    /// Cartesian positions of every atom.
    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    /// Cell vectors.
    pub fn cell(&self) -> &[[f32; 3]; 3] {
        &self.cell
    }

    /// Periodic boundary flags.
    pub fn pbc(&self) -> [bool; 3] {
        self.pbc
    }

    /// The set of species present in this system.
    pub fn atomic_types(&self) -> BTreeSet<i32> {
        self.types.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_creation() {
        let system = System::new(vec![8, 1, 1], vec![[0.0; 3], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]])
            .unwrap();
        assert_eq!(system.len(), 3);
        assert_eq!(system.atomic_types(), BTreeSet::from([1, 8]));
        assert_eq!(system.pbc(), [false; 3]);
    }

    #[test]
    fn test_system_validation() {
        assert!(System::new(vec![1], vec![]).is_err());
        assert_eq!(
            System::new(vec![0], vec![[0.0; 3]]).unwrap_err(),
            CoreError::InvalidSpecies(0)
        );
    }
}
