//! Error types for atomfit_core operations.

use thiserror::Error;

/// Errors raised while building labels, descriptors and weight tables.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A labels row does not have one value per column.
    #[error("labels row {row} has {got} values but there are {expected} columns")]
    RowLength {
        /// Index of the offending row.
        row: usize,
        /// Number of columns.
        expected: usize,
        /// Number of values found in the row.
        got: usize,
    },

    /// Two rows of the same labels hold the same values.
    #[error("duplicate labels row {values:?} for columns {names:?}")]
    DuplicateRow {
        /// Column names.
        names: Vec<String>,
        /// The repeated row.
        values: Vec<i32>,
    },

    /// The same column name appears twice.
    #[error("duplicate labels column '{0}'")]
    DuplicateColumn(String),

    /// A column was requested that the labels do not have.
    #[error("labels have no column named '{0}'")]
    MissingColumn(String),

    /// A row index is past the end of the labels.
    #[error("labels row {index} is out of range for {len} rows")]
    RowOutOfRange {
        /// Requested row.
        index: usize,
        /// Number of rows.
        len: usize,
    },

    /// An atomic species identifier is not a small positive integer.
    #[error("invalid atomic species {0}: species must be positive")]
    InvalidSpecies(i32),

    /// A system's per-atom arrays disagree in length.
    #[error("system has {types} atomic types but {positions} positions")]
    SystemSizeMismatch {
        /// Number of species entries.
        types: usize,
        /// Number of position entries.
        positions: usize,
    },

    /// Two descriptors disagree on the length unit.
    #[error("length unit mismatch: '{first}' vs '{second}'")]
    LengthUnitConflict {
        /// Unit of the first descriptor.
        first: String,
        /// Unit of the second descriptor.
        second: String,
    },

    /// Two descriptors define the same target differently.
    #[error("target '{0}' is described differently by two datasets")]
    TargetConflict(String),

    /// A weight is negative or not finite.
    #[error("invalid loss weight {weight} for '{key}': weights must be finite and non-negative")]
    InvalidWeight {
        /// Weight table key.
        key: String,
        /// The rejected weight.
        weight: f64,
    },
}

/// Result type for atomfit_core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::RowLength {
            row: 2,
            expected: 2,
            got: 3,
        };
        assert_eq!(
            err.to_string(),
            "labels row 2 has 3 values but there are 2 columns"
        );

        let err = CoreError::InvalidWeight {
            key: "energy".to_string(),
            weight: -1.0,
        };
        assert_eq!(
            err.to_string(),
            "invalid loss weight -1 for 'energy': weights must be finite and non-negative"
        );
    }
}
