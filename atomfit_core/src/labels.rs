//! Named integer index metadata for labeled blocks.
//!
//! A [`Labels`] value is a small table: an ordered list of column names and a
//! set of unique integer rows. Blocks use one `Labels` for their samples, one
//! per component axis, and one for their properties.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Ordered column names plus unique integer rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Labels {
    names: Vec<String>,
    /// Row-major storage, `names.len()` values per row.
    values: Vec<i32>,
}

impl Labels {
    /// Build labels from column names and rows.
    ///
    /// Fails if a row has the wrong length, if a column name repeats, or if
    /// two rows are identical.
    pub fn new<S: Into<String>>(names: Vec<S>, rows: Vec<Vec<i32>>) -> Result<Self> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();

        let mut seen_names = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen_names.insert(name.as_str()) {
                return Err(CoreError::DuplicateColumn(name.clone()));
            }
        }

        let mut values = Vec::with_capacity(rows.len() * names.len());
        for (i, row) in rows.iter().enumerate() {
            if row.len() != names.len() {
                return Err(CoreError::RowLength {
                    row: i,
                    expected: names.len(),
                    got: row.len(),
                });
            }
            values.extend_from_slice(row);
        }

        let labels = Self { names, values };
        labels.check_unique()?;
        Ok(labels)
    }

    /// Labels with a single column holding `0..count`.
    pub fn range(name: &str, count: usize) -> Self {
        Self {
            names: vec![name.to_string()],
            values: (0..count as i32).collect(),
        }
    }

    /// The conventional single-entry labels `_ = [[0]]`.
    pub fn single() -> Self {
        Self {
            names: vec!["_".to_string()],
            values: vec![0],
        }
    }

    /// Labels with the given columns and no rows.
    pub fn empty<S: Into<String>>(names: Vec<S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            values: Vec::new(),
        }
    }

    fn check_unique(&self) -> Result<()> {
        if self.names.is_empty() {
            return Ok(());
        }
        let mut seen = HashSet::with_capacity(self.len());
        for row in self.rows() {
            if !seen.insert(row) {
                return Err(CoreError::DuplicateRow {
                    names: self.names.clone(),
                    values: row.to_vec(),
                });
            }
        }
        Ok(())
    }

    /// Column names in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.names.len()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        if self.names.is_empty() {
            0
        } else {
            self.values.len() / self.names.len()
        }
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The values of row `index`, or `None` past the last row.
    pub fn row(&self, index: usize) -> Option<&[i32]> {
        if index >= self.len() {
            return None;
        }
        let n = self.names.len();
        Some(&self.values[index * n..(index + 1) * n])
    }

    /// Iterate over rows.
    pub fn rows(&self) -> impl Iterator<Item = &[i32]> + '_ {
        // chunks_exact panics on a zero chunk size
        self.values.chunks_exact(self.names.len().max(1))
    }

    /// Index of the column called `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// All values of the column called `name`.
    pub fn column(&self, name: &str) -> Result<Vec<i32>> {
        let col = self
            .column_index(name)
            .ok_or_else(|| CoreError::MissingColumn(name.to_string()))?;
        Ok(self.rows().map(|row| row[col]).collect())
    }

    /// Position of `row` in these labels, if present.
    pub fn position(&self, row: &[i32]) -> Option<usize> {
        self.rows().position(|r| r == row)
    }

    /// Map from row values to row position, for repeated lookups.
    pub fn index_map(&self) -> HashMap<Vec<i32>, usize> {
        self.rows()
            .enumerate()
            .map(|(i, row)| (row.to_vec(), i))
            .collect()
    }

    /// Build new labels by rewriting every row through `f`.
    ///
    /// The result is validated again, so a rewrite that creates duplicates
    /// fails.
    pub fn map_rows<F>(&self, mut f: F) -> Result<Self>
    where
        F: FnMut(usize, &[i32]) -> Vec<i32>,
    {
        let rows = self.rows().enumerate().map(|(i, r)| f(i, r)).collect();
        Self::new(self.names.clone(), rows)
    }

    /// Keep the rows at `indices`, in that order.
    ///
    /// Fails with [`CoreError::RowOutOfRange`] on an index past the last row.
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        let rows = indices
            .iter()
            .map(|&index| {
                self.row(index)
                    .map(<[i32]>::to_vec)
                    .ok_or(CoreError::RowOutOfRange {
                        index,
                        len: self.len(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(self.names.clone(), rows)
    }

    /// Concatenate labels that share the same columns.
    pub fn concat(parts: &[&Labels]) -> Result<Self> {
        let Some(first) = parts.first() else {
            return Ok(Self::empty(Vec::<String>::new()));
        };
        let mut rows = Vec::new();
        for part in parts {
            if part.names != first.names {
                let missing = first
                    .names
                    .iter()
                    .find(|n| !part.names.contains(n))
                    .or_else(|| part.names.iter().find(|n| !first.names.contains(n)))
                    .cloned()
                    .unwrap_or_default();
                return Err(CoreError::MissingColumn(missing));
            }
            rows.extend(part.rows().map(<[i32]>::to_vec));
        }
        Self::new(first.names.clone(), rows)
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Labels({}; {} rows)", self.names.join(", "), self.len())
    }
}
