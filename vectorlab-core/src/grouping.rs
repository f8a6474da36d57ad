//! Column grouping.
//!
//! Columns partition into contiguous groups; cash sharing and call
//! sequencing are defined per group. Grouping is fixed for the lifetime of
//! a simulation — a partition of the column axis for parallel execution
//! must happen on group boundaries, never inside one.

use crate::error::SimulationError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Immutable column-to-group mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouper {
    group_lens: Vec<usize>,
    /// Start column of each group; one extra trailing entry equal to n_cols.
    group_starts: Vec<usize>,
}

impl Grouper {
    /// One group per column (no grouping).
    pub fn ungrouped(n_cols: usize) -> Self {
        // Unwrap is safe: lengths of 1 are trivially valid.
        Self::from_group_lens(vec![1; n_cols]).unwrap()
    }

    /// A single group spanning all columns.
    pub fn single_group(n_cols: usize) -> Self {
        Self::from_group_lens(vec![n_cols]).unwrap()
    }

    /// Build from per-group column counts.
    pub fn from_group_lens(group_lens: Vec<usize>) -> Result<Self, SimulationError> {
        if let Some(group) = group_lens.iter().position(|&len| len == 0) {
            return Err(SimulationError::EmptyGroup { group });
        }
        let mut group_starts = Vec::with_capacity(group_lens.len() + 1);
        let mut start = 0;
        for &len in &group_lens {
            group_starts.push(start);
            start += len;
        }
        group_starts.push(start);
        Ok(Self {
            group_lens,
            group_starts,
        })
    }

    /// Build from a per-column group index array such as `[0, 0, 1, 2, 2]`.
    ///
    /// Indices must be coherent and sorted: once a group ends it may not
    /// reappear.
    pub fn from_group_indices(groups: &[usize]) -> Result<Self, SimulationError> {
        let mut group_lens = Vec::new();
        let mut last_group: Option<usize> = None;
        let mut group_len = 0;
        for (pos, &g) in groups.iter().enumerate() {
            match last_group {
                Some(prev) if g < prev => {
                    return Err(SimulationError::IncoherentGroups {
                        prev,
                        found: g,
                        pos,
                    });
                }
                Some(prev) if g != prev => {
                    group_lens.push(group_len);
                    group_len = 0;
                    last_group = Some(g);
                }
                None => last_group = Some(g),
                _ => {}
            }
            group_len += 1;
        }
        if last_group.is_some() {
            group_lens.push(group_len);
        }
        Self::from_group_lens(group_lens)
    }

    /// Validate that this grouper covers exactly `n_cols` columns.
    pub fn check_cols(&self, n_cols: usize) -> Result<(), SimulationError> {
        if self.n_cols() != n_cols {
            return Err(SimulationError::GroupMismatch {
                group_total: self.n_cols(),
                n_cols,
            });
        }
        Ok(())
    }

    pub fn n_cols(&self) -> usize {
        *self.group_starts.last().unwrap_or(&0)
    }

    pub fn n_groups(&self) -> usize {
        self.group_lens.len()
    }

    pub fn group_len(&self, group: usize) -> usize {
        self.group_lens[group]
    }

    pub fn group_start(&self, group: usize) -> usize {
        self.group_starts[group]
    }

    /// Columns belonging to `group`.
    pub fn col_range(&self, group: usize) -> Range<usize> {
        self.group_starts[group]..self.group_starts[group + 1]
    }

    /// Group owning a column.
    pub fn group_of(&self, col: usize) -> usize {
        // group_starts is sorted; partition_point finds the first start > col.
        self.group_starts.partition_point(|&s| s <= col) - 1
    }

    /// A grouper covering only the given group span. Columns of the
    /// result are renumbered from zero.
    pub fn slice_groups(&self, groups: Range<usize>) -> Grouper {
        // Unwrap is safe: a subset of valid lengths is valid.
        Grouper::from_group_lens(self.group_lens[groups].to_vec()).unwrap()
    }

    /// Sum an `N`-column row-major grid down to `G` group columns.
    pub fn sum_by_group(&self, data: &[f64], n_rows: usize) -> Vec<f64> {
        let n_cols = self.n_cols();
        debug_assert_eq!(data.len(), n_rows * n_cols);
        let n_groups = self.n_groups();
        let mut out = vec![0.0; n_rows * n_groups];
        for row in 0..n_rows {
            for group in 0..n_groups {
                let mut sum = 0.0;
                for col in self.col_range(group) {
                    sum += data[row * n_cols + col];
                }
                out[row * n_groups + group] = sum;
            }
        }
        out
    }
}
