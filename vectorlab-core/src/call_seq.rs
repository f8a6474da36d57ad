//! Call sequences — the order in which a group's columns execute on a bar.
//!
//! `call_seq[row][col]` holds an in-group offset; reading a segment's
//! entries left to right gives the execution order. The table is either
//! fixed up front (`Default`, `Reversed`, `Random`, or user-provided) or
//! re-sorted per segment by approximate order value so that cash-releasing
//! sells run before cash-consuming buys (`Auto`).

use crate::error::SimulationError;
use crate::grouping::Grouper;
use crate::rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// How the call sequence table is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallSeqMode {
    /// Columns execute in index order.
    Default,
    /// Columns execute in reverse index order.
    Reversed,
    /// Each segment gets a seeded shuffle.
    Random,
    /// Each segment is sorted by order value before execution.
    Auto,
}

/// A materialized `T×N` call sequence table.
///
/// Stored row-major like every other grid; entries are offsets within the
/// owning group, not absolute column indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSeq {
    n_cols: usize,
    data: Vec<usize>,
}

impl CallSeq {
    /// Build a table for `n_rows` bars per `mode`.
    ///
    /// `Auto` starts from the default order; segments re-sort it as the
    /// simulation runs. `group_offset` shifts the shuffle streams when
    /// this table covers a chunk of a wider grid, so a chunked run
    /// shuffles exactly like the unchunked one.
    pub fn build(
        mode: CallSeqMode,
        n_rows: usize,
        grouper: &Grouper,
        seed: u64,
        group_offset: usize,
    ) -> Self {
        let n_cols = grouper.n_cols();
        let mut data = vec![0usize; n_rows * n_cols];
        for row in 0..n_rows {
            for group in 0..grouper.n_groups() {
                let start = grouper.group_start(group);
                let len = grouper.group_len(group);
                let segment = &mut data[row * n_cols + start..row * n_cols + start + len];
                match mode {
                    CallSeqMode::Default | CallSeqMode::Auto => {
                        for (k, slot) in segment.iter_mut().enumerate() {
                            *slot = k;
                        }
                    }
                    CallSeqMode::Reversed => {
                        for (k, slot) in segment.iter_mut().enumerate() {
                            *slot = len - 1 - k;
                        }
                    }
                    CallSeqMode::Random => {
                        for (k, slot) in segment.iter_mut().enumerate() {
                            *slot = k;
                        }
                        let stream =
                            ((row as u64) << 32) | (group_offset + group) as u64;
                        segment.shuffle(&mut rng::rng_for(seed, "call_seq", stream));
                    }
                }
            }
        }
        Self { n_cols, data }
    }

    /// Adopt a user-provided table, validating every segment is a
    /// permutation of its group's offsets.
    pub fn from_table(
        data: Vec<usize>,
        n_rows: usize,
        grouper: &Grouper,
    ) -> Result<Self, SimulationError> {
        let n_cols = grouper.n_cols();
        if data.len() != n_rows * n_cols {
            return Err(SimulationError::ShapeMismatch {
                name: "call_seq",
                expected_rows: n_rows,
                expected_cols: n_cols,
                actual: format!("flat length {}", data.len()),
            });
        }
        let mut seen = Vec::new();
        for row in 0..n_rows {
            for group in 0..grouper.n_groups() {
                let start = grouper.group_start(group);
                let len = grouper.group_len(group);
                seen.clear();
                seen.resize(len, false);
                for k in 0..len {
                    let value = data[row * n_cols + start + k];
                    if value >= len || seen[value] {
                        return Err(SimulationError::InvalidCallSeq {
                            value,
                            row,
                            col: start + k,
                            group_len: len,
                        });
                    }
                    seen[value] = true;
                }
            }
        }
        Ok(Self { n_cols, data })
    }

    /// The segment for `(row, group)`, read-only.
    pub fn segment(&self, row: usize, grouper: &Grouper, group: usize) -> &[usize] {
        let start = row * self.n_cols + grouper.group_start(group);
        &self.data[start..start + grouper.group_len(group)]
    }

    /// The segment for `(row, group)`, for in-place re-sorting.
    pub fn segment_mut(&mut self, row: usize, grouper: &Grouper, group: usize) -> &mut [usize] {
        let start = row * self.n_cols + grouper.group_start(group);
        &mut self.data[start..start + grouper.group_len(group)]
    }

    /// Flatten into the row-major table handed back to the caller.
    pub fn into_vec(self) -> Vec<usize> {
        self.data
    }
}

/// Stable in-place insertion argsort of `seq` by the given keys.
///
/// `keys[i]` belongs to the element currently at `seq[i]`; both slices are
/// permuted together. Insertion sort keeps already-sorted segments
/// untouched, which makes an auto-sorted segment idempotent.
pub fn sort_by_order_value(seq: &mut [usize], keys: &mut [f64]) {
    debug_assert_eq!(seq.len(), keys.len());
    for i in 1..seq.len() {
        let key = keys[i];
        let entry = seq[i];
        let mut j = i;
        while j > 0 && keys[j - 1] > key {
            keys[j] = keys[j - 1];
            seq[j] = seq[j - 1];
            j -= 1;
        }
        keys[j] = key;
        seq[j] = entry;
    }
}
