//! Flexible arrays — inputs that broadcast along missing axes without
//! materialization.
//!
//! Nearly every simulation input (sizes, prices, fees, signals, stop levels)
//! can be given as a scalar, per-row, per-column, or as a full grid. Rather
//! than reshaping everything to `T×N` up front, a [`FlexArray`] keeps its
//! actual rank and `select(row, col)` resolves the element for a cell. The
//! match is on a four-variant tag, so the branch predictor settles on the
//! hot arm after a few ticks.

use crate::error::SimulationError;
use serde::{Deserialize, Serialize};

/// An array that is indexed as `T×N` but stored at its actual rank.
///
/// `Full` data is row-major: element `(row, col)` lives at
/// `row * n_cols + col`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlexArray<T: Copy> {
    /// One value for every cell.
    Scalar(T),
    /// One value per row, broadcast across columns. Length must be `T`.
    PerRow(Vec<T>),
    /// One value per column, broadcast across rows. Length must be `N`.
    PerCol(Vec<T>),
    /// A full `T×N` grid, row-major.
    Full { data: Vec<T>, n_cols: usize },
}

impl<T: Copy> FlexArray<T> {
    /// Build a full grid from row-major data.
    pub fn full(data: Vec<T>, n_cols: usize) -> Self {
        FlexArray::Full { data, n_cols }
    }

    /// Resolve the element for `(row, col)` using the array's actual rank.
    #[inline]
    pub fn select(&self, row: usize, col: usize) -> T {
        match self {
            FlexArray::Scalar(v) => *v,
            FlexArray::PerRow(rows) => rows[row],
            FlexArray::PerCol(cols) => cols[col],
            FlexArray::Full { data, n_cols } => data[row * n_cols + col],
        }
    }

    /// Check that this array is selectable over a `n_rows × n_cols` grid.
    ///
    /// `name` identifies the input in the error message.
    pub fn validate(
        &self,
        name: &'static str,
        n_rows: usize,
        n_cols: usize,
    ) -> Result<(), SimulationError> {
        let ok = match self {
            FlexArray::Scalar(_) => true,
            FlexArray::PerRow(rows) => rows.len() == n_rows,
            FlexArray::PerCol(cols) => cols.len() == n_cols,
            FlexArray::Full { data, n_cols: nc } => {
                *nc == n_cols && data.len() == n_rows * n_cols
            }
        };
        if ok {
            Ok(())
        } else {
            Err(SimulationError::ShapeMismatch {
                name,
                expected_rows: n_rows,
                expected_cols: n_cols,
                actual: self.shape_desc(),
            })
        }
    }

    /// Restrict the array to a contiguous column span. Scalars and
    /// per-row arrays pass through; per-column and full arrays are cut.
    /// The result is indexed with columns relative to `range.start`.
    pub fn slice_cols(&self, range: std::ops::Range<usize>) -> Self {
        match self {
            FlexArray::Scalar(v) => FlexArray::Scalar(*v),
            FlexArray::PerRow(rows) => FlexArray::PerRow(rows.clone()),
            FlexArray::PerCol(cols) => FlexArray::PerCol(cols[range].to_vec()),
            FlexArray::Full { data, n_cols } => {
                let width = range.end - range.start;
                let n_rows = if *n_cols == 0 { 0 } else { data.len() / n_cols };
                let mut out = Vec::with_capacity(n_rows * width);
                for row in 0..n_rows {
                    out.extend_from_slice(&data[row * n_cols + range.start..row * n_cols + range.end]);
                }
                FlexArray::Full {
                    data: out,
                    n_cols: width,
                }
            }
        }
    }

    fn shape_desc(&self) -> String {
        match self {
            FlexArray::Scalar(_) => "scalar".to_string(),
            FlexArray::PerRow(rows) => format!("per-row of length {}", rows.len()),
            FlexArray::PerCol(cols) => format!("per-col of length {}", cols.len()),
            FlexArray::Full { data, n_cols } => {
                format!("full {}x{}", data.len() / n_cols.max(&1), n_cols)
            }
        }
    }
}

impl<T: Copy> From<T> for FlexArray<T> {
    fn from(v: T) -> Self {
        FlexArray::Scalar(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_broadcasts_everywhere() {
        let arr = FlexArray::Scalar(0.01);
        assert_eq!(arr.select(0, 0), 0.01);
        assert_eq!(arr.select(99, 7), 0.01);
    }

    #[test]
    fn per_row_broadcasts_across_columns() {
        let arr = FlexArray::PerRow(vec![1.0, 2.0, 3.0]);
        assert_eq!(arr.select(1, 0), 2.0);
        assert_eq!(arr.select(1, 5), 2.0);
        assert_eq!(arr.select(2, 5), 3.0);
    }

    #[test]
    fn per_col_broadcasts_across_rows() {
        let arr = FlexArray::PerCol(vec![10.0, 20.0]);
        assert_eq!(arr.select(0, 1), 20.0);
        assert_eq!(arr.select(50, 1), 20.0);
    }

    #[test]
    fn full_is_row_major() {
        let arr = FlexArray::full(vec![1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(arr.select(0, 0), 1.0);
        assert_eq!(arr.select(0, 1), 2.0);
        assert_eq!(arr.select(1, 0), 3.0);
        assert_eq!(arr.select(1, 1), 4.0);
    }

    #[test]
    fn validate_rejects_wrong_lengths() {
        let arr = FlexArray::PerRow(vec![1.0, 2.0]);
        assert!(arr.validate("size", 3, 2).is_err());
        assert!(arr.validate("size", 2, 7).is_ok());

        let full = FlexArray::full(vec![0.0; 6], 2);
        assert!(full.validate("size", 3, 2).is_ok());
        assert!(full.validate("size", 3, 3).is_err());
    }

    #[test]
    fn slice_cols_keeps_relative_indexing() {
        let full = FlexArray::full(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3);
        let right = full.slice_cols(1..3);
        assert_eq!(right.select(0, 0), 2.0);
        assert_eq!(right.select(1, 1), 6.0);

        let per_col = FlexArray::PerCol(vec![10.0, 20.0, 30.0]);
        assert_eq!(per_col.slice_cols(1..3).select(5, 0), 20.0);

        let per_row = FlexArray::PerRow(vec![1.0, 2.0]);
        assert_eq!(per_row.slice_cols(1..2).select(1, 0), 2.0);
    }

    #[test]
    fn works_for_bool_and_enum_payloads() {
        let mask = FlexArray::PerCol(vec![true, false]);
        assert!(mask.select(10, 0));
        assert!(!mask.select(10, 1));
    }
}
