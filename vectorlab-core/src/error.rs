//! Simulation errors.
//!
//! Order rejections are normally data, not errors — they land in the result
//! stream as `Rejected` records and the simulation continues. An error from
//! this module means the simulation itself cannot proceed: malformed input,
//! exhausted record capacity, or a rejection promoted to fatal by
//! `raise_reject`.

use crate::domain::order::StatusInfo;
use thiserror::Error;

/// Errors that abort a simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("input `{name}` does not fit a {expected_rows}x{expected_cols} grid (got {actual})")]
    ShapeMismatch {
        name: &'static str,
        expected_rows: usize,
        expected_cols: usize,
        actual: String,
    },

    #[error("order field `{field}` has invalid value {value} at row {row}, col {col}")]
    InvalidOrderField {
        field: &'static str,
        value: f64,
        row: usize,
        col: usize,
    },

    #[error("group lengths {group_total} do not cover {n_cols} columns")]
    GroupMismatch { group_total: usize, n_cols: usize },

    #[error("group {group} has zero length")]
    EmptyGroup { group: usize },

    #[error("group indices must be coherent and sorted (such as [0, 0, 1, 2, 2]); found {found} after {prev} at position {pos}")]
    IncoherentGroups { prev: usize, found: usize, pos: usize },

    #[error("call sequence entry {value} at row {row}, col {col} is not a valid in-group offset (group length {group_len})")]
    InvalidCallSeq {
        value: usize,
        row: usize,
        col: usize,
        group_len: usize,
    },

    #[error("{kind} record capacity ({capacity}) exceeded at column {col}")]
    RecordOverflow {
        kind: &'static str,
        col: usize,
        capacity: usize,
    },

    #[error("automatic call sequencing is not supported by the callback driver; provide an explicit sequence")]
    AutoCallSeqUnsupported,

    #[error("callback targeted column {col}, which is outside group {group}")]
    ColumnOutOfGroup { col: usize, group: usize },

    #[error("order rejected at row {row}, col {col}: {info:?}")]
    HardReject {
        row: usize,
        col: usize,
        info: StatusInfo,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = SimulationError::RecordOverflow {
            kind: "order",
            col: 3,
            capacity: 1,
        };
        assert_eq!(
            err.to_string(),
            "order record capacity (1) exceeded at column 3"
        );

        let err = SimulationError::ShapeMismatch {
            name: "size",
            expected_rows: 5,
            expected_cols: 2,
            actual: "per-row of length 4".into(),
        };
        assert!(err.to_string().contains("`size`"));
        assert!(err.to_string().contains("5x2"));
    }
}
