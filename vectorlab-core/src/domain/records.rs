//! Append-only order and log records.
//!
//! Records are the simulation's only durable output: every derived series
//! replays them instead of reading live engine state. Buffers are
//! preallocated per column (`capacity × n_cols`, column-major) and writers
//! use per-column append indices, so record ids are monotonic per column by
//! construction.

use crate::domain::order::{OrderSide, OrderStatus, StatusInfo};
use crate::error::SimulationError;
use serde::{Deserialize, Serialize};

/// One accepted fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Monotonic per column.
    pub id: u64,
    pub col: usize,
    pub row: usize,
    /// Executed size in units, always positive; `side` carries the sign.
    pub size: f64,
    pub price: f64,
    pub fees: f64,
    pub side: OrderSide,
}

impl Default for OrderRecord {
    fn default() -> Self {
        Self {
            id: 0,
            col: 0,
            row: 0,
            size: f64::NAN,
            price: f64::NAN,
            fees: f64::NAN,
            side: OrderSide::None,
        }
    }
}

impl OrderRecord {
    /// Executed size signed by side.
    pub fn signed_size(&self) -> f64 {
        match self.side {
            OrderSide::Buy => self.size,
            OrderSide::Sell => -self.size,
            OrderSide::None => 0.0,
        }
    }

    /// Cash delta of this fill: sells credit, buys debit, fees always debit.
    pub fn cash_delta(&self) -> f64 {
        -self.signed_size() * self.price - self.fees
    }
}

/// Full context of one order attempt: requested intent, state before and
/// after, and the outcome. Emitted only when the order's `log` flag is set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Monotonic per column.
    pub id: u64,
    pub group: usize,
    pub col: usize,
    pub row: usize,
    // Bar bounds at the time of the attempt.
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    // State before.
    pub cash_before: f64,
    pub position_before: f64,
    pub debt_before: f64,
    pub free_cash_before: f64,
    pub val_price_before: f64,
    pub value_before: f64,
    // Requested intent.
    pub req_size: f64,
    pub req_price: f64,
    pub req_fees: f64,
    pub req_fixed_fees: f64,
    pub req_slippage: f64,
    pub req_min_size: f64,
    pub req_max_size: f64,
    pub req_size_granularity: f64,
    pub req_reject_prob: f64,
    pub req_lock_cash: bool,
    pub req_allow_partial: bool,
    // State after.
    pub cash_after: f64,
    pub position_after: f64,
    pub debt_after: f64,
    pub free_cash_after: f64,
    pub val_price_after: f64,
    pub value_after: f64,
    // Outcome.
    pub res_size: f64,
    pub res_price: f64,
    pub res_fees: f64,
    pub res_side: OrderSide,
    pub res_status: OrderStatus,
    pub res_status_info: Option<StatusInfo>,
    /// Id of the order record this attempt produced, if it filled.
    pub order_id: Option<u64>,
}

impl Default for LogRecord {
    fn default() -> Self {
        Self {
            id: 0,
            group: 0,
            col: 0,
            row: 0,
            open: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            close: f64::NAN,
            cash_before: f64::NAN,
            position_before: f64::NAN,
            debt_before: f64::NAN,
            free_cash_before: f64::NAN,
            val_price_before: f64::NAN,
            value_before: f64::NAN,
            req_size: f64::NAN,
            req_price: f64::NAN,
            req_fees: f64::NAN,
            req_fixed_fees: f64::NAN,
            req_slippage: f64::NAN,
            req_min_size: f64::NAN,
            req_max_size: f64::NAN,
            req_size_granularity: f64::NAN,
            req_reject_prob: f64::NAN,
            req_lock_cash: false,
            req_allow_partial: false,
            cash_after: f64::NAN,
            position_after: f64::NAN,
            debt_after: f64::NAN,
            free_cash_after: f64::NAN,
            val_price_after: f64::NAN,
            value_after: f64::NAN,
            res_size: f64::NAN,
            res_price: f64::NAN,
            res_fees: f64::NAN,
            res_side: OrderSide::None,
            res_status: OrderStatus::Ignored,
            res_status_info: None,
            order_id: None,
        }
    }
}

/// Preallocated column-major append buffer.
///
/// `push` fails with a typed error once a column exhausts its capacity;
/// the simulation surfaces that to the caller instead of reallocating,
/// because capacity is part of the caller's resource contract.
#[derive(Debug, Clone)]
pub struct RecordBuffer<T: Copy> {
    kind: &'static str,
    capacity: usize,
    n_cols: usize,
    counts: Vec<usize>,
    data: Vec<T>,
}

impl<T: Copy> RecordBuffer<T> {
    /// `placeholder` fills unwritten slots; it is never observable through
    /// the read API.
    pub fn new(kind: &'static str, capacity: usize, n_cols: usize, placeholder: T) -> Self {
        Self {
            kind,
            capacity,
            n_cols,
            counts: vec![0; n_cols],
            data: vec![placeholder; capacity * n_cols],
        }
    }

    /// Number of records appended for `col` so far; doubles as the next id.
    pub fn count(&self, col: usize) -> usize {
        self.counts[col]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Append a record to `col`.
    pub fn push(&mut self, col: usize, record: T) -> Result<(), SimulationError> {
        let n = self.counts[col];
        if n >= self.capacity {
            return Err(SimulationError::RecordOverflow {
                kind: self.kind,
                col,
                capacity: self.capacity,
            });
        }
        self.data[col * self.capacity + n] = record;
        self.counts[col] += 1;
        Ok(())
    }

    /// Records appended for `col`, in execution order.
    pub fn col_slice(&self, col: usize) -> &[T] {
        let start = col * self.capacity;
        &self.data[start..start + self.counts[col]]
    }

    /// Flatten to a vector ordered by column, then by execution order.
    pub fn into_vec(self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.total());
        for col in 0..self.n_cols {
            out.extend_from_slice(&self.data[col * self.capacity..][..self.counts[col]]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: u64, col: usize, row: usize) -> OrderRecord {
        OrderRecord {
            id,
            col,
            row,
            size: 1.0,
            price: 10.0,
            fees: 0.0,
            side: OrderSide::Buy,
        }
    }

    fn placeholder() -> OrderRecord {
        rec(0, 0, 0)
    }

    #[test]
    fn ids_are_monotonic_per_column() {
        let mut buf = RecordBuffer::new("order", 4, 2, placeholder());
        for row in 0..3 {
            let id = buf.count(0) as u64;
            buf.push(0, rec(id, 0, row)).unwrap();
        }
        let ids: Vec<u64> = buf.col_slice(0).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(buf.count(1), 0);
    }

    #[test]
    fn overflow_names_the_column() {
        let mut buf = RecordBuffer::new("order", 1, 3, placeholder());
        buf.push(2, rec(0, 2, 0)).unwrap();
        let err = buf.push(2, rec(1, 2, 1)).unwrap_err();
        assert!(err.to_string().contains("column 2"));
        // Other columns still have room.
        assert!(buf.push(0, rec(0, 0, 0)).is_ok());
    }

    #[test]
    fn into_vec_orders_by_column_then_execution() {
        let mut buf = RecordBuffer::new("order", 4, 2, placeholder());
        buf.push(1, rec(0, 1, 0)).unwrap();
        buf.push(0, rec(0, 0, 1)).unwrap();
        buf.push(1, rec(1, 1, 2)).unwrap();
        let flat = buf.into_vec();
        let keys: Vec<(usize, u64)> = flat.iter().map(|r| (r.col, r.id)).collect();
        assert_eq!(keys, vec![(0, 0), (1, 0), (1, 1)]);
    }

    #[test]
    fn cash_delta_signs() {
        let buy = rec(0, 0, 0);
        assert_eq!(buy.cash_delta(), -10.0);
        let sell = OrderRecord {
            side: OrderSide::Sell,
            fees: 0.5,
            ..buy
        };
        assert_eq!(sell.cash_delta(), 10.0 - 0.5);
    }
}
