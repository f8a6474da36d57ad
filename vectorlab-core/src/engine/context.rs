//! Contexts and the hooks trait for the callback driver.
//!
//! A callback object implements [`SimulationHooks`]; every method has a
//! no-op default, so a strategy implements only what it needs. The driver
//! is generic over the implementation, so the hot loop monomorphizes and
//! unused hooks compile away.

use crate::domain::order::{Order, OrderResult, PriceArea};
use crate::domain::records::OrderRecord;
use crate::domain::state::ExecState;
use std::ops::Range;

/// Read view of a (row, group) segment before and after its calls run.
#[derive(Debug)]
pub struct SegmentContext<'a> {
    pub row: usize,
    pub group: usize,
    /// Absolute column indices of this group.
    pub cols: Range<usize>,
    /// Wallet cash (shared cash under cash sharing).
    pub cash: f64,
    pub free_cash: f64,
    /// Wallet value at the last valuation.
    pub value: f64,
    /// Return over the group's last completed bar.
    pub last_return: f64,
    /// Per-column arrays spanning all columns; index with absolute indices.
    pub position: &'a [f64],
    pub debt: &'a [f64],
    pub val_price: &'a [f64],
}

/// Read view for a single order call.
#[derive(Debug)]
pub struct OrderContext<'a> {
    pub row: usize,
    pub col: usize,
    pub group: usize,
    /// Position of this call within the segment's call sequence.
    pub call_index: usize,
    /// The column's execution state as the order function sees it.
    pub state: ExecState,
    pub price_area: PriceArea,
    /// This column's order records so far, in execution order.
    pub records: &'a [OrderRecord],
    pub last_return: f64,
}

/// User hooks for the callback driver. All methods default to no-ops
/// except order production, which defaults to "no order".
#[allow(unused_variables)]
pub trait SimulationHooks {
    fn pre_simulation(&mut self) {}
    fn post_simulation(&mut self) {}

    fn pre_group(&mut self, group: usize) {}
    fn post_group(&mut self, group: usize) {}

    fn pre_row(&mut self, row: usize) {}
    fn post_row(&mut self, row: usize) {}

    fn pre_segment(&mut self, ctx: &SegmentContext) {}
    fn post_segment(&mut self, ctx: &SegmentContext) {}

    /// Produce at most one order for this (row, column) call slot.
    fn order(&mut self, ctx: &OrderContext) -> Option<Order> {
        None
    }

    /// Flexible variant: called repeatedly within a segment until `None`;
    /// returns the target column (absolute index) and the order.
    fn flex_order(&mut self, ctx: &SegmentContext, call_index: usize) -> Option<(usize, Order)> {
        None
    }

    fn post_order(&mut self, ctx: &OrderContext, result: &OrderResult) {}
}
