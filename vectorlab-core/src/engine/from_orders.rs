//! From-orders driver: one pre-broadcast order per (row, column).
//!
//! The fastest path. Every order field is a flex array; a NaN size means
//! "no order in this cell". No signal state, full auto call-seq support.

use crate::call_seq::CallSeqMode;
use crate::domain::order::{Direction, Order, PriceAreaVioMode, SizeType};
use crate::engine::config::{CallSeqSpec, PriceGrid, SimOutput, SimParams};
use crate::engine::core::SimCore;
use crate::error::SimulationError;
use crate::flex::FlexArray;

/// Per-cell order fields, each broadcastable over the grid.
#[derive(Debug, Clone)]
pub struct OrdersInput {
    pub size: FlexArray<f64>,
    pub price: FlexArray<f64>,
    pub size_type: FlexArray<SizeType>,
    pub direction: FlexArray<Direction>,
    pub fees: FlexArray<f64>,
    pub fixed_fees: FlexArray<f64>,
    pub slippage: FlexArray<f64>,
    pub min_size: FlexArray<f64>,
    pub max_size: FlexArray<f64>,
    pub size_granularity: FlexArray<f64>,
    pub reject_prob: FlexArray<f64>,
    pub lock_cash: FlexArray<bool>,
    pub allow_partial: FlexArray<bool>,
    pub raise_reject: FlexArray<bool>,
    pub log: FlexArray<bool>,
    pub price_area_vio_mode: FlexArray<PriceAreaVioMode>,
}

impl Default for OrdersInput {
    fn default() -> Self {
        let defaults = Order::default();
        Self {
            size: FlexArray::Scalar(defaults.size),
            price: FlexArray::Scalar(defaults.price),
            size_type: FlexArray::Scalar(defaults.size_type),
            direction: FlexArray::Scalar(defaults.direction),
            fees: FlexArray::Scalar(defaults.fees),
            fixed_fees: FlexArray::Scalar(defaults.fixed_fees),
            slippage: FlexArray::Scalar(defaults.slippage),
            min_size: FlexArray::Scalar(defaults.min_size),
            max_size: FlexArray::Scalar(defaults.max_size),
            size_granularity: FlexArray::Scalar(defaults.size_granularity),
            reject_prob: FlexArray::Scalar(defaults.reject_prob),
            lock_cash: FlexArray::Scalar(defaults.lock_cash),
            allow_partial: FlexArray::Scalar(defaults.allow_partial),
            raise_reject: FlexArray::Scalar(defaults.raise_reject),
            log: FlexArray::Scalar(defaults.log),
            price_area_vio_mode: FlexArray::Scalar(defaults.price_area_vio_mode),
        }
    }
}

impl OrdersInput {
    /// Orders with only sizes specified; everything else at defaults.
    pub fn of_size(size: FlexArray<f64>) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Same sizes with an explicit size type.
    pub fn sized(size: FlexArray<f64>, size_type: SizeType) -> Self {
        Self {
            size,
            size_type: FlexArray::Scalar(size_type),
            ..Self::default()
        }
    }

    fn validate(&self, n_rows: usize, n_cols: usize) -> Result<(), SimulationError> {
        self.size.validate("size", n_rows, n_cols)?;
        self.price.validate("price", n_rows, n_cols)?;
        self.size_type.validate("size_type", n_rows, n_cols)?;
        self.direction.validate("direction", n_rows, n_cols)?;
        self.fees.validate("fees", n_rows, n_cols)?;
        self.fixed_fees.validate("fixed_fees", n_rows, n_cols)?;
        self.slippage.validate("slippage", n_rows, n_cols)?;
        self.min_size.validate("min_size", n_rows, n_cols)?;
        self.max_size.validate("max_size", n_rows, n_cols)?;
        self.size_granularity
            .validate("size_granularity", n_rows, n_cols)?;
        self.reject_prob.validate("reject_prob", n_rows, n_cols)?;
        self.lock_cash.validate("lock_cash", n_rows, n_cols)?;
        self.allow_partial.validate("allow_partial", n_rows, n_cols)?;
        self.raise_reject.validate("raise_reject", n_rows, n_cols)?;
        self.log.validate("log", n_rows, n_cols)?;
        self.price_area_vio_mode
            .validate("price_area_vio_mode", n_rows, n_cols)?;
        Ok(())
    }

    /// Materialize the order for one cell.
    pub fn order_at(&self, row: usize, col: usize) -> Order {
        Order {
            size: self.size.select(row, col),
            price: self.price.select(row, col),
            size_type: self.size_type.select(row, col),
            direction: self.direction.select(row, col),
            fees: self.fees.select(row, col),
            fixed_fees: self.fixed_fees.select(row, col),
            slippage: self.slippage.select(row, col),
            min_size: self.min_size.select(row, col),
            max_size: self.max_size.select(row, col),
            size_granularity: self.size_granularity.select(row, col),
            reject_prob: self.reject_prob.select(row, col),
            lock_cash: self.lock_cash.select(row, col),
            allow_partial: self.allow_partial.select(row, col),
            raise_reject: self.raise_reject.select(row, col),
            log: self.log.select(row, col),
            price_area_vio_mode: self.price_area_vio_mode.select(row, col),
        }
    }
}

/// Simulate a pre-broadcast order grid.
pub fn simulate_from_orders(
    params: &SimParams,
    grid: &PriceGrid,
    input: &OrdersInput,
) -> Result<SimOutput, SimulationError> {
    input.validate(grid.n_rows, grid.n_cols)?;
    let mut core = SimCore::new(params, grid)?;
    let auto_seq = params.call_seq == CallSeqSpec::Mode(CallSeqMode::Auto);
    let grouper = &params.grouper;

    for row in 0..grid.n_rows {
        for group in 0..grouper.n_groups() {
            if !core.segment_active(row, group) {
                continue;
            }
            core.begin_segment(row, group);

            if auto_seq {
                core.sort_segment_by_value(row, group, |col| {
                    let order = input.order_at(row, col);
                    (!order.size.is_nan()).then_some(order)
                });
            }

            let start = grouper.group_start(group);
            for slot in 0..grouper.group_len(group) {
                let k = core.call_seq.segment(row, grouper, group)[slot];
                let col = start + k;
                let order = input.order_at(row, col);
                if order.size.is_nan() {
                    // No order in this cell; not even an Ignored record.
                    continue;
                }
                core.exec_col(row, group, col, &order)?;
            }

            core.end_segment(row, group);
        }
    }
    Ok(core.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderSide;
    use crate::engine::config::InitCash;
    use crate::grouping::Grouper;

    #[test]
    fn single_buy_and_hold() {
        let grid = PriceGrid::from_close_series(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let params = SimParams::ungrouped(1);
        // Order only at the first bar.
        let mut size = vec![f64::NAN; 5];
        size[0] = 10.0;
        let input = OrdersInput::of_size(FlexArray::PerRow(size));

        let output = simulate_from_orders(&params, &grid, &input).unwrap();
        assert_eq!(output.order_records.len(), 1);
        let record = &output.order_records[0];
        assert_eq!(record.row, 0);
        assert_eq!(record.size, 10.0);
        assert_eq!(record.price, 1.0);
        assert_eq!(record.side, OrderSide::Buy);
    }

    #[test]
    fn one_order_per_cell_max() {
        let grid = PriceGrid::from_close_series(vec![1.0, 2.0, 3.0]);
        let params = SimParams::ungrouped(1);
        let input = OrdersInput::of_size(FlexArray::Scalar(1.0));
        let output = simulate_from_orders(&params, &grid, &input).unwrap();
        assert_eq!(output.order_records.len(), 3);
        // Ids are monotonic within the column.
        let ids: Vec<u64> = output.order_records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn record_overflow_is_typed() {
        let grid = PriceGrid::from_close_series(vec![1.0, 2.0, 3.0]);
        let mut params = SimParams::ungrouped(1);
        params.max_orders = Some(1);
        let input = OrdersInput::of_size(FlexArray::Scalar(1.0));
        let err = simulate_from_orders(&params, &grid, &input).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::RecordOverflow { col: 0, capacity: 1, .. }
        ));
    }

    #[test]
    fn auto_seq_runs_sells_before_buys() {
        // Two columns sharing one wallet with zero cash: the sell in
        // column 1 must execute first to fund the buy in column 0.
        let grid = PriceGrid::from_close(vec![2.0, 2.0], 1, 2);
        let mut params = SimParams::new(Grouper::single_group(2), true);
        params.init_cash = InitCash::Same(0.0);
        params.init_position = vec![0.0, 1.0];
        params.call_seq = CallSeqSpec::Mode(CallSeqMode::Auto);
        let input = OrdersInput::of_size(FlexArray::PerCol(vec![1.0, -1.0]));

        let output = simulate_from_orders(&params, &grid, &input).unwrap();
        assert_eq!(output.order_records.len(), 2);
        // The call sequence on row 0 lists column 1 first.
        assert_eq!(output.call_seq[..2], [1, 0]);
        let buy = output.col_orders(0).next().unwrap();
        assert_eq!(buy.side, OrderSide::Buy);
        assert_eq!(buy.size, 1.0);
    }

    #[test]
    fn fixed_default_seq_starves_the_buy() {
        let grid = PriceGrid::from_close(vec![2.0, 2.0], 1, 2);
        let mut params = SimParams::new(Grouper::single_group(2), true);
        params.init_cash = InitCash::Same(0.0);
        params.init_position = vec![0.0, 1.0];
        // Default order: column 0 (the buy) first, with no cash yet.
        let input = OrdersInput::of_size(FlexArray::PerCol(vec![1.0, -1.0]));
        let output = simulate_from_orders(&params, &grid, &input).unwrap();
        // Only the sell filled.
        assert_eq!(output.order_records.len(), 1);
        assert_eq!(output.order_records[0].col, 1);
    }
}
