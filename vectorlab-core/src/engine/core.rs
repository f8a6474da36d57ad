//! Shared driver machinery.
//!
//! All three drivers run the same per-(row, group) segment skeleton:
//!
//! ```text
//! if segment active:
//!   begin_segment      # deposits, valuation refresh, group value
//!   for k in call_seq:  execute produced order, append records
//!   end_segment        # earnings, close marks, value/return caches
//! ```
//!
//! [`SimCore`] owns the mutable state, record buffers, call sequence, and
//! rejection RNGs, and exposes that skeleton as methods. Drivers differ
//! only in how they produce an [`Order`] per call slot.

use crate::call_seq::{sort_by_order_value, CallSeq};
use crate::domain::order::{Order, OrderResult, OrderStatus, PriceArea};
use crate::domain::records::{LogRecord, OrderRecord, RecordBuffer};
use crate::domain::state::SimState;
use crate::engine::config::{CallSeqSpec, InitCash, PriceGrid, SimOutput, SimParams};
use crate::engine::execute::{approx_order_value, execute_order};
use crate::error::SimulationError;
use crate::rng;
use rand::rngs::StdRng;

pub struct SimCore<'a> {
    pub params: &'a SimParams,
    pub grid: &'a PriceGrid,
    pub state: SimState,
    pub call_seq: CallSeq,
    orders: RecordBuffer<OrderRecord>,
    logs: RecordBuffer<LogRecord>,
    reject_rngs: Vec<StdRng>,
    /// Wallet cash-flow low-water marks, tracked only for auto init cash.
    auto_flow: Option<AutoCashFlow>,
    /// Group value at the close of the previous active segment.
    pub prev_close_value: Vec<f64>,
    /// Group value right after this bar's deposits, before any order.
    pub open_value: Vec<f64>,
    /// Return of each group over its last completed segment.
    pub last_return: Vec<f64>,
    /// Deposits credited to each group on the current bar.
    segment_deposits: Vec<f64>,
    /// Materialized `T×N` earnings grid.
    earnings_out: Vec<f64>,
}

#[derive(Debug, Clone)]
struct AutoCashFlow {
    flow: Vec<f64>,
    low_water: Vec<f64>,
}

impl<'a> SimCore<'a> {
    pub fn new(params: &'a SimParams, grid: &'a PriceGrid) -> Result<Self, SimulationError> {
        params.validate(grid)?;

        let call_seq = match &params.call_seq {
            CallSeqSpec::Mode(mode) => CallSeq::build(
                *mode,
                grid.n_rows,
                &params.grouper,
                params.seed,
                params.group_offset,
            ),
            CallSeqSpec::Table(table) => {
                CallSeq::from_table(table.clone(), grid.n_rows, &params.grouper)?
            }
        };

        let init_cash = params.initial_cash_vec()?;
        let state = SimState::new(
            &params.grouper,
            params.cash_sharing,
            &init_cash,
            &params.init_position,
        );
        let n_wallets = params.n_wallets();
        let n_groups = params.grouper.n_groups();
        let auto_flow = params.init_cash.is_auto().then(|| AutoCashFlow {
            flow: vec![0.0; n_wallets],
            low_water: vec![0.0; n_wallets],
        });

        let max_orders = params.max_orders.unwrap_or(grid.n_rows);
        let max_logs = params.max_logs.unwrap_or(grid.n_rows);
        let reject_rngs = (0..grid.n_cols)
            .map(|col| rng::rng_for(params.seed, "reject", (params.col_offset + col) as u64))
            .collect();

        Ok(Self {
            params,
            grid,
            state,
            call_seq,
            orders: RecordBuffer::new("order", max_orders, grid.n_cols, OrderRecord::default()),
            logs: RecordBuffer::new("log", max_logs, grid.n_cols, LogRecord::default()),
            reject_rngs,
            auto_flow,
            prev_close_value: vec![f64::NAN; n_groups],
            open_value: vec![f64::NAN; n_groups],
            last_return: vec![f64::NAN; n_groups],
            segment_deposits: vec![0.0; n_groups],
            earnings_out: vec![0.0; grid.n_rows * grid.n_cols],
        })
    }

    pub fn segment_active(&self, row: usize, group: usize) -> bool {
        self.params.segment_mask.select(row, group)
    }

    fn track_flow(&mut self, wallet: usize, delta: f64) {
        if let Some(auto) = &mut self.auto_flow {
            auto.flow[wallet] += delta;
            if auto.flow[wallet] < auto.low_water[wallet] {
                auto.low_water[wallet] = auto.flow[wallet];
            }
        }
    }

    /// Credit deposits and refresh valuation marks for a segment.
    pub fn begin_segment(&mut self, row: usize, group: usize) {
        // Deposits land before any order sees the wallet.
        let mut deposited = 0.0;
        if self.params.cash_sharing {
            let amount = self.params.cash_deposits.select(row, group);
            if amount != 0.0 {
                self.state.deposit(group, amount);
                self.track_flow(group, amount);
                deposited += amount;
            }
        } else {
            for col in self.params.grouper.col_range(group) {
                let amount = self.params.cash_deposits.select(row, col);
                if amount != 0.0 {
                    self.state.deposit(col, amount);
                    self.track_flow(col, amount);
                    deposited += amount;
                }
            }
        }
        self.segment_deposits[group] = deposited;

        // Valuation marks: +inf pulls the current close, -inf carries the
        // previous mark, a finite entry is used as-is.
        for col in self.params.grouper.col_range(group) {
            let requested = self.params.val_price.select(row, col);
            let candidate = if requested == f64::INFINITY {
                self.grid.close.select(row, col)
            } else if requested == f64::NEG_INFINITY {
                f64::NAN
            } else {
                requested
            };
            if !candidate.is_nan() {
                self.state.val_price[col] = candidate;
            } else if !self.params.ffill_val_price {
                self.state.val_price[col] = f64::NAN;
            }
        }

        let value = self.state.group_value(&self.params.grouper, group);
        self.state.value[group] = value;
        self.open_value[group] = value;
    }

    /// Re-sort this segment's call order by approximate order value so that
    /// cash-releasing orders execute first. `order_for` sees absolute
    /// column indices.
    pub fn sort_segment_by_value<F>(&mut self, row: usize, group: usize, order_for: F)
    where
        F: Fn(usize) -> Option<Order>,
    {
        let start = self.params.grouper.group_start(group);
        let len = self.params.grouper.group_len(group);
        let mut values = vec![0.0; len];
        for k in 0..len {
            let col = start + k;
            if let Some(order) = order_for(col) {
                let exec_state = self.state.exec_state(col, group);
                values[k] = approx_order_value(&exec_state, &order);
            }
        }
        // values[k] belongs to in-group offset k; align them to the current
        // sequence before sorting the pair.
        let segment = self.call_seq.segment_mut(row, &self.params.grouper, group);
        let mut keys: Vec<f64> = segment.iter().map(|&k| values[k]).collect();
        sort_by_order_value(segment, &mut keys);
    }

    /// Execute one produced order for a column and append records.
    pub fn exec_col(
        &mut self,
        row: usize,
        group: usize,
        col: usize,
        order: &Order,
    ) -> Result<OrderResult, SimulationError> {
        let area = self.grid.price_area(row, col);
        let state_before = self.state.exec_state(col, group);
        let (result, state_after) = execute_order(
            &state_before,
            order,
            &area,
            self.params.update_value,
            &mut self.reject_rngs[col],
        )
        .map_err(|invalid| SimulationError::InvalidOrderField {
            field: invalid.field,
            value: invalid.value,
            row,
            col,
        })?;

        let mut order_id = None;
        if result.is_filled() {
            let id = self.orders.count(col) as u64;
            self.orders.push(
                col,
                OrderRecord {
                    id,
                    col,
                    row,
                    size: result.size,
                    price: result.price,
                    fees: result.fees,
                    side: result.side,
                },
            )?;
            order_id = Some(id);

            let wallet = self.state.wallet(col, group);
            // Derive the flow from the fill itself: wallet cash may be
            // infinite under auto init cash.
            let cash_delta = -result.signed_size() * result.price - result.fees;
            self.state.commit(col, group, state_after);
            self.track_flow(wallet, cash_delta);
            if self.params.update_value {
                // The state machine only sees one column; under cash
                // sharing the wallet value spans the whole group.
                self.state.value[group] = self.state.group_value(&self.params.grouper, group);
            }
        }

        if order.log {
            let id = self.logs.count(col) as u64;
            let committed = self.state.exec_state(col, group);
            self.logs.push(
                col,
                LogRecord {
                    id,
                    group,
                    col,
                    row,
                    open: area.open,
                    high: area.high,
                    low: area.low,
                    close: area.close,
                    cash_before: state_before.cash,
                    position_before: state_before.position,
                    debt_before: state_before.debt,
                    free_cash_before: state_before.free_cash,
                    val_price_before: state_before.val_price,
                    value_before: state_before.value,
                    req_size: order.size,
                    req_price: order.price,
                    req_fees: order.fees,
                    req_fixed_fees: order.fixed_fees,
                    req_slippage: order.slippage,
                    req_min_size: order.min_size,
                    req_max_size: order.max_size,
                    req_size_granularity: order.size_granularity,
                    req_reject_prob: order.reject_prob,
                    req_lock_cash: order.lock_cash,
                    req_allow_partial: order.allow_partial,
                    cash_after: committed.cash,
                    position_after: committed.position,
                    debt_after: committed.debt,
                    free_cash_after: committed.free_cash,
                    val_price_after: committed.val_price,
                    value_after: committed.value,
                    res_size: result.size,
                    res_price: result.price,
                    res_fees: result.fees,
                    res_side: result.side,
                    res_status: result.status,
                    res_status_info: result.status_info,
                    order_id,
                },
            )?;
        }

        if result.status == OrderStatus::Rejected && order.raise_reject {
            return Err(SimulationError::HardReject {
                row,
                col,
                info: result
                    .status_info
                    .expect("rejected results carry a status info"),
            });
        }
        Ok(result)
    }

    /// Credit earnings, mark columns to the close, and update value/return
    /// caches for a completed segment.
    pub fn end_segment(&mut self, row: usize, group: usize) {
        for col in self.params.grouper.col_range(group) {
            let earned = self.params.cash_earnings.select(row, col);
            self.earnings_out[row * self.grid.n_cols + col] = earned;
            if earned != 0.0 {
                let wallet = self.state.wallet(col, group);
                self.state.deposit(wallet, earned);
                self.track_flow(wallet, earned);
            }
            let close = self.grid.close.select(row, col);
            if !close.is_nan() {
                self.state.val_price[col] = close;
            } else if !self.params.ffill_val_price {
                self.state.val_price[col] = f64::NAN;
            }
        }

        let value = self.state.group_value(&self.params.grouper, group);
        self.state.value[group] = value;

        // Return over this bar, measured against the previous close value
        // adjusted for this bar's deposits. On the first active segment the
        // bar-open value stands in for the previous close.
        let base = if self.prev_close_value[group].is_nan() {
            self.open_value[group]
        } else {
            self.prev_close_value[group] + self.segment_deposits[group]
        };
        self.last_return[group] = if base > 0.0 { value / base - 1.0 } else { f64::NAN };
        self.prev_close_value[group] = value;
        self.segment_deposits[group] = 0.0;
    }

    /// Current price area for a cell (convenience for drivers).
    pub fn price_area(&self, row: usize, col: usize) -> PriceArea {
        self.grid.price_area(row, col)
    }

    pub fn order_records(&self, col: usize) -> &[OrderRecord] {
        self.orders.col_slice(col)
    }

    pub fn order_count(&self, col: usize) -> usize {
        self.orders.count(col)
    }

    /// Resolve auto initial cash and bundle the outputs.
    pub fn finish(self) -> SimOutput {
        let init_cash = match (&self.params.init_cash, &self.auto_flow) {
            (InitCash::Auto, Some(auto)) => {
                auto.low_water.iter().map(|&lw| (-lw).max(0.0)).collect()
            }
            (InitCash::AutoAlign, Some(auto)) => {
                let req = auto
                    .low_water
                    .iter()
                    .map(|&lw| (-lw).max(0.0))
                    .fold(0.0, f64::max);
                vec![req; self.params.n_wallets()]
            }
            _ => self
                .params
                .initial_cash_vec()
                .expect("validated at construction"),
        };
        SimOutput {
            n_rows: self.grid.n_rows,
            n_cols: self.grid.n_cols,
            order_records: self.orders.into_vec(),
            log_records: self.logs.into_vec(),
            call_seq: self.call_seq.into_vec(),
            init_cash,
            cash_earnings: self.earnings_out,
        }
    }
}
