//! Derived time series.
//!
//! Series are replayed from order records and initial state; the free
//! functions in [`series`] and [`value`] do the work, and [`Portfolio`]
//! wraps one simulation's inputs and outputs with explicit memoization so
//! repeated queries don't re-replay the records.

pub mod series;
pub mod value;

pub use series::{
    asset_flow, assets, cash, cash_flow, position_coverage, position_mask, FlowFilter,
};
pub use value::{
    asset_value, init_value, market_returns, market_value, returns, total_profit, value,
};

use crate::engine::config::{PriceGrid, SimOutput, SimParams};
use crate::flex::FlexArray;
use crate::grouping::Grouper;
use std::cell::OnceCell;

/// One simulation's inputs and records, with lazily computed views.
///
/// Each view is computed once on first access and cached; filtered
/// variants (long/short flow, free cash flow) are computed per call since
/// they are off the hot path.
pub struct Portfolio {
    n_rows: usize,
    n_cols: usize,
    close: FlexArray<f64>,
    grouper: Grouper,
    cash_sharing: bool,
    init_position: Vec<f64>,
    cash_deposits: FlexArray<f64>,
    output: SimOutput,

    cached_asset_flow: OnceCell<Vec<f64>>,
    cached_assets: OnceCell<Vec<f64>>,
    cached_cash_flow: OnceCell<Vec<f64>>,
    cached_cash: OnceCell<Vec<f64>>,
    cached_asset_value: OnceCell<Vec<f64>>,
    cached_value: OnceCell<Vec<f64>>,
    cached_init_value: OnceCell<Vec<f64>>,
    cached_returns: OnceCell<Vec<f64>>,
}

impl Portfolio {
    pub fn new(params: &SimParams, grid: &PriceGrid, output: SimOutput) -> Self {
        Self {
            n_rows: grid.n_rows,
            n_cols: grid.n_cols,
            close: grid.close.clone(),
            grouper: params.grouper.clone(),
            cash_sharing: params.cash_sharing,
            init_position: params.init_position.clone(),
            cash_deposits: params.cash_deposits.clone(),
            output,
            cached_asset_flow: OnceCell::new(),
            cached_assets: OnceCell::new(),
            cached_cash_flow: OnceCell::new(),
            cached_cash: OnceCell::new(),
            cached_asset_value: OnceCell::new(),
            cached_value: OnceCell::new(),
            cached_init_value: OnceCell::new(),
            cached_returns: OnceCell::new(),
        }
    }

    pub fn output(&self) -> &SimOutput {
        &self.output
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn n_wallets(&self) -> usize {
        if self.cash_sharing {
            self.grouper.n_groups()
        } else {
            self.n_cols
        }
    }

    /// Signed position flow per cell (`T×N`).
    pub fn asset_flow(&self) -> &[f64] {
        self.cached_asset_flow.get_or_init(|| {
            series::asset_flow(
                self.n_rows,
                self.n_cols,
                &self.output.order_records,
                &self.init_position,
                FlowFilter::All,
            )
        })
    }

    /// Filtered flow variant; computed per call.
    pub fn asset_flow_filtered(&self, filter: FlowFilter) -> Vec<f64> {
        series::asset_flow(
            self.n_rows,
            self.n_cols,
            &self.output.order_records,
            &self.init_position,
            filter,
        )
    }

    /// Position held per cell (`T×N`).
    pub fn assets(&self) -> &[f64] {
        self.cached_assets.get_or_init(|| {
            series::assets(self.n_rows, self.n_cols, self.asset_flow(), &self.init_position)
        })
    }

    pub fn position_mask(&self) -> Vec<bool> {
        series::position_mask(self.assets())
    }

    pub fn position_coverage(&self) -> Vec<f64> {
        series::position_coverage(self.n_rows, self.n_cols, self.assets())
    }

    /// Cash delta per cell (`T×N`), earnings included.
    pub fn cash_flow(&self) -> &[f64] {
        self.cached_cash_flow.get_or_init(|| {
            series::cash_flow(
                self.n_rows,
                self.n_cols,
                &self.output.order_records,
                &self.output.cash_earnings,
                &self.init_position,
                false,
            )
        })
    }

    /// Free-cash variant with signed debt accounting; computed per call.
    pub fn free_cash_flow(&self) -> Vec<f64> {
        series::cash_flow(
            self.n_rows,
            self.n_cols,
            &self.output.order_records,
            &self.output.cash_earnings,
            &self.init_position,
            true,
        )
    }

    /// Wallet cash over time (`T×W`).
    pub fn cash(&self) -> &[f64] {
        self.cached_cash.get_or_init(|| {
            series::cash(
                self.n_rows,
                &self.grouper,
                self.cash_sharing,
                self.cash_flow(),
                &self.output.init_cash,
                &self.cash_deposits,
            )
        })
    }

    /// Position value per cell (`T×N`).
    pub fn asset_value(&self) -> &[f64] {
        self.cached_asset_value.get_or_init(|| {
            value::asset_value(self.n_rows, self.n_cols, &self.close, self.assets())
        })
    }

    /// Wallet value over time (`T×W`).
    pub fn value(&self) -> &[f64] {
        self.cached_value.get_or_init(|| {
            value::value(
                self.n_rows,
                &self.grouper,
                self.cash_sharing,
                self.cash(),
                self.asset_value(),
            )
        })
    }

    /// Initial wallet value (`W`).
    pub fn init_value(&self) -> &[f64] {
        self.cached_init_value.get_or_init(|| {
            value::init_value(
                self.n_rows,
                &self.grouper,
                self.cash_sharing,
                &self.close,
                &self.output.init_cash,
                &self.init_position,
            )
        })
    }

    /// Deposit-adjusted simple returns per wallet (`T×W`).
    pub fn returns(&self) -> &[f64] {
        self.cached_returns.get_or_init(|| {
            value::returns(
                self.n_rows,
                self.n_wallets(),
                self.value(),
                self.init_value(),
                &self.cash_deposits,
            )
        })
    }

    /// Buy-and-hold baseline value (`T×W`); computed per call.
    pub fn market_value(&self) -> Vec<f64> {
        value::market_value(
            self.n_rows,
            &self.grouper,
            self.cash_sharing,
            &self.close,
            self.init_value(),
        )
    }

    /// Buy-and-hold baseline returns (`T×W`); computed per call.
    pub fn market_returns(&self) -> Vec<f64> {
        value::market_returns(
            self.n_rows,
            self.n_wallets(),
            &self.market_value(),
            self.init_value(),
        )
    }

    /// Closed-form profit per column (`N`); computed per call.
    pub fn total_profit(&self) -> Vec<f64> {
        value::total_profit(
            self.n_rows,
            self.n_cols,
            &self.close,
            &self.output.order_records,
            &self.init_position,
        )
    }
}
