//! Simulation configuration and result types.

use crate::call_seq::CallSeqMode;
use crate::domain::order::PriceArea;
use crate::domain::records::{LogRecord, OrderRecord};
use crate::error::SimulationError;
use crate::flex::FlexArray;
use crate::grouping::Grouper;
use serde::{Deserialize, Serialize};

/// The OHLC input grid. Only `close` is required; the other fields default
/// to NaN (unknown) and merely widen what the kernel can check and fill.
#[derive(Debug, Clone)]
pub struct PriceGrid {
    pub n_rows: usize,
    pub n_cols: usize,
    pub open: FlexArray<f64>,
    pub high: FlexArray<f64>,
    pub low: FlexArray<f64>,
    pub close: FlexArray<f64>,
}

impl PriceGrid {
    /// Build from a full row-major close grid.
    pub fn from_close(close: Vec<f64>, n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            open: FlexArray::Scalar(f64::NAN),
            high: FlexArray::Scalar(f64::NAN),
            low: FlexArray::Scalar(f64::NAN),
            close: FlexArray::full(close, n_cols),
        }
    }

    /// Build a single-column grid from a close series.
    pub fn from_close_series(close: Vec<f64>) -> Self {
        let n_rows = close.len();
        Self::from_close(close, n_rows, 1)
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        self.open.validate("open", self.n_rows, self.n_cols)?;
        self.high.validate("high", self.n_rows, self.n_cols)?;
        self.low.validate("low", self.n_rows, self.n_cols)?;
        self.close.validate("close", self.n_rows, self.n_cols)?;
        Ok(())
    }

    /// Bar bounds for one cell.
    pub fn price_area(&self, row: usize, col: usize) -> PriceArea {
        PriceArea {
            open: self.open.select(row, col),
            high: self.high.select(row, col),
            low: self.low.select(row, col),
            close: self.close.select(row, col),
        }
    }
}

/// Initial capital specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InitCash {
    /// The same amount in every wallet.
    Same(f64),
    /// One amount per wallet (per group under cash sharing, else per column).
    PerWallet(Vec<f64>),
    /// Simulate unconstrained, then report the capital each wallet needed.
    Auto,
    /// Like `Auto`, then align every wallet to the maximum requirement.
    AutoAlign,
}

impl InitCash {
    pub fn is_auto(&self) -> bool {
        matches!(self, InitCash::Auto | InitCash::AutoAlign)
    }
}

/// Call sequence specification: a mode to build, or an explicit table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallSeqSpec {
    Mode(CallSeqMode),
    /// Row-major `T×N` table of in-group offsets.
    Table(Vec<usize>),
}

/// Inputs shared by every driver.
#[derive(Debug, Clone)]
pub struct SimParams {
    pub grouper: Grouper,
    pub cash_sharing: bool,
    pub init_cash: InitCash,
    /// Initial position per column.
    pub init_position: Vec<f64>,
    /// `T×W` deposits credited at segment open (W = wallet count).
    pub cash_deposits: FlexArray<f64>,
    /// `T×N` earnings credited at segment close.
    pub cash_earnings: FlexArray<f64>,
    /// `T×G` mask; inactive segments are skipped entirely.
    pub segment_mask: FlexArray<bool>,
    pub call_seq: CallSeqSpec,
    /// Valuation price source per cell: `+inf` = current close, `-inf` =
    /// carry the previous mark, finite = explicit.
    pub val_price: FlexArray<f64>,
    /// Recompute wallet value after every filled order within a segment.
    pub update_value: bool,
    /// Carry the last known valuation mark over NaN bars.
    pub ffill_val_price: bool,
    /// Per-column order record capacity; `None` sizes to one per bar.
    pub max_orders: Option<usize>,
    /// Per-column log record capacity; `None` sizes to one per bar.
    pub max_logs: Option<usize>,
    /// Master seed for rejection draws and random call sequences.
    pub seed: u64,
    /// Absolute index of this grid's first column when the simulation is
    /// a chunk of a wider grid; keeps per-column seeded streams aligned
    /// with the unchunked run.
    pub col_offset: usize,
    /// Absolute index of this grid's first group; same purpose.
    pub group_offset: usize,
}

impl SimParams {
    pub fn new(grouper: Grouper, cash_sharing: bool) -> Self {
        let n_cols = grouper.n_cols();
        Self {
            grouper,
            cash_sharing,
            init_cash: InitCash::Same(100.0),
            init_position: vec![0.0; n_cols],
            cash_deposits: FlexArray::Scalar(0.0),
            cash_earnings: FlexArray::Scalar(0.0),
            segment_mask: FlexArray::Scalar(true),
            call_seq: CallSeqSpec::Mode(CallSeqMode::Default),
            val_price: FlexArray::Scalar(f64::INFINITY),
            update_value: false,
            ffill_val_price: true,
            max_orders: None,
            max_logs: None,
            seed: 0,
            col_offset: 0,
            group_offset: 0,
        }
    }

    /// A single ungrouped column per asset, separate wallets.
    pub fn ungrouped(n_cols: usize) -> Self {
        Self::new(Grouper::ungrouped(n_cols), false)
    }

    pub fn n_wallets(&self) -> usize {
        if self.cash_sharing {
            self.grouper.n_groups()
        } else {
            self.grouper.n_cols()
        }
    }

    /// Resolve the initial cash vector for non-auto modes; auto modes start
    /// unconstrained and are resolved after the run.
    pub fn initial_cash_vec(&self) -> Result<Vec<f64>, SimulationError> {
        let n_wallets = self.n_wallets();
        match &self.init_cash {
            InitCash::Same(amount) => Ok(vec![*amount; n_wallets]),
            InitCash::PerWallet(amounts) => {
                if amounts.len() != n_wallets {
                    return Err(SimulationError::ShapeMismatch {
                        name: "init_cash",
                        expected_rows: 1,
                        expected_cols: n_wallets,
                        actual: format!("length {}", amounts.len()),
                    });
                }
                Ok(amounts.clone())
            }
            InitCash::Auto | InitCash::AutoAlign => Ok(vec![f64::INFINITY; n_wallets]),
        }
    }

    pub fn validate(&self, grid: &PriceGrid) -> Result<(), SimulationError> {
        grid.validate()?;
        self.grouper.check_cols(grid.n_cols)?;
        if self.init_position.len() != grid.n_cols {
            return Err(SimulationError::ShapeMismatch {
                name: "init_position",
                expected_rows: 1,
                expected_cols: grid.n_cols,
                actual: format!("length {}", self.init_position.len()),
            });
        }
        self.cash_deposits
            .validate("cash_deposits", grid.n_rows, self.n_wallets())?;
        self.cash_earnings
            .validate("cash_earnings", grid.n_rows, grid.n_cols)?;
        self.segment_mask
            .validate("segment_mask", grid.n_rows, self.grouper.n_groups())?;
        self.val_price
            .validate("val_price", grid.n_rows, grid.n_cols)?;
        Ok(())
    }
}

/// Everything a simulation leaves behind.
#[derive(Debug, Clone)]
pub struct SimOutput {
    pub n_rows: usize,
    pub n_cols: usize,
    /// Ordered by column, then by execution (ids monotonic per column).
    pub order_records: Vec<OrderRecord>,
    pub log_records: Vec<LogRecord>,
    /// The call sequence actually used, row-major `T×N`.
    pub call_seq: Vec<usize>,
    /// Initial cash per wallet; for auto modes, the resolved requirement.
    pub init_cash: Vec<f64>,
    /// Materialized `T×N` earnings grid (row-major).
    pub cash_earnings: Vec<f64>,
}

impl SimOutput {
    /// Records of one column, in execution order.
    pub fn col_orders(&self, col: usize) -> impl Iterator<Item = &OrderRecord> {
        self.order_records.iter().filter(move |r| r.col == col)
    }
}
