//! From-signals driver: boolean entry/exit streams to at most one order
//! per bar per column.
//!
//! Resolution happens in two pure stages. First the four raw streams
//! collapse into a single [`Signal`] through the conflict policies; then
//! the signal, the current position, and the accumulation policy map to an
//! [`Order`] (or nothing). Stop-loss/take-profit tracking runs per column
//! per bar before user signals and may synthesize an exit; the priority
//! policy breaks the tie when both fire.

use crate::call_seq::CallSeqMode;
use crate::domain::order::{
    Direction, Order, PriceArea, PriceAreaVioMode, SizeType,
};
use crate::engine::config::{CallSeqSpec, PriceGrid, SimOutput, SimParams};
use crate::engine::core::SimCore;
use crate::error::SimulationError;
use crate::flex::FlexArray;
use crate::math;
use serde::{Deserialize, Serialize};

/// Outcome of collapsing one bar's raw signals for one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    None,
    LongEntry,
    LongExit,
    ShortEntry,
    ShortExit,
    /// Synthesized by the stop subsystem; carries no user intent.
    StopExit,
}

/// Same-side entry+exit on one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictMode {
    /// Drop both signals.
    Ignore,
    /// Keep the entry.
    Entry,
    /// Keep the exit.
    Exit,
    /// Keep whichever continues the current position.
    Adjacent,
    /// Keep whichever works against the current position.
    Opposite,
}

/// Long and short entry on one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirConflictMode {
    /// Drop both entries.
    Ignore,
    /// Keep the long entry.
    Long,
    /// Keep the short entry.
    Short,
    /// Keep the side of the current position; drop both when flat.
    Adjacent,
    /// Keep the side opposing the current position; drop both when flat.
    Opposite,
}

/// Entry against an open opposite position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OppositeEntryMode {
    /// Drop the entry.
    Ignore,
    /// Close the open position; do not open a new one.
    Close,
    /// Reduce the open position by the entry size, at most to flat.
    CloseReduce,
    /// Close the open position and open the opposite one in one order.
    Reverse,
    /// Move toward the opposite position by the entry size.
    ReverseReduce,
}

/// Whether repeated same-side entries grow (or exits shrink) a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccumulationMode {
    Disabled,
    AddOnly,
    RemoveOnly,
    Both,
}

impl AccumulationMode {
    fn allows_add(self) -> bool {
        matches!(self, AccumulationMode::AddOnly | AccumulationMode::Both)
    }

    fn allows_remove(self) -> bool {
        matches!(self, AccumulationMode::RemoveOnly | AccumulationMode::Both)
    }
}

/// Reference price a freshly entered position anchors its stops to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopEntryPrice {
    /// The valuation mark at order time.
    ValPrice,
    /// The requested order price (sentinels resolved).
    Price,
    /// The executed fill price, slippage included.
    FillPrice,
    /// The bar close.
    Close,
}

/// Price a triggered stop exits at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopExitPrice {
    /// The stop level itself (bounded by what the bar allows).
    Stop,
    /// The bar close.
    Close,
}

/// Tie break when a stop and a user signal fire on the same bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalPriority {
    StopWins,
    UserWins,
}

/// Per-bar-per-column view handed to the stop adjustment hooks.
#[derive(Debug, Clone, Copy)]
pub struct StopContext {
    pub row: usize,
    pub col: usize,
    pub group: usize,
    pub position: f64,
    pub val_price: f64,
    pub init_price: f64,
    pub peak_price: f64,
    pub init_row: usize,
    pub sl_stop: f64,
    pub sl_trail: bool,
    pub tp_stop: f64,
}

/// Per-bar stop re-configuration. Defaults leave the stops untouched.
#[allow(unused_variables)]
pub trait StopAdjuster {
    /// Return a new `(sl_stop, sl_trail)` to replace the current ones.
    fn adjust_sl(&mut self, ctx: &StopContext) -> Option<(f64, bool)> {
        None
    }

    /// Return a new `tp_stop` to replace the current one.
    fn adjust_tp(&mut self, ctx: &StopContext) -> Option<f64> {
        None
    }
}

/// The identity adjuster.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStopAdjust;

impl StopAdjuster for NoStopAdjust {}

/// Signal streams plus per-cell order parameters.
#[derive(Debug, Clone)]
pub struct SignalsInput {
    pub long_entry: FlexArray<bool>,
    pub long_exit: FlexArray<bool>,
    pub short_entry: FlexArray<bool>,
    pub short_exit: FlexArray<bool>,
    /// Entry size; `+inf` means "use everything available".
    pub size: FlexArray<f64>,
    pub price: FlexArray<f64>,
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
    pub accumulate: FlexArray<AccumulationMode>,
    pub upon_long_conflict: FlexArray<ConflictMode>,
    pub upon_short_conflict: FlexArray<ConflictMode>,
    pub upon_dir_conflict: FlexArray<DirConflictMode>,
    pub upon_opposite_entry: FlexArray<OppositeEntryMode>,
    /// Master switch for the stop subsystem.
    pub use_stops: bool,
    /// Stop distance as a fraction of the anchor price; NaN disables.
    pub sl_stop: FlexArray<f64>,
    pub sl_trail: FlexArray<bool>,
    pub tp_stop: FlexArray<f64>,
    pub stop_entry_price: FlexArray<StopEntryPrice>,
    pub stop_exit_price: FlexArray<StopExitPrice>,
    pub signal_priority: SignalPriority,
}

impl Default for SignalsInput {
    fn default() -> Self {
        Self {
            long_entry: FlexArray::Scalar(false),
            long_exit: FlexArray::Scalar(false),
            short_entry: FlexArray::Scalar(false),
            short_exit: FlexArray::Scalar(false),
            size: FlexArray::Scalar(f64::INFINITY),
            price: FlexArray::Scalar(f64::INFINITY),
            fees: FlexArray::Scalar(0.0),
            fixed_fees: FlexArray::Scalar(0.0),
            slippage: FlexArray::Scalar(0.0),
            min_size: FlexArray::Scalar(0.0),
            max_size: FlexArray::Scalar(f64::INFINITY),
            size_granularity: FlexArray::Scalar(f64::NAN),
            reject_prob: FlexArray::Scalar(0.0),
            lock_cash: FlexArray::Scalar(false),
            allow_partial: FlexArray::Scalar(true),
            raise_reject: FlexArray::Scalar(false),
            log: FlexArray::Scalar(false),
            price_area_vio_mode: FlexArray::Scalar(PriceAreaVioMode::Ignore),
            accumulate: FlexArray::Scalar(AccumulationMode::Disabled),
            upon_long_conflict: FlexArray::Scalar(ConflictMode::Ignore),
            upon_short_conflict: FlexArray::Scalar(ConflictMode::Ignore),
            upon_dir_conflict: FlexArray::Scalar(DirConflictMode::Ignore),
            upon_opposite_entry: FlexArray::Scalar(OppositeEntryMode::Reverse),
            use_stops: false,
            sl_stop: FlexArray::Scalar(f64::NAN),
            sl_trail: FlexArray::Scalar(false),
            tp_stop: FlexArray::Scalar(f64::NAN),
            stop_entry_price: FlexArray::Scalar(StopEntryPrice::Close),
            stop_exit_price: FlexArray::Scalar(StopExitPrice::Stop),
            signal_priority: SignalPriority::StopWins,
        }
    }
}

impl SignalsInput {
    /// Two-stream form: how entries/exits read depends on the direction.
    /// `LongOnly`/`ShortOnly` map onto that side's streams; `Both` treats
    /// an exit as a short entry (reversal semantics).
    pub fn from_entries_exits(
        entries: FlexArray<bool>,
        exits: FlexArray<bool>,
        direction: Direction,
    ) -> Self {
        let base = Self::default();
        match direction {
            Direction::LongOnly => Self {
                long_entry: entries,
                long_exit: exits,
                ..base
            },
            Direction::ShortOnly => Self {
                short_entry: entries,
                short_exit: exits,
                ..base
            },
            Direction::Both => Self {
                long_entry: entries,
                short_entry: exits,
                ..base
            },
        }
    }

    fn validate(&self, n_rows: usize, n_cols: usize) -> Result<(), SimulationError> {
        self.long_entry.validate("long_entry", n_rows, n_cols)?;
        self.long_exit.validate("long_exit", n_rows, n_cols)?;
        self.short_entry.validate("short_entry", n_rows, n_cols)?;
        self.short_exit.validate("short_exit", n_rows, n_cols)?;
        self.size.validate("size", n_rows, n_cols)?;
        self.price.validate("price", n_rows, n_cols)?;
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
        self.accumulate.validate("accumulate", n_rows, n_cols)?;
        self.upon_long_conflict
            .validate("upon_long_conflict", n_rows, n_cols)?;
        self.upon_short_conflict
            .validate("upon_short_conflict", n_rows, n_cols)?;
        self.upon_dir_conflict
            .validate("upon_dir_conflict", n_rows, n_cols)?;
        self.upon_opposite_entry
            .validate("upon_opposite_entry", n_rows, n_cols)?;
        self.sl_stop.validate("sl_stop", n_rows, n_cols)?;
        self.sl_trail.validate("sl_trail", n_rows, n_cols)?;
        self.tp_stop.validate("tp_stop", n_rows, n_cols)?;
        self.stop_entry_price
            .validate("stop_entry_price", n_rows, n_cols)?;
        self.stop_exit_price
            .validate("stop_exit_price", n_rows, n_cols)?;
        Ok(())
    }

    /// Order skeleton for one cell; size and price get overwritten by the
    /// signal mapping.
    fn base_order(&self, row: usize, col: usize) -> Order {
        Order {
            size: f64::NAN,
            price: self.price.select(row, col),
            size_type: SizeType::Amount,
            direction: Direction::Both,
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

/// Collapse one bar's raw streams into a single signal.
///
/// Pure: depends only on the four booleans, the conflict policies, and the
/// sign of the current position.
pub fn resolve_signal(
    mut long_entry: bool,
    mut long_exit: bool,
    mut short_entry: bool,
    mut short_exit: bool,
    position: f64,
    long_conflict: ConflictMode,
    short_conflict: ConflictMode,
    dir_conflict: DirConflictMode,
) -> Signal {
    let is_long = position > 0.0;
    let is_short = position < 0.0;

    if long_entry && long_exit {
        match long_conflict {
            ConflictMode::Ignore => {
                long_entry = false;
                long_exit = false;
            }
            ConflictMode::Entry => long_exit = false,
            ConflictMode::Exit => long_entry = false,
            ConflictMode::Adjacent => {
                // The entry continues a long; the exit works against it.
                if is_long {
                    long_exit = false;
                } else {
                    long_entry = false;
                }
            }
            ConflictMode::Opposite => {
                if is_long {
                    long_entry = false;
                } else {
                    long_exit = false;
                }
            }
        }
    }
    if short_entry && short_exit {
        match short_conflict {
            ConflictMode::Ignore => {
                short_entry = false;
                short_exit = false;
            }
            ConflictMode::Entry => short_exit = false,
            ConflictMode::Exit => short_entry = false,
            ConflictMode::Adjacent => {
                if is_short {
                    short_exit = false;
                } else {
                    short_entry = false;
                }
            }
            ConflictMode::Opposite => {
                if is_short {
                    short_entry = false;
                } else {
                    short_exit = false;
                }
            }
        }
    }
    if long_entry && short_entry {
        match dir_conflict {
            DirConflictMode::Ignore => {
                long_entry = false;
                short_entry = false;
            }
            DirConflictMode::Long => short_entry = false,
            DirConflictMode::Short => long_entry = false,
            DirConflictMode::Adjacent => {
                if is_long {
                    short_entry = false;
                } else if is_short {
                    long_entry = false;
                } else {
                    long_entry = false;
                    short_entry = false;
                }
            }
            DirConflictMode::Opposite => {
                if is_long {
                    long_entry = false;
                } else if is_short {
                    short_entry = false;
                } else {
                    long_entry = false;
                    short_entry = false;
                }
            }
        }
    }

    if long_entry {
        Signal::LongEntry
    } else if short_entry {
        Signal::ShortEntry
    } else if long_exit && is_long {
        Signal::LongExit
    } else if short_exit && is_short {
        Signal::ShortExit
    } else {
        Signal::None
    }
}

/// Map a resolved signal onto an order, or nothing.
fn signal_to_order(
    signal: Signal,
    position: f64,
    size: f64,
    accumulate: AccumulationMode,
    opposite_entry: OppositeEntryMode,
    base: &Order,
) -> Option<Order> {
    let mut order = *base;
    match signal {
        Signal::None | Signal::StopExit => return None,
        Signal::LongEntry => {
            if position > 0.0 {
                if !accumulate.allows_add() {
                    return None;
                }
                order.size = size;
            } else if position < 0.0 {
                match opposite_entry {
                    OppositeEntryMode::Ignore => return None,
                    OppositeEntryMode::Close => {
                        order.size = 0.0;
                        order.size_type = SizeType::TargetAmount;
                    }
                    OppositeEntryMode::CloseReduce => {
                        order.size = size.min(-position);
                    }
                    OppositeEntryMode::Reverse => {
                        order.size = if size.is_finite() {
                            -position + size
                        } else {
                            f64::INFINITY
                        };
                    }
                    OppositeEntryMode::ReverseReduce => {
                        order.size = size;
                    }
                }
            } else {
                order.size = size;
            }
        }
        Signal::ShortEntry => {
            if position < 0.0 {
                if !accumulate.allows_add() {
                    return None;
                }
                order.size = -size;
            } else if position > 0.0 {
                match opposite_entry {
                    OppositeEntryMode::Ignore => return None,
                    OppositeEntryMode::Close => {
                        order.size = 0.0;
                        order.size_type = SizeType::TargetAmount;
                    }
                    OppositeEntryMode::CloseReduce => {
                        order.size = -(size.min(position));
                    }
                    OppositeEntryMode::Reverse => {
                        order.size = if size.is_finite() {
                            -(position + size)
                        } else {
                            f64::NEG_INFINITY
                        };
                    }
                    OppositeEntryMode::ReverseReduce => {
                        order.size = -size;
                    }
                }
            } else {
                order.size = -size;
            }
        }
        Signal::LongExit => {
            if position <= 0.0 {
                return None;
            }
            order.direction = Direction::LongOnly;
            order.size = if accumulate.allows_remove() {
                -size
            } else {
                f64::NEG_INFINITY
            };
        }
        Signal::ShortExit => {
            if position >= 0.0 {
                return None;
            }
            order.direction = Direction::ShortOnly;
            // Under short-only convention a negative size covers.
            order.size = if accumulate.allows_remove() {
                -size
            } else {
                f64::NEG_INFINITY
            };
        }
    }
    Some(order)
}

/// Per-column stop tracking. `init_price` NaN means inactive.
#[derive(Debug, Clone, Copy)]
struct StopState {
    init_price: f64,
    /// Most favorable price seen since entry (highest for longs, lowest
    /// for shorts). Trailing stops anchor here.
    peak_price: f64,
    init_row: usize,
    sl_stop: f64,
    sl_trail: bool,
    tp_stop: f64,
}

impl StopState {
    const INACTIVE: StopState = StopState {
        init_price: f64::NAN,
        peak_price: f64::NAN,
        init_row: 0,
        sl_stop: f64::NAN,
        sl_trail: false,
        tp_stop: f64::NAN,
    };

    fn active(&self) -> bool {
        !self.init_price.is_nan()
    }
}

/// A stop hit and the price the exit order should use.
#[derive(Debug, Clone, Copy, PartialEq)]
struct StopHit {
    exit_price: f64,
}

/// Did a bar cross a level from below (for long take-profits and short
/// stop-losses)? Inclusive with high/low data, strict on close-only bars.
fn crossed_above(level: f64, area: &PriceArea) -> bool {
    if area.has_hl() {
        math::is_close_or_less(level, area.high)
    } else {
        !area.close.is_nan() && math::is_less(level, area.close)
    }
}

fn crossed_below(level: f64, area: &PriceArea) -> bool {
    if area.has_hl() {
        math::is_close_or_less(area.low, level)
    } else {
        !area.close.is_nan() && math::is_less(area.close, level)
    }
}

/// Price an exit at `level` actually gets, honoring opening gaps.
fn level_exit_price(level: f64, area: &PriceArea, gapped_through: bool) -> f64 {
    if gapped_through && !area.open.is_nan() {
        return area.open;
    }
    if area.has_hl() {
        level.clamp(area.low, area.high)
    } else {
        area.close
    }
}

/// Evaluate the stop state against the current bar.
///
/// Stop-loss is checked before take-profit: when both lie inside one bar
/// the pessimistic reading wins.
fn check_stop(
    stop: &StopState,
    position: f64,
    area: &PriceArea,
    exit_mode: StopExitPrice,
) -> Option<StopHit> {
    if !stop.active() || position == 0.0 {
        return None;
    }
    let long = position > 0.0;

    if !stop.sl_stop.is_nan() {
        let anchor = if stop.sl_trail {
            stop.peak_price
        } else {
            stop.init_price
        };
        let hit = if long {
            let level = anchor * (1.0 - stop.sl_stop);
            crossed_below(level, area).then(|| {
                let gapped = !area.open.is_nan() && area.open <= level;
                match exit_mode {
                    StopExitPrice::Stop => level_exit_price(level, area, gapped),
                    StopExitPrice::Close => area.close,
                }
            })
        } else {
            let level = anchor * (1.0 + stop.sl_stop);
            crossed_above(level, area).then(|| {
                let gapped = !area.open.is_nan() && area.open >= level;
                match exit_mode {
                    StopExitPrice::Stop => level_exit_price(level, area, gapped),
                    StopExitPrice::Close => area.close,
                }
            })
        };
        if let Some(exit_price) = hit {
            return Some(StopHit { exit_price });
        }
    }

    if !stop.tp_stop.is_nan() {
        let hit = if long {
            let level = stop.init_price * (1.0 + stop.tp_stop);
            crossed_above(level, area).then(|| {
                let gapped = !area.open.is_nan() && area.open >= level;
                match exit_mode {
                    StopExitPrice::Stop => level_exit_price(level, area, gapped),
                    StopExitPrice::Close => area.close,
                }
            })
        } else {
            let level = stop.init_price * (1.0 - stop.tp_stop);
            crossed_below(level, area).then(|| {
                let gapped = !area.open.is_nan() && area.open <= level;
                match exit_mode {
                    StopExitPrice::Stop => level_exit_price(level, area, gapped),
                    StopExitPrice::Close => area.close,
                }
            })
        };
        if let Some(exit_price) = hit {
            return Some(StopHit { exit_price });
        }
    }
    None
}

/// Ratchet the favorable-price watermark with the bar just processed.
fn ratchet_peak(stop: &mut StopState, position: f64, area: &PriceArea) {
    if !stop.active() || position == 0.0 {
        return;
    }
    let candidates = [area.open, area.high, area.low, area.close];
    for price in candidates {
        if price.is_nan() {
            continue;
        }
        if position > 0.0 {
            if price > stop.peak_price {
                stop.peak_price = price;
            }
        } else if price < stop.peak_price {
            stop.peak_price = price;
        }
    }
}

/// Simulate signal streams with the identity stop adjuster.
pub fn simulate_from_signals(
    params: &SimParams,
    grid: &PriceGrid,
    input: &SignalsInput,
) -> Result<SimOutput, SimulationError> {
    simulate_from_signals_with(params, grid, input, &mut NoStopAdjust)
}

/// Simulate signal streams with custom per-bar stop adjustment.
pub fn simulate_from_signals_with<A: StopAdjuster>(
    params: &SimParams,
    grid: &PriceGrid,
    input: &SignalsInput,
    adjuster: &mut A,
) -> Result<SimOutput, SimulationError> {
    input.validate(grid.n_rows, grid.n_cols)?;
    let mut core = SimCore::new(params, grid)?;
    let auto_seq = params.call_seq == CallSeqSpec::Mode(CallSeqMode::Auto);
    let grouper = &params.grouper;
    let mut stops = vec![StopState::INACTIVE; grid.n_cols];

    for row in 0..grid.n_rows {
        for group in 0..grouper.n_groups() {
            if !core.segment_active(row, group) {
                continue;
            }
            core.begin_segment(row, group);

            if auto_seq {
                let start = grouper.group_start(group);
                let tentative: Vec<Option<Order>> = grouper
                    .col_range(group)
                    .map(|col| {
                        let position = core.state.position[col];
                        user_order(input, row, col, position)
                    })
                    .collect();
                core.sort_segment_by_value(row, group, |col| tentative[col - start]);
            }

            let start = grouper.group_start(group);
            for slot in 0..grouper.group_len(group) {
                let k = core.call_seq.segment(row, grouper, group)[slot];
                let col = start + k;
                process_cell(&mut core, input, adjuster, &mut stops, row, group, col)?;
            }

            core.end_segment(row, group);
        }
    }
    Ok(core.finish())
}

/// The user-signal order for a cell, ignoring stops. Used both for
/// execution and for auto call-seq ranking.
fn user_order(input: &SignalsInput, row: usize, col: usize, position: f64) -> Option<Order> {
    let signal = resolve_signal(
        input.long_entry.select(row, col),
        input.long_exit.select(row, col),
        input.short_entry.select(row, col),
        input.short_exit.select(row, col),
        position,
        input.upon_long_conflict.select(row, col),
        input.upon_short_conflict.select(row, col),
        input.upon_dir_conflict.select(row, col),
    );
    signal_to_order(
        signal,
        position,
        input.size.select(row, col),
        input.accumulate.select(row, col),
        input.upon_opposite_entry.select(row, col),
        &input.base_order(row, col),
    )
}

#[allow(clippy::too_many_arguments)]
fn process_cell<A: StopAdjuster>(
    core: &mut SimCore,
    input: &SignalsInput,
    adjuster: &mut A,
    stops: &mut [StopState],
    row: usize,
    group: usize,
    col: usize,
) -> Result<(), SimulationError> {
    let position = core.state.position[col];
    let val_price = core.state.val_price[col];
    let area = core.price_area(row, col);

    // Adjustment hooks run before evaluation so a stop can move out of the
    // bar's way (or into it) this very bar.
    let stop_exit = if input.use_stops {
        let stop = &mut stops[col];
        if stop.active() {
            let ctx = StopContext {
                row,
                col,
                group,
                position,
                val_price,
                init_price: stop.init_price,
                peak_price: stop.peak_price,
                init_row: stop.init_row,
                sl_stop: stop.sl_stop,
                sl_trail: stop.sl_trail,
                tp_stop: stop.tp_stop,
            };
            if let Some((sl, trail)) = adjuster.adjust_sl(&ctx) {
                stop.sl_stop = sl;
                stop.sl_trail = trail;
            }
            if let Some(tp) = adjuster.adjust_tp(&ctx) {
                stop.tp_stop = tp;
            }
        }
        if stop.active() && stop.init_row != row {
            check_stop(
                stop,
                position,
                &area,
                input.stop_exit_price.select(row, col),
            )
        } else {
            None
        }
    } else {
        None
    };

    let user = user_order(input, row, col, position);

    let order = match (stop_exit, &user) {
        (Some(hit), user) => {
            let stop_wins =
                user.is_none() || input.signal_priority == SignalPriority::StopWins;
            if stop_wins {
                let mut order = input.base_order(row, col);
                order.price = hit.exit_price;
                // Slippage was already spent crossing the level.
                order.slippage = 0.0;
                order.size = f64::NEG_INFINITY;
                order.direction = if position > 0.0 {
                    Direction::LongOnly
                } else {
                    Direction::ShortOnly
                };
                Some(order)
            } else {
                *user
            }
        }
        (None, user) => *user,
    };

    if let Some(order) = order {
        let state_before = core.state.exec_state(col, group);
        let result = core.exec_col(row, group, col, &order)?;
        if result.is_filled() {
            let position_after = core.state.position[col];
            let stop = &mut stops[col];
            if position_after == 0.0 {
                *stop = StopState::INACTIVE;
            } else if position == 0.0
                || position.signum() != position_after.signum()
                || !stop.active()
            {
                // Fresh position (entry or reversal): anchor the stops.
                let anchor = match input.stop_entry_price.select(row, col) {
                    StopEntryPrice::ValPrice => state_before.val_price,
                    StopEntryPrice::Price => {
                        if order.price == f64::INFINITY {
                            area.close
                        } else if order.price == f64::NEG_INFINITY {
                            state_before.val_price
                        } else {
                            order.price
                        }
                    }
                    StopEntryPrice::FillPrice => result.price,
                    StopEntryPrice::Close => area.close,
                };
                *stop = StopState {
                    init_price: anchor,
                    peak_price: anchor,
                    init_row: row,
                    sl_stop: input.sl_stop.select(row, col),
                    sl_trail: input.sl_trail.select(row, col),
                    tp_stop: input.tp_stop.select(row, col),
                };
            }
            // Adds and partial removals keep the original anchor.
        }
    }

    if input.use_stops {
        let stop = &mut stops[col];
        // The entry bar seeds the watermark; tracking starts next bar.
        if stop.active() && stop.init_row != row {
            ratchet_peak(stop, core.state.position[col], &area);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Signal resolution ────────────────────────────────────────────

    #[test]
    fn entry_exit_conflict_modes() {
        let resolve = |mode, position| {
            resolve_signal(
                true,
                true,
                false,
                false,
                position,
                mode,
                ConflictMode::Ignore,
                DirConflictMode::Ignore,
            )
        };
        assert_eq!(resolve(ConflictMode::Ignore, 0.0), Signal::None);
        assert_eq!(resolve(ConflictMode::Entry, 0.0), Signal::LongEntry);
        assert_eq!(resolve(ConflictMode::Exit, 5.0), Signal::LongExit);
        assert_eq!(resolve(ConflictMode::Adjacent, 5.0), Signal::LongEntry);
        assert_eq!(resolve(ConflictMode::Opposite, 5.0), Signal::LongExit);
    }

    #[test]
    fn dir_conflict_modes() {
        let resolve = |mode, position| {
            resolve_signal(
                true,
                false,
                true,
                false,
                position,
                ConflictMode::Ignore,
                ConflictMode::Ignore,
                mode,
            )
        };
        assert_eq!(resolve(DirConflictMode::Ignore, 0.0), Signal::None);
        assert_eq!(resolve(DirConflictMode::Long, 0.0), Signal::LongEntry);
        assert_eq!(resolve(DirConflictMode::Short, 0.0), Signal::ShortEntry);
        assert_eq!(resolve(DirConflictMode::Adjacent, 5.0), Signal::LongEntry);
        assert_eq!(resolve(DirConflictMode::Adjacent, -5.0), Signal::ShortEntry);
        assert_eq!(resolve(DirConflictMode::Opposite, 5.0), Signal::ShortEntry);
        assert_eq!(resolve(DirConflictMode::Adjacent, 0.0), Signal::None);
    }

    #[test]
    fn exits_require_a_position() {
        let signal = resolve_signal(
            false,
            true,
            false,
            false,
            0.0,
            ConflictMode::Ignore,
            ConflictMode::Ignore,
            DirConflictMode::Ignore,
        );
        assert_eq!(signal, Signal::None);
    }

    // ── Signal-to-order mapping ──────────────────────────────────────

    fn base() -> Order {
        Order::default()
    }

    #[test]
    fn entry_while_long_respects_accumulation() {
        let none = signal_to_order(
            Signal::LongEntry,
            5.0,
            1.0,
            AccumulationMode::Disabled,
            OppositeEntryMode::Reverse,
            &base(),
        );
        assert!(none.is_none());

        let add = signal_to_order(
            Signal::LongEntry,
            5.0,
            1.0,
            AccumulationMode::AddOnly,
            OppositeEntryMode::Reverse,
            &base(),
        )
        .unwrap();
        assert_eq!(add.size, 1.0);
    }

    #[test]
    fn opposite_entry_modes_map_to_sizes() {
        // Short 4 units, long entry of size 10.
        let close = signal_to_order(
            Signal::LongEntry,
            -4.0,
            10.0,
            AccumulationMode::Disabled,
            OppositeEntryMode::Close,
            &base(),
        )
        .unwrap();
        assert_eq!(close.size_type, SizeType::TargetAmount);
        assert_eq!(close.size, 0.0);

        let reduce = signal_to_order(
            Signal::LongEntry,
            -4.0,
            10.0,
            AccumulationMode::Disabled,
            OppositeEntryMode::CloseReduce,
            &base(),
        )
        .unwrap();
        assert_eq!(reduce.size, 4.0);

        let reverse = signal_to_order(
            Signal::LongEntry,
            -4.0,
            10.0,
            AccumulationMode::Disabled,
            OppositeEntryMode::Reverse,
            &base(),
        )
        .unwrap();
        assert_eq!(reverse.size, 14.0);

        let ignore = signal_to_order(
            Signal::LongEntry,
            -4.0,
            10.0,
            AccumulationMode::Disabled,
            OppositeEntryMode::Ignore,
            &base(),
        );
        assert!(ignore.is_none());
    }

    #[test]
    fn exit_closes_fully_unless_removing() {
        let full = signal_to_order(
            Signal::LongExit,
            5.0,
            2.0,
            AccumulationMode::Disabled,
            OppositeEntryMode::Reverse,
            &base(),
        )
        .unwrap();
        assert_eq!(full.size, f64::NEG_INFINITY);
        assert_eq!(full.direction, Direction::LongOnly);

        let partial = signal_to_order(
            Signal::LongExit,
            5.0,
            2.0,
            AccumulationMode::RemoveOnly,
            OppositeEntryMode::Reverse,
            &base(),
        )
        .unwrap();
        assert_eq!(partial.size, -2.0);
    }

    // ── Stop evaluation ──────────────────────────────────────────────

    fn stop(init: f64, sl: f64, trail: bool, tp: f64) -> StopState {
        StopState {
            init_price: init,
            peak_price: init,
            init_row: 0,
            sl_stop: sl,
            sl_trail: trail,
            tp_stop: tp,
        }
    }

    fn hl_area(open: f64, high: f64, low: f64, close: f64) -> PriceArea {
        PriceArea {
            open,
            high,
            low,
            close,
        }
    }

    fn close_area(close: f64) -> PriceArea {
        PriceArea {
            open: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            close,
        }
    }

    #[test]
    fn sl_triggers_on_low_touch() {
        let s = stop(100.0, 0.1, false, f64::NAN);
        // Stop level 90: low touches it exactly.
        let hit = check_stop(&s, 1.0, &hl_area(95.0, 96.0, 90.0, 93.0), StopExitPrice::Stop);
        assert_eq!(hit.unwrap().exit_price, 90.0);

        // Low stays above: no trigger.
        let miss = check_stop(&s, 1.0, &hl_area(95.0, 96.0, 91.0, 93.0), StopExitPrice::Stop);
        assert!(miss.is_none());
    }

    #[test]
    fn close_only_stops_require_strict_crossing() {
        let s = stop(10.0, f64::NAN, false, 0.2);
        // Take-profit at exactly 12: a close of 12 is not a crossing.
        assert!(check_stop(&s, 1.0, &close_area(12.0), StopExitPrice::Stop).is_none());
        assert!(check_stop(&s, 1.0, &close_area(12.01), StopExitPrice::Stop).is_some());
    }

    #[test]
    fn gap_through_stop_exits_at_open() {
        let s = stop(100.0, 0.1, false, f64::NAN);
        // Opens at 85, well through the 90 stop.
        let hit = check_stop(&s, 1.0, &hl_area(85.0, 88.0, 84.0, 86.0), StopExitPrice::Stop);
        assert_eq!(hit.unwrap().exit_price, 85.0);
    }

    #[test]
    fn trailing_stop_ratchets_only_favorably() {
        let mut s = stop(100.0, 0.1, true, f64::NAN);
        ratchet_peak(&mut s, 1.0, &hl_area(101.0, 110.0, 99.0, 105.0));
        assert_eq!(s.peak_price, 110.0);
        // A lower bar does not pull the watermark back.
        ratchet_peak(&mut s, 1.0, &hl_area(104.0, 106.0, 95.0, 96.0));
        assert_eq!(s.peak_price, 110.0);

        // Short side ratchets downward.
        let mut s = stop(100.0, 0.1, true, f64::NAN);
        ratchet_peak(&mut s, -1.0, &hl_area(99.0, 101.0, 92.0, 95.0));
        assert_eq!(s.peak_price, 92.0);
    }

    #[test]
    fn short_stop_mirrors() {
        let s = stop(100.0, 0.1, false, f64::NAN);
        // Short stop-loss at 110: high touches.
        let hit = check_stop(&s, -1.0, &hl_area(105.0, 110.0, 104.0, 107.0), StopExitPrice::Stop);
        assert_eq!(hit.unwrap().exit_price, 110.0);

        // Short take-profit at 80.
        let s = stop(100.0, f64::NAN, false, 0.2);
        let hit = check_stop(&s, -1.0, &hl_area(85.0, 86.0, 79.0, 82.0), StopExitPrice::Stop);
        assert_eq!(hit.unwrap().exit_price, 80.0);
    }

    #[test]
    fn pierce_and_recover_still_triggers() {
        // The bar's low pierces the stop and the close recovers; with
        // high/low data the touch is what counts.
        let s = stop(100.0, 0.1, true, f64::NAN);
        let hit = check_stop(&s, 1.0, &hl_area(95.0, 97.0, 89.5, 96.5), StopExitPrice::Stop);
        assert_eq!(hit.unwrap().exit_price, 90.0);
    }

    // ── End-to-end ───────────────────────────────────────────────────

    #[test]
    fn longonly_entry_exit_round_trip() {
        // entries=[T,T,T,F,F], exits=[F,F,T,T,T]: one buy at 0 (conflict
        // at bar 2 resolves to Ignore), one sell at 3.
        let grid = PriceGrid::from_close_series(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let params = SimParams::ungrouped(1);
        let t = true;
        let f = false;
        let mut input = SignalsInput::from_entries_exits(
            FlexArray::PerRow(vec![t, t, t, f, f]),
            FlexArray::PerRow(vec![f, f, t, t, t]),
            Direction::LongOnly,
        );
        input.size = FlexArray::Scalar(1.0);

        let output = simulate_from_signals(&params, &grid, &input).unwrap();
        assert_eq!(output.order_records.len(), 2);
        assert_eq!(output.order_records[0].row, 0);
        assert_eq!(output.order_records[0].signed_size(), 1.0);
        assert_eq!(output.order_records[1].row, 3);
        assert_eq!(output.order_records[1].signed_size(), -1.0);
    }

    #[test]
    fn no_repeated_entries_without_exit() {
        let grid = PriceGrid::from_close_series(vec![1.0; 6]);
        let params = SimParams::ungrouped(1);
        let mut input = SignalsInput::from_entries_exits(
            FlexArray::Scalar(true),
            FlexArray::Scalar(false),
            Direction::LongOnly,
        );
        input.size = FlexArray::Scalar(1.0);
        let output = simulate_from_signals(&params, &grid, &input).unwrap();
        // Accumulation disabled: the first entry wins, the rest are muted.
        assert_eq!(output.order_records.len(), 1);
    }

    #[test]
    fn trailing_stop_exits_on_drawdown_from_peak() {
        // close=[10,11,12,11,10,9], entry at bar 0, 10% trailing stop.
        // Peak reaches 12 at bar 2, stop 10.8; bar 4 closes below it.
        let grid = PriceGrid::from_close_series(vec![10.0, 11.0, 12.0, 11.0, 10.0, 9.0]);
        let params = SimParams::ungrouped(1);
        let mut entries = vec![false; 6];
        entries[0] = true;
        let mut input = SignalsInput::from_entries_exits(
            FlexArray::PerRow(entries),
            FlexArray::Scalar(false),
            Direction::LongOnly,
        );
        input.size = FlexArray::Scalar(10.0);
        input.use_stops = true;
        input.sl_stop = FlexArray::Scalar(0.1);
        input.sl_trail = FlexArray::Scalar(true);
        input.tp_stop = FlexArray::Scalar(0.2);

        let output = simulate_from_signals(&params, &grid, &input).unwrap();
        assert_eq!(output.order_records.len(), 2);
        let exit = &output.order_records[1];
        assert_eq!(exit.row, 4);
        assert_eq!(exit.signed_size(), -10.0);
    }

    #[test]
    fn stop_beats_user_signal_under_stop_wins() {
        // Position entered at bar 0 @ 100; bar 1 crashes through the stop
        // while the user simultaneously signals a fresh entry.
        let grid = PriceGrid::from_close_series(vec![100.0, 80.0, 80.0]);
        let params = SimParams::ungrouped(1);
        let mut input = SignalsInput::from_entries_exits(
            FlexArray::PerRow(vec![true, true, false]),
            FlexArray::Scalar(false),
            Direction::LongOnly,
        );
        input.size = FlexArray::Scalar(1.0);
        input.use_stops = true;
        input.sl_stop = FlexArray::Scalar(0.1);

        let output = simulate_from_signals(&params, &grid, &input).unwrap();
        // Entry at 0, stop exit at 1; the bar-1 entry signal lost the tie.
        assert_eq!(output.order_records.len(), 2);
        assert_eq!(output.order_records[1].row, 1);
        assert_eq!(output.order_records[1].signed_size(), -1.0);
    }

    #[test]
    fn user_beats_stop_under_user_wins() {
        let grid = PriceGrid::from_close_series(vec![100.0, 80.0, 80.0]);
        let mut params = SimParams::ungrouped(1);
        // Leave room for the accumulation buy at bar 1.
        params.init_cash = crate::engine::config::InitCash::Same(1000.0);
        let mut input = SignalsInput::from_entries_exits(
            FlexArray::PerRow(vec![true, true, false]),
            FlexArray::Scalar(false),
            Direction::LongOnly,
        );
        input.size = FlexArray::Scalar(1.0);
        input.use_stops = true;
        input.sl_stop = FlexArray::Scalar(0.1);
        input.signal_priority = SignalPriority::UserWins;
        input.accumulate = FlexArray::Scalar(AccumulationMode::AddOnly);

        let output = simulate_from_signals(&params, &grid, &input).unwrap();
        // The bar-1 signal is an accumulation buy, not a stop exit.
        assert_eq!(output.order_records.len(), 2);
        assert_eq!(output.order_records[1].signed_size(), 1.0);
    }

    #[test]
    fn adjuster_can_move_the_stop() {
        struct Widen;
        impl StopAdjuster for Widen {
            fn adjust_sl(&mut self, _ctx: &StopContext) -> Option<(f64, bool)> {
                // Move the stop far out of reach.
                Some((0.9, false))
            }
        }

        let grid = PriceGrid::from_close_series(vec![100.0, 80.0, 80.0]);
        let params = SimParams::ungrouped(1);
        let mut entries = vec![false; 3];
        entries[0] = true;
        let mut input = SignalsInput::from_entries_exits(
            FlexArray::PerRow(entries),
            FlexArray::Scalar(false),
            Direction::LongOnly,
        );
        input.size = FlexArray::Scalar(1.0);
        input.use_stops = true;
        input.sl_stop = FlexArray::Scalar(0.1);

        let output =
            simulate_from_signals_with(&params, &grid, &input, &mut Widen).unwrap();
        // The 20% drop no longer reaches the widened 90% stop.
        assert_eq!(output.order_records.len(), 1);
    }

    #[test]
    fn reversal_flips_position_in_one_order() {
        let grid = PriceGrid::from_close_series(vec![10.0, 10.0, 10.0]);
        let mut params = SimParams::ungrouped(1);
        params.init_cash = crate::engine::config::InitCash::Same(100.0);
        let mut input = SignalsInput::from_entries_exits(
            FlexArray::PerRow(vec![true, false, false]),
            FlexArray::PerRow(vec![false, true, false]),
            Direction::Both,
        );
        input.size = FlexArray::Scalar(5.0);

        let output = simulate_from_signals(&params, &grid, &input).unwrap();
        assert_eq!(output.order_records.len(), 2);
        // Bar 1 reverses: close 5 long + open 5 short = sell 10.
        assert_eq!(output.order_records[1].signed_size(), -10.0);
    }
}
