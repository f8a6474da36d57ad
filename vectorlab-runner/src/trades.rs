//! Round-trip trade extraction from order records.
//!
//! A trade runs from the bar a column leaves flat to the bar it returns to
//! flat (or flips sign, which closes one trade and opens the next within a
//! single fill). Entry and exit legs are size-weighted averages, so
//! scale-ins and scale-outs collapse into one round trip.

use serde::{Deserialize, Serialize};
use vectorlab_core::domain::order::OrderSide;
use vectorlab_core::domain::records::OrderRecord;
use vectorlab_core::math;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDirection {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    /// Still holding at the end of the records.
    Open,
    Closed,
}

/// One round trip in one column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub col: usize,
    pub direction: TradeDirection,
    /// Total entered size in units (positive).
    pub size: f64,
    pub entry_row: usize,
    pub avg_entry_price: f64,
    pub entry_fees: f64,
    /// Last exit bar; meaningful only when closed.
    pub exit_row: usize,
    pub avg_exit_price: f64,
    pub exit_fees: f64,
    pub status: TradeStatus,
    /// Realized PnL of the closed portion, fees included.
    pub pnl: f64,
    /// PnL over entry notional of the closed portion.
    pub return_pct: f64,
    /// Bars from entry to exit (0 when opened and closed on one bar).
    pub duration: usize,
}

#[derive(Debug, Clone)]
struct OpenTrade {
    direction: TradeDirection,
    entry_row: usize,
    entry_size: f64,
    entry_notional: f64,
    entry_fees: f64,
    exit_row: usize,
    exit_size: f64,
    exit_notional: f64,
    exit_fees: f64,
}

impl OpenTrade {
    fn new(direction: TradeDirection, row: usize) -> Self {
        Self {
            direction,
            entry_row: row,
            entry_size: 0.0,
            entry_notional: 0.0,
            entry_fees: 0.0,
            exit_row: row,
            exit_size: 0.0,
            exit_notional: 0.0,
            exit_fees: 0.0,
        }
    }

    fn add_entry(&mut self, size: f64, price: f64, fees: f64) {
        self.entry_size += size;
        self.entry_notional += size * price;
        self.entry_fees += fees;
    }

    fn add_exit(&mut self, row: usize, size: f64, price: f64, fees: f64) {
        self.exit_row = row;
        self.exit_size += size;
        self.exit_notional += size * price;
        self.exit_fees += fees;
    }

    fn into_record(self, col: usize, status: TradeStatus) -> TradeRecord {
        let avg_entry = if self.entry_size > 0.0 {
            self.entry_notional / self.entry_size
        } else {
            f64::NAN
        };
        let avg_exit = if self.exit_size > 0.0 {
            self.exit_notional / self.exit_size
        } else {
            f64::NAN
        };
        let closed = self.exit_size.min(self.entry_size);
        let gross = match self.direction {
            TradeDirection::Long => (avg_exit - avg_entry) * closed,
            TradeDirection::Short => (avg_entry - avg_exit) * closed,
        };
        let pnl = if closed > 0.0 {
            gross - self.entry_fees - self.exit_fees
        } else {
            0.0
        };
        let entry_notional_closed = avg_entry * closed;
        let return_pct = if entry_notional_closed > 0.0 {
            pnl / entry_notional_closed
        } else {
            f64::NAN
        };
        TradeRecord {
            col,
            direction: self.direction,
            size: self.entry_size,
            entry_row: self.entry_row,
            avg_entry_price: avg_entry,
            entry_fees: self.entry_fees,
            exit_row: self.exit_row,
            avg_exit_price: avg_exit,
            exit_fees: self.exit_fees,
            status,
            pnl,
            return_pct,
            duration: self.exit_row.saturating_sub(self.entry_row),
        }
    }
}

/// Pair a column-sorted record stream into round-trip trades.
///
/// `init_position` seeds columns that start the simulation already in a
/// position (their entry price is unknown and reads as NaN).
pub fn extract_trades(
    n_cols: usize,
    records: &[OrderRecord],
    init_position: &[f64],
) -> Vec<TradeRecord> {
    let mut trades = Vec::new();
    let mut position = init_position.to_vec();
    let mut open: Vec<Option<OpenTrade>> = (0..n_cols)
        .map(|col| {
            (init_position[col] != 0.0).then(|| {
                let direction = if init_position[col] > 0.0 {
                    TradeDirection::Long
                } else {
                    TradeDirection::Short
                };
                let mut trade = OpenTrade::new(direction, 0);
                trade.entry_size = init_position[col].abs();
                trade.entry_notional = f64::NAN;
                trade
            })
        })
        .collect();

    for record in records {
        let col = record.col;
        let before = position[col];
        let after = math::add(before, record.signed_size());
        position[col] = after;

        let mut remaining = record.size;
        // Leg 1: the part of the fill that closes the open trade.
        if before != 0.0 {
            let trade = open[col].as_mut().expect("open position implies open trade");
            let closing = remaining.min(before.abs());
            let closes_entirely =
                math::is_close_or_less(before.abs(), remaining) || after == 0.0;
            if closing > 0.0 {
                let fee_share = record.fees * closing / record.size;
                trade.add_exit(record.row, closing, record.price, fee_share);
                remaining -= closing;
            }
            if closes_entirely {
                let finished = open[col].take().expect("just borrowed");
                trades.push(finished.into_record(col, TradeStatus::Closed));
            }
        }
        // Leg 2: the part that builds a position (fresh or flipped).
        if remaining > 0.0 && !math::is_close(remaining, 0.0) {
            let direction = match record.side {
                OrderSide::Buy => TradeDirection::Long,
                OrderSide::Sell => TradeDirection::Short,
                OrderSide::None => continue,
            };
            let trade = open[col].get_or_insert_with(|| OpenTrade::new(direction, record.row));
            let fee_share = record.fees * remaining / record.size;
            trade.add_entry(remaining, record.price, fee_share);
        }
    }

    for (col, trade) in open.into_iter().enumerate() {
        if let Some(trade) = trade {
            trades.push(trade.into_record(col, TradeStatus::Open));
        }
    }
    trades
}
