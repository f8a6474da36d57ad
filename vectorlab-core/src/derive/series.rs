//! Asset and cash series replayed from order records.
//!
//! Nothing here reads live simulation state: every series is a pure
//! function of the immutable records plus initial conditions, which is
//! what makes the record stream the engine's single source of truth.

use crate::domain::order::OrderSide;
use crate::domain::records::OrderRecord;
use crate::flex::FlexArray;
use crate::grouping::Grouper;
use crate::math;

/// Which part of the position flow to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowFilter {
    /// Signed flow of every fill.
    All,
    /// Only flow that builds or unwinds long exposure.
    LongOnly,
    /// Only flow that builds or unwinds short exposure (sign preserved:
    /// opening a short is negative flow).
    ShortOnly,
}

/// Per-cell signed position change, `T×N` row-major.
///
/// With a filter, a fill that crosses zero is split between its long and
/// short parts, so `LongOnly + ShortOnly == All` cell-wise.
pub fn asset_flow(
    n_rows: usize,
    n_cols: usize,
    records: &[OrderRecord],
    init_position: &[f64],
    filter: FlowFilter,
) -> Vec<f64> {
    let mut out = vec![0.0; n_rows * n_cols];
    let mut position: Vec<f64> = init_position.to_vec();
    for record in records {
        let before = position[record.col];
        let after = math::add(before, record.signed_size());
        position[record.col] = after;
        let flow = match filter {
            FlowFilter::All => record.signed_size(),
            FlowFilter::LongOnly => after.max(0.0) - before.max(0.0),
            FlowFilter::ShortOnly => after.min(0.0) - before.min(0.0),
        };
        out[record.row * n_cols + record.col] += flow;
    }
    out
}

/// Cumulative position per cell: `init_position` plus summed flow.
pub fn assets(
    n_rows: usize,
    n_cols: usize,
    asset_flow: &[f64],
    init_position: &[f64],
) -> Vec<f64> {
    let mut out = vec![0.0; n_rows * n_cols];
    for col in 0..n_cols {
        let mut running = init_position[col];
        for row in 0..n_rows {
            running = math::add(running, asset_flow[row * n_cols + col]);
            out[row * n_cols + col] = running;
        }
    }
    out
}

/// Boolean mask of cells holding a position.
pub fn position_mask(assets: &[f64]) -> Vec<bool> {
    assets.iter().map(|&a| a != 0.0).collect()
}

/// Fraction of bars each column spends in a position.
pub fn position_coverage(n_rows: usize, n_cols: usize, assets: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; n_cols];
    if n_rows == 0 {
        return out;
    }
    for col in 0..n_cols {
        let held = (0..n_rows)
            .filter(|row| assets[row * n_cols + col] != 0.0)
            .count();
        out[col] = held as f64 / n_rows as f64;
    }
    out
}

/// Per-cell cash delta from fills plus earnings, `T×N` row-major.
///
/// The free variant replays debt the way the kernel accounts it: opening a
/// short reserves twice its notional against free cash and covering
/// releases it, so the series matches the wallet's spendable cash rather
/// than its balance.
pub fn cash_flow(
    n_rows: usize,
    n_cols: usize,
    records: &[OrderRecord],
    cash_earnings: &[f64],
    init_position: &[f64],
    free: bool,
) -> Vec<f64> {
    debug_assert_eq!(cash_earnings.len(), n_rows * n_cols);
    let mut out = cash_earnings.to_vec();
    if !free {
        for record in records {
            out[record.row * n_cols + record.col] += record.cash_delta();
        }
        return out;
    }

    let mut position: Vec<f64> = init_position.to_vec();
    let mut debt = vec![0.0; n_cols];
    for record in records {
        let col = record.col;
        let before = position[col];
        let after = math::add(before, record.signed_size());
        position[col] = after;

        let mut delta = record.cash_delta();
        match record.side {
            OrderSide::Sell => {
                let short_opened = (-after.min(0.0)) - (-before.min(0.0));
                if short_opened > 0.0 {
                    let notional = short_opened * record.price;
                    debt[col] += notional;
                    delta -= 2.0 * notional;
                }
            }
            OrderSide::Buy => {
                if before < 0.0 {
                    let covered = record.size.min(-before);
                    let release = debt[col] * covered / -before;
                    debt[col] = math::add(debt[col], -release).max(0.0);
                    delta += 2.0 * release;
                }
            }
            OrderSide::None => {}
        }
        out[record.row * n_cols + col] += delta;
    }
    out
}

/// Wallet cash over time, `T×W` row-major (W = groups under cash sharing,
/// else columns).
pub fn cash(
    n_rows: usize,
    grouper: &Grouper,
    cash_sharing: bool,
    cash_flow: &[f64],
    init_cash: &[f64],
    cash_deposits: &FlexArray<f64>,
) -> Vec<f64> {
    let n_cols = grouper.n_cols();
    let flow: std::borrow::Cow<'_, [f64]> = if cash_sharing {
        std::borrow::Cow::Owned(grouper.sum_by_group(cash_flow, n_rows))
    } else {
        std::borrow::Cow::Borrowed(cash_flow)
    };
    let n_wallets = if cash_sharing {
        grouper.n_groups()
    } else {
        n_cols
    };
    let mut out = vec![0.0; n_rows * n_wallets];
    for wallet in 0..n_wallets {
        let mut running = init_cash[wallet];
        for row in 0..n_rows {
            running = math::add(running, cash_deposits.select(row, wallet));
            running = math::add(running, flow[row * n_wallets + wallet]);
            out[row * n_wallets + wallet] = running;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(row: usize, col: usize, size: f64, price: f64, side: OrderSide) -> OrderRecord {
        OrderRecord {
            id: 0,
            col,
            row,
            size,
            price,
            fees: 0.0,
            side,
        }
    }

    #[test]
    fn asset_flow_sums_signed_fills() {
        let records = vec![
            rec(0, 0, 10.0, 1.0, OrderSide::Buy),
            rec(2, 0, 4.0, 3.0, OrderSide::Sell),
        ];
        let flow = asset_flow(4, 1, &records, &[0.0], FlowFilter::All);
        assert_eq!(flow, vec![10.0, 0.0, -4.0, 0.0]);

        let held = assets(4, 1, &flow, &[0.0]);
        assert_eq!(held, vec![10.0, 10.0, 6.0, 6.0]);
    }

    #[test]
    fn flow_filter_splits_zero_crossings() {
        // Long 5, sell 8: 5 long flow out, 3 short flow in.
        let records = vec![
            rec(0, 0, 5.0, 1.0, OrderSide::Buy),
            rec(1, 0, 8.0, 1.0, OrderSide::Sell),
        ];
        let long = asset_flow(2, 1, &records, &[0.0], FlowFilter::LongOnly);
        let short = asset_flow(2, 1, &records, &[0.0], FlowFilter::ShortOnly);
        assert_eq!(long, vec![5.0, -5.0]);
        assert_eq!(short, vec![0.0, -3.0]);
        let all = asset_flow(2, 1, &records, &[0.0], FlowFilter::All);
        for i in 0..2 {
            assert!(math::is_close(all[i], long[i] + short[i]));
        }
    }

    #[test]
    fn position_coverage_counts_nonzero_bars() {
        let held = vec![10.0, 10.0, 0.0, 0.0];
        assert_eq!(position_coverage(4, 1, &held), vec![0.5]);
        assert_eq!(position_mask(&held), vec![true, true, false, false]);
    }

    #[test]
    fn cash_flow_signs_and_earnings() {
        let records = vec![
            rec(0, 0, 10.0, 1.0, OrderSide::Buy),
            rec(2, 0, 10.0, 3.0, OrderSide::Sell),
        ];
        let mut earnings = vec![0.0; 4];
        earnings[1] = 5.0;
        let flow = cash_flow(4, 1, &records, &earnings, &[0.0], false);
        assert_eq!(flow, vec![-10.0, 5.0, 30.0, 0.0]);
    }

    #[test]
    fn free_cash_flow_reserves_short_notional() {
        // Open a short of 2 @ 10: balance flow +20, free flow -20.
        let records = vec![rec(0, 0, 2.0, 10.0, OrderSide::Sell)];
        let plain = cash_flow(2, 1, &records, &[0.0; 2], &[0.0], false);
        let free = cash_flow(2, 1, &records, &[0.0; 2], &[0.0], true);
        assert_eq!(plain[0], 20.0);
        assert_eq!(free[0], -20.0);

        // Covering it releases the reserve.
        let records = vec![
            rec(0, 0, 2.0, 10.0, OrderSide::Sell),
            rec(1, 0, 2.0, 10.0, OrderSide::Buy),
        ];
        let free = cash_flow(2, 1, &records, &[0.0; 2], &[0.0], true);
        assert_eq!(free[1], 20.0);
    }

    #[test]
    fn cash_aggregates_groups_under_sharing() {
        let grouper = Grouper::single_group(2);
        // Two columns, one bar: one spends 30, the other earns 10.
        let flow = vec![-30.0, 10.0];
        let series = cash(1, &grouper, true, &flow, &[100.0], &FlexArray::Scalar(0.0));
        assert_eq!(series, vec![80.0]);
    }
}
