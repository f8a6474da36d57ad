//! Value, return, and baseline series.

use crate::domain::records::OrderRecord;
use crate::flex::FlexArray;
use crate::grouping::Grouper;

/// Per-cell position value, `T×N`: `close · assets`, with the close forced
/// to zero wherever the column is flat so an untraded asset's NaN prices
/// cannot poison downstream sums.
pub fn asset_value(
    n_rows: usize,
    n_cols: usize,
    close: &FlexArray<f64>,
    assets: &[f64],
) -> Vec<f64> {
    let mut out = vec![0.0; n_rows * n_cols];
    for row in 0..n_rows {
        for col in 0..n_cols {
            let held = assets[row * n_cols + col];
            if held != 0.0 {
                out[row * n_cols + col] = held * close.select(row, col);
            }
        }
    }
    out
}

/// Wallet value over time, `T×W`: cash plus the group's asset value.
pub fn value(
    n_rows: usize,
    grouper: &Grouper,
    cash_sharing: bool,
    cash: &[f64],
    asset_value: &[f64],
) -> Vec<f64> {
    if cash_sharing {
        let grouped = grouper.sum_by_group(asset_value, n_rows);
        cash.iter().zip(grouped.iter()).map(|(c, a)| c + a).collect()
    } else {
        cash.iter()
            .zip(asset_value.iter())
            .map(|(c, a)| c + a)
            .collect()
    }
}

/// Initial wallet value: initial cash plus initial positions marked at the
/// first known close of each column.
pub fn init_value(
    n_rows: usize,
    grouper: &Grouper,
    cash_sharing: bool,
    close: &FlexArray<f64>,
    init_cash: &[f64],
    init_position: &[f64],
) -> Vec<f64> {
    let n_cols = grouper.n_cols();
    let first_close = |col: usize| {
        (0..n_rows)
            .map(|row| close.select(row, col))
            .find(|price| !price.is_nan())
            .unwrap_or(f64::NAN)
    };
    let mut out = init_cash.to_vec();
    for col in 0..n_cols {
        if init_position[col] != 0.0 {
            let wallet = if cash_sharing { grouper.group_of(col) } else { col };
            out[wallet] += init_position[col] * first_close(col);
        }
    }
    out
}

/// Per-bar simple returns of each wallet, deposit-adjusted:
/// `value_t / (value_{t-1} + deposits_t) - 1`, with `value_{-1}` the
/// initial value.
pub fn returns(
    n_rows: usize,
    n_wallets: usize,
    value: &[f64],
    init_value: &[f64],
    cash_deposits: &FlexArray<f64>,
) -> Vec<f64> {
    let mut out = vec![f64::NAN; n_rows * n_wallets];
    for wallet in 0..n_wallets {
        let mut prev = init_value[wallet];
        for row in 0..n_rows {
            let current = value[row * n_wallets + wallet];
            let base = prev + cash_deposits.select(row, wallet);
            out[row * n_wallets + wallet] = if base > 0.0 {
                current / base - 1.0
            } else {
                f64::NAN
            };
            prev = current;
        }
    }
    out
}

/// Buy-and-hold baseline, `T×W`: the initial wallet value split evenly
/// across the wallet's columns and held.
pub fn market_value(
    n_rows: usize,
    grouper: &Grouper,
    cash_sharing: bool,
    close: &FlexArray<f64>,
    init_value: &[f64],
) -> Vec<f64> {
    let n_cols = grouper.n_cols();
    let n_wallets = if cash_sharing {
        grouper.n_groups()
    } else {
        n_cols
    };
    let mut out = vec![0.0; n_rows * n_wallets];
    for wallet in 0..n_wallets {
        let cols: Vec<usize> = if cash_sharing {
            grouper.col_range(wallet).collect()
        } else {
            vec![wallet]
        };
        let slice = init_value[wallet] / cols.len() as f64;
        for &col in &cols {
            let first = (0..n_rows)
                .map(|row| close.select(row, col))
                .find(|p| !p.is_nan())
                .unwrap_or(f64::NAN);
            let mut last_price = first;
            for row in 0..n_rows {
                let price = close.select(row, col);
                if !price.is_nan() {
                    last_price = price;
                }
                out[row * n_wallets + wallet] += slice * last_price / first;
            }
        }
    }
    out
}

/// Per-bar returns of the buy-and-hold baseline.
pub fn market_returns(
    n_rows: usize,
    n_wallets: usize,
    market_value: &[f64],
    init_value: &[f64],
) -> Vec<f64> {
    returns(
        n_rows,
        n_wallets,
        market_value,
        init_value,
        &FlexArray::Scalar(0.0),
    )
}

/// Closed-form per-column profit: summed fill cash deltas plus the change
/// in position value between the first and last known closes. Walks the
/// records once instead of the whole grid.
pub fn total_profit(
    n_rows: usize,
    n_cols: usize,
    close: &FlexArray<f64>,
    records: &[OrderRecord],
    init_position: &[f64],
) -> Vec<f64> {
    let mut out = vec![0.0; n_cols];
    let mut position: Vec<f64> = init_position.to_vec();
    for record in records {
        out[record.col] += record.cash_delta();
        position[record.col] += record.signed_size();
    }
    for col in 0..n_cols {
        let last = (0..n_rows)
            .rev()
            .map(|row| close.select(row, col))
            .find(|p| !p.is_nan())
            .unwrap_or(f64::NAN);
        if position[col] != 0.0 {
            out[col] += position[col] * last;
        }
        if init_position[col] != 0.0 {
            let first = (0..n_rows)
                .map(|row| close.select(row, col))
                .find(|p| !p.is_nan())
                .unwrap_or(f64::NAN);
            out[col] -= init_position[col] * first;
        }
    }
    out
}
