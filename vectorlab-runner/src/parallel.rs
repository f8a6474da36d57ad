//! Parallel fan-out over group-aligned column chunks.
//!
//! Groups are the atomic unit of parallelism: columns in a group share a
//! wallet, so a partition of the column axis must land on group
//! boundaries. Each chunk runs as an independent simulation and the
//! record streams are stitched back with original column numbering.

use rayon::prelude::*;
use vectorlab_core::engine::config::{CallSeqSpec, InitCash, PriceGrid, SimOutput, SimParams};
use vectorlab_core::engine::from_orders::{simulate_from_orders, OrdersInput};
use vectorlab_core::error::SimulationError;

use std::ops::Range;

/// Split `n_groups` into at most `n_chunks` contiguous group spans of
/// near-equal column width.
pub fn chunk_groups(params: &SimParams, n_chunks: usize) -> Vec<Range<usize>> {
    let n_groups = params.grouper.n_groups();
    if n_groups == 0 || n_chunks == 0 {
        return Vec::new();
    }
    let n_chunks = n_chunks.min(n_groups);
    let per_chunk = n_groups.div_ceil(n_chunks);
    (0..n_groups)
        .step_by(per_chunk)
        .map(|start| start..(start + per_chunk).min(n_groups))
        .collect()
}

fn slice_init_cash(params: &SimParams, groups: &Range<usize>, cols: &Range<usize>) -> InitCash {
    match &params.init_cash {
        InitCash::Same(amount) => InitCash::Same(*amount),
        InitCash::PerWallet(amounts) => {
            let slice = if params.cash_sharing {
                amounts[groups.clone()].to_vec()
            } else {
                amounts[cols.clone()].to_vec()
            };
            InitCash::PerWallet(slice)
        }
        InitCash::Auto => InitCash::Auto,
        InitCash::AutoAlign => InitCash::AutoAlign,
    }
}

fn slice_params(params: &SimParams, groups: Range<usize>) -> (SimParams, Range<usize>) {
    let groups_start = groups.start;
    let cols =
        params.grouper.group_start(groups.start)..params.grouper.col_range(groups.end - 1).end;
    let wallet_range = if params.cash_sharing {
        groups.clone()
    } else {
        cols.clone()
    };
    let mut sliced = SimParams::new(params.grouper.slice_groups(groups.clone()), params.cash_sharing);
    sliced.init_cash = slice_init_cash(params, &groups, &cols);
    sliced.init_position = params.init_position[cols.clone()].to_vec();
    sliced.cash_deposits = params.cash_deposits.slice_cols(wallet_range);
    sliced.cash_earnings = params.cash_earnings.slice_cols(cols.clone());
    sliced.segment_mask = params.segment_mask.slice_cols(groups);
    sliced.call_seq = match &params.call_seq {
        CallSeqSpec::Mode(mode) => CallSeqSpec::Mode(*mode),
        // An explicit table spans the full grid; cut out this chunk's
        // columns (entries are in-group offsets, so no renumbering).
        CallSeqSpec::Table(table) => {
            let n_cols = params.grouper.n_cols();
            let n_rows = table.len() / n_cols.max(1);
            let width = cols.end - cols.start;
            let mut out = Vec::with_capacity(n_rows * width);
            for row in 0..n_rows {
                out.extend_from_slice(&table[row * n_cols + cols.start..row * n_cols + cols.end]);
            }
            CallSeqSpec::Table(out)
        }
    };
    sliced.val_price = params.val_price.slice_cols(cols.clone());
    sliced.update_value = params.update_value;
    sliced.ffill_val_price = params.ffill_val_price;
    sliced.max_orders = params.max_orders;
    sliced.max_logs = params.max_logs;
    sliced.seed = params.seed;
    sliced.col_offset = params.col_offset + cols.start;
    sliced.group_offset = params.group_offset + groups_start;
    (sliced, cols)
}

fn slice_grid(grid: &PriceGrid, cols: &Range<usize>) -> PriceGrid {
    PriceGrid {
        n_rows: grid.n_rows,
        n_cols: cols.end - cols.start,
        open: grid.open.slice_cols(cols.clone()),
        high: grid.high.slice_cols(cols.clone()),
        low: grid.low.slice_cols(cols.clone()),
        close: grid.close.slice_cols(cols.clone()),
    }
}

fn slice_orders(input: &OrdersInput, cols: &Range<usize>) -> OrdersInput {
    OrdersInput {
        size: input.size.slice_cols(cols.clone()),
        price: input.price.slice_cols(cols.clone()),
        size_type: input.size_type.slice_cols(cols.clone()),
        direction: input.direction.slice_cols(cols.clone()),
        fees: input.fees.slice_cols(cols.clone()),
        fixed_fees: input.fixed_fees.slice_cols(cols.clone()),
        slippage: input.slippage.slice_cols(cols.clone()),
        min_size: input.min_size.slice_cols(cols.clone()),
        max_size: input.max_size.slice_cols(cols.clone()),
        size_granularity: input.size_granularity.slice_cols(cols.clone()),
        reject_prob: input.reject_prob.slice_cols(cols.clone()),
        lock_cash: input.lock_cash.slice_cols(cols.clone()),
        allow_partial: input.allow_partial.slice_cols(cols.clone()),
        raise_reject: input.raise_reject.slice_cols(cols.clone()),
        log: input.log.slice_cols(cols.clone()),
        price_area_vio_mode: input.price_area_vio_mode.slice_cols(cols.clone()),
    }
}

/// Stitch chunk outputs back into one, restoring absolute column indices.
fn stitch(
    n_rows: usize,
    n_cols: usize,
    chunks: Vec<(Range<usize>, SimOutput)>,
) -> SimOutput {
    let mut order_records = Vec::new();
    let mut log_records = Vec::new();
    let mut call_seq = vec![0usize; n_rows * n_cols];
    let mut init_cash = Vec::new();
    let mut cash_earnings = vec![0.0; n_rows * n_cols];

    for (cols, output) in chunks {
        let offset = cols.start;
        let width = cols.end - cols.start;
        for mut record in output.order_records {
            record.col += offset;
            order_records.push(record);
        }
        for mut record in output.log_records {
            record.col += offset;
            log_records.push(record);
        }
        for row in 0..n_rows {
            for local in 0..width {
                call_seq[row * n_cols + offset + local] = output.call_seq[row * width + local];
                cash_earnings[row * n_cols + offset + local] =
                    output.cash_earnings[row * width + local];
            }
        }
        init_cash.extend(output.init_cash);
    }
    order_records.sort_by_key(|r| (r.col, r.id));
    log_records.sort_by_key(|r| (r.col, r.id));

    SimOutput {
        n_rows,
        n_cols,
        order_records,
        log_records,
        call_seq,
        init_cash,
        cash_earnings,
    }
}

/// Run a from-orders simulation split across `n_chunks` group-aligned
/// column chunks in parallel. Equivalent to the single-threaded run: the
/// per-column rejection streams are seeded by absolute column index, so
/// splitting cannot change any draw.
pub fn simulate_from_orders_chunked(
    params: &SimParams,
    grid: &PriceGrid,
    input: &OrdersInput,
    n_chunks: usize,
) -> Result<SimOutput, SimulationError> {
    let spans = chunk_groups(params, n_chunks);
    if spans.len() <= 1 {
        return simulate_from_orders(params, grid, input);
    }

    let results: Vec<Result<(Range<usize>, SimOutput), SimulationError>> = spans
        .into_par_iter()
        .map(|groups| {
            let (sub_params, cols) = slice_params(params, groups);
            let sub_grid = slice_grid(grid, &cols);
            let sub_input = slice_orders(input, &cols);
            let output = simulate_from_orders(&sub_params, &sub_grid, &sub_input)?;
            Ok((cols, output))
        })
        .collect();

    let mut chunks = Vec::with_capacity(results.len());
    for result in results {
        chunks.push(result?);
    }
    Ok(stitch(grid.n_rows, grid.n_cols, chunks))
}
