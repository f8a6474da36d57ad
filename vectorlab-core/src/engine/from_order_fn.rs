//! Callback driver: the order for each call slot comes from user code.
//!
//! The driver is generic over a [`SimulationHooks`] implementation, so the
//! loop monomorphizes per strategy and default no-op hooks disappear. Two
//! variants: the strict one asks for one order per column per bar in
//! call-sequence order; the flexible one keeps asking until the callback
//! says `None`, so one segment can place several orders on one column.
//!
//! Automatic call sequencing is rejected here: the pre-sort would need the
//! orders before the callback produced them.

use crate::call_seq::CallSeqMode;
use crate::engine::config::{CallSeqSpec, PriceGrid, SimOutput, SimParams};
use crate::engine::context::{OrderContext, SegmentContext, SimulationHooks};
use crate::engine::core::SimCore;
use crate::error::SimulationError;

/// Which axis the outer loop walks.
///
/// Groups are independent wallets, so both orders produce identical
/// records; row-major exists for callbacks that accumulate per-row state
/// across groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IterOrder {
    /// All rows of group 0, then group 1, and so on.
    #[default]
    GroupMajor,
    /// All groups of row 0, then row 1, and so on.
    RowMajor,
}

fn check_call_seq(params: &SimParams) -> Result<(), SimulationError> {
    if params.call_seq == CallSeqSpec::Mode(CallSeqMode::Auto) {
        return Err(SimulationError::AutoCallSeqUnsupported);
    }
    Ok(())
}

fn segment_context<'a>(core: &'a SimCore, row: usize, group: usize) -> SegmentContext<'a> {
    let wallet = core.state.wallet(core.params.grouper.group_start(group), group);
    SegmentContext {
        row,
        group,
        cols: core.params.grouper.col_range(group),
        cash: core.state.cash[wallet],
        free_cash: core.state.free_cash[wallet],
        value: core.state.value[group],
        last_return: core.last_return[group],
        position: &core.state.position,
        debt: &core.state.debt,
        val_price: &core.state.val_price,
    }
}

fn order_context<'a>(
    core: &'a SimCore,
    row: usize,
    group: usize,
    col: usize,
    call_index: usize,
) -> OrderContext<'a> {
    OrderContext {
        row,
        col,
        group,
        call_index,
        state: core.state.exec_state(col, group),
        price_area: core.grid.price_area(row, col),
        records: core.order_records(col),
        last_return: core.last_return[group],
    }
}

/// Run one segment in strict mode: one order slot per column.
fn run_segment_strict<H: SimulationHooks>(
    core: &mut SimCore,
    hooks: &mut H,
    row: usize,
    group: usize,
) -> Result<(), SimulationError> {
    core.begin_segment(row, group);
    hooks.pre_segment(&segment_context(core, row, group));

    let grouper = &core.params.grouper;
    let start = grouper.group_start(group);
    for slot in 0..grouper.group_len(group) {
        let k = core.call_seq.segment(row, grouper, group)[slot];
        let col = start + k;
        let order = hooks.order(&order_context(core, row, group, col, slot));
        if let Some(order) = order {
            let result = core.exec_col(row, group, col, &order)?;
            hooks.post_order(&order_context(core, row, group, col, slot), &result);
        }
    }

    core.end_segment(row, group);
    hooks.post_segment(&segment_context(core, row, group));
    Ok(())
}

/// Run one segment in flexible mode: the callback picks the column and may
/// place any number of orders before yielding `None`.
fn run_segment_flex<H: SimulationHooks>(
    core: &mut SimCore,
    hooks: &mut H,
    row: usize,
    group: usize,
) -> Result<(), SimulationError> {
    core.begin_segment(row, group);
    hooks.pre_segment(&segment_context(core, row, group));

    let cols = core.params.grouper.col_range(group);
    let mut call_index = 0;
    loop {
        let produced = hooks.flex_order(&segment_context(core, row, group), call_index);
        let Some((col, order)) = produced else { break };
        if !cols.contains(&col) {
            return Err(SimulationError::ColumnOutOfGroup { col, group });
        }
        let result = core.exec_col(row, group, col, &order)?;
        hooks.post_order(&order_context(core, row, group, col, call_index), &result);
        call_index += 1;
    }

    core.end_segment(row, group);
    hooks.post_segment(&segment_context(core, row, group));
    Ok(())
}

fn drive<H: SimulationHooks>(
    params: &SimParams,
    grid: &PriceGrid,
    hooks: &mut H,
    iter_order: IterOrder,
    flexible: bool,
) -> Result<SimOutput, SimulationError> {
    check_call_seq(params)?;
    let mut core = SimCore::new(params, grid)?;
    let n_groups = params.grouper.n_groups();

    hooks.pre_simulation();
    let run = |core: &mut SimCore, hooks: &mut H, row: usize, group: usize| {
        if !core.segment_active(row, group) {
            return Ok(());
        }
        if flexible {
            run_segment_flex(core, hooks, row, group)
        } else {
            run_segment_strict(core, hooks, row, group)
        }
    };

    match iter_order {
        IterOrder::GroupMajor => {
            for group in 0..n_groups {
                hooks.pre_group(group);
                for row in 0..grid.n_rows {
                    hooks.pre_row(row);
                    run(&mut core, hooks, row, group)?;
                    hooks.post_row(row);
                }
                hooks.post_group(group);
            }
        }
        IterOrder::RowMajor => {
            for row in 0..grid.n_rows {
                hooks.pre_row(row);
                for group in 0..n_groups {
                    hooks.pre_group(group);
                    run(&mut core, hooks, row, group)?;
                    hooks.post_group(group);
                }
                hooks.post_row(row);
            }
        }
    }
    hooks.post_simulation();
    Ok(core.finish())
}

/// Strict callback simulation: one order per column per bar.
pub fn simulate_with_hooks<H: SimulationHooks>(
    params: &SimParams,
    grid: &PriceGrid,
    hooks: &mut H,
    iter_order: IterOrder,
) -> Result<SimOutput, SimulationError> {
    drive(params, grid, hooks, iter_order, false)
}

/// Flexible callback simulation: multi-order segments.
pub fn simulate_with_hooks_flex<H: SimulationHooks>(
    params: &SimParams,
    grid: &PriceGrid,
    hooks: &mut H,
    iter_order: IterOrder,
) -> Result<SimOutput, SimulationError> {
    drive(params, grid, hooks, iter_order, true)
}
