//! Property tests for kernel invariants.
//!
//! Uses proptest to verify, over randomized inputs:
//! 1. Asset replay — assets equal initial position plus summed fills
//! 2. Cash replay — wallet cash equals initial cash plus deposits and
//!    fill deltas
//! 3. Free cash never exceeds cash and debt never goes negative
//!    (observed through log records)
//! 4. Replay determinism — same inputs and seed, identical records
//! 5. Driver equivalence — a callback returning the same orders as a
//!    pre-broadcast grid produces identical records
//! 6. Signals with accumulation disabled never stack same-side entries

use proptest::prelude::*;
use vectorlab_core::call_seq::CallSeqMode;
use vectorlab_core::derive::Portfolio;
use vectorlab_core::domain::order::{Direction, Order, OrderSide};
use vectorlab_core::engine::config::{CallSeqSpec, InitCash, PriceGrid, SimParams};
use vectorlab_core::engine::context::{OrderContext, SimulationHooks};
use vectorlab_core::engine::from_order_fn::{simulate_with_hooks, IterOrder};
use vectorlab_core::engine::from_orders::{simulate_from_orders, OrdersInput};
use vectorlab_core::engine::from_signals::{simulate_from_signals, SignalsInput};
use vectorlab_core::flex::FlexArray;
use vectorlab_core::grouping::Grouper;
use vectorlab_core::math;

// ── Strategies ───────────────────────────────────────────────────────

fn arb_close(n: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0..100.0f64, n)
}

/// Sizes in units, some cells empty (NaN), buys and sells mixed.
fn arb_sizes(n: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(
        prop_oneof![
            3 => (-5.0..5.0f64).prop_map(|s| (s * 10.0).round() / 10.0),
            1 => Just(f64::NAN),
        ],
        n,
    )
}

fn arb_bools(n: usize) -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), n)
}

const T: usize = 12;

fn run_orders(close: &[f64], sizes: &[f64], seed: u64) -> (SimParams, PriceGrid, Portfolio) {
    let grid = PriceGrid::from_close_series(close.to_vec());
    let mut params = SimParams::ungrouped(1);
    params.init_cash = InitCash::Same(1_000.0);
    params.seed = seed;
    let input = OrdersInput::of_size(FlexArray::PerRow(sizes.to_vec()));
    let output = simulate_from_orders(&params, &grid, &input).unwrap();
    let pf = Portfolio::new(&params, &grid, output);
    (params, grid, pf)
}

// ── 1 & 2: record replay identities ──────────────────────────────────

proptest! {
    /// Assets at each bar equal the initial position plus every signed
    /// fill up to that bar.
    #[test]
    fn assets_replay_from_records(
        close in arb_close(T),
        sizes in arb_sizes(T),
    ) {
        let (_, _, pf) = run_orders(&close, &sizes, 0);
        let records = &pf.output().order_records;
        let held = pf.assets();
        for row in 0..T {
            let replayed: f64 = records
                .iter()
                .filter(|r| r.row <= row)
                .map(|r| r.signed_size())
                .sum();
            prop_assert!(
                math::is_close(held[row], replayed) || (held[row] - replayed).abs() < 1e-9,
                "row {row}: {} vs {}", held[row], replayed
            );
        }
    }

    /// Wallet cash at each bar equals initial cash plus fill deltas.
    #[test]
    fn cash_replay_from_records(
        close in arb_close(T),
        sizes in arb_sizes(T),
    ) {
        let (_, _, pf) = run_orders(&close, &sizes, 0);
        let records = &pf.output().order_records;
        let cash = pf.cash();
        for row in 0..T {
            let replayed: f64 = 1_000.0
                + records
                    .iter()
                    .filter(|r| r.row <= row)
                    .map(|r| r.cash_delta())
                    .sum::<f64>();
            prop_assert!(
                (cash[row] - replayed).abs() < 1e-6,
                "row {row}: {} vs {}", cash[row], replayed
            );
        }
    }
}

// ── 3: free cash and debt invariants via logs ────────────────────────

proptest! {
    #[test]
    fn free_cash_and_debt_invariants(
        close in arb_close(T),
        sizes in arb_sizes(T),
    ) {
        let grid = PriceGrid::from_close_series(close);
        let mut params = SimParams::ungrouped(1);
        params.init_cash = InitCash::Same(500.0);
        let mut input = OrdersInput::of_size(FlexArray::PerRow(sizes));
        input.log = FlexArray::Scalar(true);

        let output = simulate_from_orders(&params, &grid, &input).unwrap();
        for log in &output.log_records {
            prop_assert!(
                math::is_close_or_less(log.free_cash_after, log.cash_after),
                "free cash {} exceeds cash {} at row {}",
                log.free_cash_after, log.cash_after, log.row
            );
            prop_assert!(log.debt_after >= 0.0, "negative debt at row {}", log.row);
        }
    }
}

// ── 4: determinism ───────────────────────────────────────────────────

proptest! {
    /// Identical inputs and seed produce byte-identical records, even with
    /// random rejection and a random call sequence in play.
    #[test]
    fn replay_is_deterministic(
        close in arb_close(T),
        sizes in arb_sizes(T),
        seed in any::<u64>(),
    ) {
        let grid = PriceGrid::from_close(
            close.iter().flat_map(|&c| [c, c * 2.0]).collect(),
            T,
            2,
        );
        let mut params = SimParams::new(Grouper::single_group(2), true);
        params.seed = seed;
        params.call_seq = CallSeqSpec::Mode(CallSeqMode::Random);
        let mut input = OrdersInput::of_size(FlexArray::PerRow(sizes));
        input.reject_prob = FlexArray::Scalar(0.5);

        let a = simulate_from_orders(&params, &grid, &input).unwrap();
        let b = simulate_from_orders(&params, &grid, &input).unwrap();
        prop_assert_eq!(&a.order_records, &b.order_records);
        prop_assert_eq!(&a.call_seq, &b.call_seq);

        // A different seed is allowed to differ (and nearly always does);
        // determinism per seed is the property under test, so only the
        // equality above is asserted.
    }
}

// ── 5: driver equivalence ────────────────────────────────────────────

struct Replayer {
    sizes: Vec<f64>,
}

impl SimulationHooks for Replayer {
    fn order(&mut self, ctx: &OrderContext) -> Option<Order> {
        let size = self.sizes[ctx.row];
        (!size.is_nan()).then(|| Order::of_size(size))
    }
}

proptest! {
    /// A callback that emits exactly the pre-broadcast orders produces
    /// identical records.
    #[test]
    fn callback_matches_from_orders(
        close in arb_close(T),
        sizes in arb_sizes(T),
    ) {
        let grid = PriceGrid::from_close_series(close);
        let mut params = SimParams::ungrouped(1);
        params.init_cash = InitCash::Same(1_000.0);

        let by_grid = simulate_from_orders(
            &params,
            &grid,
            &OrdersInput::of_size(FlexArray::PerRow(sizes.clone())),
        )
        .unwrap();

        let mut hooks = Replayer { sizes };
        let by_callback =
            simulate_with_hooks(&params, &grid, &mut hooks, IterOrder::GroupMajor).unwrap();

        prop_assert_eq!(by_grid.order_records, by_callback.order_records);
    }
}

// ── 6: no stacked entries without an exit ────────────────────────────

proptest! {
    #[test]
    fn disabled_accumulation_alternates_sides(
        close in arb_close(T),
        entries in arb_bools(T),
        exits in arb_bools(T),
    ) {
        let grid = PriceGrid::from_close_series(close);
        let mut params = SimParams::ungrouped(1);
        params.init_cash = InitCash::Same(1_000.0);
        let mut input = SignalsInput::from_entries_exits(
            FlexArray::PerRow(entries),
            FlexArray::PerRow(exits),
            Direction::LongOnly,
        );
        input.size = FlexArray::Scalar(1.0);

        let output = simulate_from_signals(&params, &grid, &input).unwrap();
        let sides: Vec<OrderSide> =
            output.order_records.iter().map(|r| r.side).collect();
        for pair in sides.windows(2) {
            prop_assert_ne!(pair[0], pair[1], "two successive {:?} fills", pair[0]);
        }
    }
}
