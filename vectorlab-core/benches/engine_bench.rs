//! Criterion benchmarks for the simulation kernel.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vectorlab_core::domain::order::SizeType;
use vectorlab_core::engine::config::{PriceGrid, SimParams};
use vectorlab_core::engine::from_orders::{simulate_from_orders, OrdersInput};
use vectorlab_core::engine::from_signals::{simulate_from_signals, SignalsInput};
use vectorlab_core::flex::FlexArray;
use vectorlab_core::grouping::Grouper;

fn synthetic_close(n_rows: usize, n_cols: usize) -> Vec<f64> {
    // Deterministic wavy prices; no RNG so runs are comparable.
    (0..n_rows * n_cols)
        .map(|i| 100.0 + 10.0 * ((i as f64) * 0.37).sin())
        .collect()
}

fn bench_from_orders(c: &mut Criterion) {
    let n_rows = 2_000;
    let n_cols = 20;
    let grid = PriceGrid::from_close(synthetic_close(n_rows, n_cols), n_rows, n_cols);
    let params = SimParams::ungrouped(n_cols);
    let input = OrdersInput::sized(FlexArray::Scalar(0.1), SizeType::TargetPercent);

    c.bench_function("from_orders_rebalance_2000x20", |b| {
        b.iter(|| {
            let output = simulate_from_orders(&params, &grid, black_box(&input)).unwrap();
            black_box(output.order_records.len())
        })
    });
}

fn bench_from_signals(c: &mut Criterion) {
    let n_rows = 2_000;
    let n_cols = 20;
    let grid = PriceGrid::from_close(synthetic_close(n_rows, n_cols), n_rows, n_cols);
    let params = SimParams::new(Grouper::single_group(n_cols), true);

    // Entries every 13 bars, exits every 7; stops active throughout.
    let entries: Vec<bool> = (0..n_rows).map(|r| r % 13 == 0).collect();
    let exits: Vec<bool> = (0..n_rows).map(|r| r % 7 == 0).collect();
    let mut input = SignalsInput::from_entries_exits(
        FlexArray::PerRow(entries),
        FlexArray::PerRow(exits),
        vectorlab_core::domain::order::Direction::LongOnly,
    );
    input.size = FlexArray::Scalar(1.0);
    input.use_stops = true;
    input.sl_stop = FlexArray::Scalar(0.05);
    input.sl_trail = FlexArray::Scalar(true);

    c.bench_function("from_signals_stops_2000x20", |b| {
        b.iter(|| {
            let output = simulate_from_signals(&params, &grid, black_box(&input)).unwrap();
            black_box(output.order_records.len())
        })
    });
}

criterion_group!(benches, bench_from_orders, bench_from_signals);
criterion_main!(benches);
