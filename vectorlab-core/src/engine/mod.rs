//! The simulation engine: execution state machine, shared driver core,
//! and the three drivers.

pub mod config;
pub mod context;
pub mod core;
pub mod execute;
pub mod from_order_fn;
pub mod from_orders;
pub mod from_signals;

pub use config::{CallSeqSpec, InitCash, PriceGrid, SimOutput, SimParams};
pub use context::{OrderContext, SegmentContext, SimulationHooks};
pub use execute::execute_order;
pub use from_order_fn::{simulate_with_hooks, simulate_with_hooks_flex, IterOrder};
pub use from_orders::{simulate_from_orders, OrdersInput};
pub use from_signals::{
    simulate_from_signals, simulate_from_signals_with, AccumulationMode, ConflictMode,
    DirConflictMode, NoStopAdjust, OppositeEntryMode, Signal, SignalPriority, SignalsInput,
    StopAdjuster, StopContext, StopEntryPrice, StopExitPrice,
};
