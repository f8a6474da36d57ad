//! VectorLab Runner — everything downstream of the kernel's records:
//! performance metrics, round-trip trade extraction, CSV artifacts, and
//! parallel fan-out over group-aligned column chunks.

pub mod export;
pub mod metrics;
pub mod parallel;
pub mod trades;

pub use metrics::{Metrics, MetricsConfig};
pub use trades::{extract_trades, TradeDirection, TradeRecord, TradeStatus};
