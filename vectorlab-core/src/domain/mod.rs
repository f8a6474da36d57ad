//! Domain value types: orders, results, records, and simulation state.

pub mod order;
pub mod records;
pub mod state;

pub use order::{
    Direction, Order, OrderResult, OrderSide, OrderStatus, PriceArea, PriceAreaVioMode, SizeType,
    StatusInfo,
};
pub use records::{LogRecord, OrderRecord, RecordBuffer};
pub use state::{ExecState, SimState};
