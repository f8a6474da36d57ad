//! VectorLab Core — vectorized portfolio simulation kernel.
//!
//! This crate contains the heart of the backtesting engine:
//! - Tolerance-aware float math and flexible (broadcast-free) arrays
//! - Order, result, and record value types
//! - The single-order execution state machine (sizing, pricing, cash,
//!   debt, rejection)
//! - Column grouping with cash sharing and per-bar call sequences
//! - Three simulation drivers: pre-broadcast orders, signal streams with
//!   stop-loss/take-profit tracking, and user callbacks with hooks
//! - Derived series replayed from order records (assets, cash, value,
//!   returns, baselines)

pub mod call_seq;
pub mod derive;
pub mod domain;
pub mod engine;
pub mod error;
pub mod flex;
pub mod grouping;
pub mod math;
pub mod rng;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything a caller holds across threads is
    /// Send + Sync. Simulations are single-threaded inside, but callers
    /// fan out whole simulations across a pool.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Order>();
        require_sync::<domain::Order>();
        require_send::<domain::OrderResult>();
        require_sync::<domain::OrderResult>();
        require_send::<domain::OrderRecord>();
        require_sync::<domain::OrderRecord>();
        require_send::<domain::LogRecord>();
        require_sync::<domain::LogRecord>();
        require_send::<domain::SimState>();
        require_sync::<domain::SimState>();

        require_send::<grouping::Grouper>();
        require_sync::<grouping::Grouper>();
        require_send::<call_seq::CallSeq>();
        require_sync::<call_seq::CallSeq>();

        require_send::<engine::SimParams>();
        require_sync::<engine::SimParams>();
        require_send::<engine::SimOutput>();
        require_sync::<engine::SimOutput>();
        require_send::<engine::OrdersInput>();
        require_sync::<engine::OrdersInput>();
        require_send::<engine::SignalsInput>();
        require_sync::<engine::SignalsInput>();

        require_send::<error::SimulationError>();
        require_sync::<error::SimulationError>();
    }
}
