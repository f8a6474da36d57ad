//! Order intent, execution result, and the enum set shared by all drivers.

use serde::{Deserialize, Serialize};

/// How the `size` field of an [`Order`] is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeType {
    /// Number of units, signed by intent (positive buys, negative sells).
    Amount,
    /// Monetary value, converted to units at the valuation price.
    Value,
    /// Fraction of the available resource: cash for buys, the open
    /// position for sells.
    Percent,
    /// Desired final position in units; the delta is derived.
    TargetAmount,
    /// Desired final position value; converted via the valuation price.
    TargetValue,
    /// Desired final position value as a fraction of group value.
    TargetPercent,
}

impl SizeType {
    /// Whether this size type expresses a desired end state rather than a delta.
    pub fn is_target(self) -> bool {
        matches!(
            self,
            SizeType::TargetAmount | SizeType::TargetValue | SizeType::TargetPercent
        )
    }
}

/// Which position signs an order may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Position must stay >= 0.
    LongOnly,
    /// Position must stay <= 0. Positive sizes extend the short.
    ShortOnly,
    /// Any sign; a sign flip is resolved as close-then-open in one order.
    Both,
}

/// Side of an executed fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
    /// No fill happened (ignored or rejected orders).
    None,
}

/// Outcome class of an order attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Some quantity executed.
    Filled,
    /// The order was a no-op (NaN/zero size, nothing to do).
    Ignored,
    /// The order could not execute under the current constraints.
    Rejected,
}

/// Why an order was ignored or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusInfo {
    /// Size is NaN.
    SizeNan,
    /// Price is NaN.
    PriceNan,
    /// Valuation price is NaN or non-positive but required by the size type.
    InvalidValPrice,
    /// Group value is NaN but required by the size type.
    InvalidValue,
    /// Group value is zero or negative under a percent target.
    ValueZeroNeg,
    /// Requested size resolved to zero.
    SizeZero,
    /// Not enough (free) cash for any fill.
    NoCash,
    /// Sell requested with no open position to reduce.
    NoOpenPosition,
    /// The order would move the position against its direction constraint.
    OppositeDirection,
    /// Resolved size fell below `min_size`.
    MinSizeViolated,
    /// Resolved size exceeded `max_size` and partial fills are disallowed.
    MaxSizeExceeded,
    /// Slippage-adjusted price left the bar's price area.
    PriceAreaViolated,
    /// Rejected by the random rejection draw.
    RandomReject,
    /// Cash covers none of the fixed fees.
    CantCoverFees,
}

/// How a slippage-adjusted price outside `[low, high]` is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceAreaVioMode {
    /// Execute at the computed price regardless.
    Ignore,
    /// Clamp the price into the bar's range.
    Cap,
    /// Reject the order.
    Error,
}

/// OHLC bounds of the current bar. Any field may be NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceArea {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl PriceArea {
    /// A price area with every bound unknown.
    pub fn unknown() -> Self {
        Self {
            open: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            close: f64::NAN,
        }
    }

    /// Whether both high and low bounds are known.
    pub fn has_hl(&self) -> bool {
        !self.high.is_nan() && !self.low.is_nan()
    }
}

/// Trading intent for one (row, column) cell.
///
/// `price` uses two sentinels: `+inf` means "the current close" and `-inf`
/// means "the last valuation price".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub size: f64,
    pub price: f64,
    pub size_type: SizeType,
    pub direction: Direction,
    /// Proportional fee rate on fill value.
    pub fees: f64,
    /// Flat fee per executed order.
    pub fixed_fees: f64,
    /// Proportional price penalty: buys pay `price * (1 + slippage)`,
    /// sells receive `price * (1 - slippage)`.
    pub slippage: f64,
    /// Fills below this size are rejected.
    pub min_size: f64,
    /// Fills are capped at this size.
    pub max_size: f64,
    /// Fill sizes are truncated toward zero to a multiple of this (NaN
    /// disables).
    pub size_granularity: f64,
    /// Probability the order is rejected by the venue.
    pub reject_prob: f64,
    /// Forbid buys that would drive free cash below zero.
    pub lock_cash: bool,
    /// Permit filling less than requested; otherwise any shortfall rejects.
    pub allow_partial: bool,
    /// Promote a rejection to a simulation-aborting error.
    pub raise_reject: bool,
    /// Emit a log record for this attempt.
    pub log: bool,
    pub price_area_vio_mode: PriceAreaVioMode,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            size: f64::NAN,
            price: f64::INFINITY,
            size_type: SizeType::Amount,
            direction: Direction::Both,
            fees: 0.0,
            fixed_fees: 0.0,
            slippage: 0.0,
            min_size: 0.0,
            max_size: f64::INFINITY,
            size_granularity: f64::NAN,
            reject_prob: 0.0,
            lock_cash: false,
            allow_partial: true,
            raise_reject: false,
            log: false,
            price_area_vio_mode: PriceAreaVioMode::Ignore,
        }
    }
}

impl Order {
    /// A plain buy/sell of `size` units at the bar close.
    pub fn of_size(size: f64) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }
}

/// Result of one order attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    /// Executed size in units (always non-negative; see `side`).
    pub size: f64,
    /// Execution price after slippage and price-area handling.
    pub price: f64,
    /// Total fees charged (proportional + fixed).
    pub fees: f64,
    pub side: OrderSide,
    pub status: OrderStatus,
    /// Present for `Ignored` and `Rejected` outcomes.
    pub status_info: Option<StatusInfo>,
}

impl OrderResult {
    pub fn filled(size: f64, price: f64, fees: f64, side: OrderSide) -> Self {
        Self {
            size,
            price,
            fees,
            side,
            status: OrderStatus::Filled,
            status_info: None,
        }
    }

    pub fn ignored(info: StatusInfo) -> Self {
        Self {
            size: f64::NAN,
            price: f64::NAN,
            fees: f64::NAN,
            side: OrderSide::None,
            status: OrderStatus::Ignored,
            status_info: Some(info),
        }
    }

    pub fn rejected(info: StatusInfo) -> Self {
        Self {
            size: f64::NAN,
            price: f64::NAN,
            fees: f64::NAN,
            side: OrderSide::None,
            status: OrderStatus::Rejected,
            status_info: Some(info),
        }
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Executed size signed by side (negative for sells, zero otherwise).
    pub fn signed_size(&self) -> f64 {
        match self.side {
            OrderSide::Buy => self.size,
            OrderSide::Sell => -self.size,
            OrderSide::None => 0.0,
        }
    }
}
