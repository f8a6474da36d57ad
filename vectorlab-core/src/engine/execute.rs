//! The single-order execution state machine.
//!
//! `execute_order` takes one column's state and one [`Order`] and produces
//! an [`OrderResult`] plus the state after the fill. It is a pure function
//! of its inputs (the rejection draw comes from a caller-owned generator):
//! drivers commit the returned state only on `Filled`, which makes the
//! commit atomic by construction.
//!
//! Sizing walks a fixed pipeline: resolve price sentinels, convert the
//! size type to a signed delta in units, clamp by direction, apply
//! slippage and the price-area rule, cap by `max_size`/cash/granularity,
//! check `min_size`, draw the random rejection, then mutate cash, position,
//! debt, and free cash together.

use crate::domain::order::{
    Direction, Order, OrderResult, OrderSide, PriceArea, PriceAreaVioMode, SizeType, StatusInfo,
};
use crate::domain::state::ExecState;
use crate::math;
use rand::rngs::StdRng;
use rand::Rng;

/// Malformed order configuration. Drivers wrap this with grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidField {
    pub field: &'static str,
    pub value: f64,
}

type ExecResult = Result<(OrderResult, ExecState), InvalidField>;

/// Execute one order against one column's state.
pub fn execute_order(
    state: &ExecState,
    order: &Order,
    area: &PriceArea,
    update_value: bool,
    rng: &mut StdRng,
) -> ExecResult {
    validate_statics(order)?;

    if order.size.is_nan() {
        return ignored(state, StatusInfo::SizeNan);
    }
    if order.price.is_nan() {
        return ignored(state, StatusInfo::PriceNan);
    }

    // Resolve price sentinels: +inf is the close, -inf the valuation price.
    let price = if order.price == f64::INFINITY {
        area.close
    } else if order.price == f64::NEG_INFINITY {
        state.val_price
    } else {
        order.price
    };
    if price.is_nan() {
        let info = if order.price == f64::NEG_INFINITY {
            StatusInfo::InvalidValPrice
        } else {
            StatusInfo::PriceNan
        };
        return ignored(state, info);
    }
    if price <= 0.0 {
        return Err(InvalidField {
            field: "price",
            value: price,
        });
    }

    // Size-type conversion: a signed delta in units, plus an optional
    // percent cap resolved inside the buy/sell leg.
    let (delta, percent) = match resolve_delta(state, order)? {
        Ok(pair) => pair,
        Err(result) => return Ok((result, *state)),
    };

    // Direction clamp.
    let delta = match clamp_direction(state, order, delta) {
        Ok(d) => d,
        Err(result) => return Ok((result, *state)),
    };

    if delta == 0.0 || math::is_close(delta, 0.0) {
        return ignored(state, StatusInfo::SizeZero);
    }

    let attempt = if delta > 0.0 {
        buy(state, order, area, delta, price, percent)
    } else {
        sell(state, order, area, -delta, price, percent)
    };
    let (result, mut new_state) = match attempt {
        Ok(pair) => pair,
        Err(result) => return Ok((result, *state)),
    };

    // Random venue rejection comes last: only orders that would otherwise
    // fill consume a draw, keeping the per-column stream aligned with the
    // record stream.
    if order.reject_prob > 0.0 && rng.gen::<f64>() < order.reject_prob {
        return Ok((OrderResult::rejected(StatusInfo::RandomReject), *state));
    }

    if update_value {
        new_state.val_price = result.price;
        new_state.value = new_state.cash + new_state.position * new_state.val_price;
    }
    Ok((result, new_state))
}

/// Approximate signed order value at the current valuation price.
///
/// Used by automatic call sequencing to run cash-releasing orders first.
/// Unknowable values (NaN inputs) rank as zero so they keep their slot.
pub fn approx_order_value(state: &ExecState, order: &Order) -> f64 {
    let mut size = order.size;
    if order.direction == Direction::ShortOnly {
        size = -size;
    }
    let holding = state.position * state.val_price;
    let value = match order.size_type {
        SizeType::Amount => size * state.val_price,
        SizeType::Value => size,
        SizeType::Percent => {
            if size >= 0.0 {
                size * state.free_cash.max(0.0)
            } else {
                size * holding.abs()
            }
        }
        SizeType::TargetAmount => size * state.val_price - holding,
        SizeType::TargetValue => size - holding,
        SizeType::TargetPercent => size * state.value - holding,
    };
    if value.is_nan() {
        0.0
    } else {
        value
    }
}

fn validate_statics(order: &Order) -> Result<(), InvalidField> {
    let checks: [(&'static str, f64, bool); 7] = [
        ("fees", order.fees, order.fees.is_nan() || order.fees < 0.0),
        (
            "fixed_fees",
            order.fixed_fees,
            order.fixed_fees.is_nan() || order.fixed_fees < 0.0,
        ),
        (
            "slippage",
            order.slippage,
            order.slippage.is_nan() || order.slippage < 0.0,
        ),
        (
            "min_size",
            order.min_size,
            order.min_size.is_nan() || order.min_size < 0.0,
        ),
        (
            "max_size",
            order.max_size,
            order.max_size.is_nan() || order.max_size <= 0.0,
        ),
        (
            "size_granularity",
            order.size_granularity,
            !order.size_granularity.is_nan() && order.size_granularity <= 0.0,
        ),
        (
            "reject_prob",
            order.reject_prob,
            order.reject_prob.is_nan() || !(0.0..=1.0).contains(&order.reject_prob),
        ),
    ];
    for (field, value, bad) in checks {
        if bad {
            return Err(InvalidField { field, value });
        }
    }
    Ok(())
}

fn ignored(state: &ExecState, info: StatusInfo) -> ExecResult {
    Ok((OrderResult::ignored(info), *state))
}

/// Convert the order's size type into a signed unit delta.
///
/// Returns `Err(result)` for outcomes decided here (ignored/rejected),
/// `Ok((delta, percent))` otherwise. `Percent` sizing resolves to a signed
/// infinity plus a cap applied inside the leg, since the affordable amount
/// depends on the slippage-adjusted price.
#[allow(clippy::type_complexity)]
fn resolve_delta(
    state: &ExecState,
    order: &Order,
) -> Result<Result<(f64, Option<f64>), OrderResult>, InvalidField> {
    let short_only = order.direction == Direction::ShortOnly;
    let size = if short_only { -order.size } else { order.size };

    let need_val_price = matches!(
        order.size_type,
        SizeType::Value | SizeType::TargetValue | SizeType::TargetPercent
    );
    if need_val_price && !(state.val_price > 0.0) {
        return Ok(Err(OrderResult::ignored(StatusInfo::InvalidValPrice)));
    }

    let delta = match order.size_type {
        SizeType::Amount => (size, None),
        SizeType::Value => (size / state.val_price, None),
        SizeType::Percent => {
            let pct = size.abs();
            if pct > 1.0 {
                return Err(InvalidField {
                    field: "size",
                    value: order.size,
                });
            }
            if pct == 0.0 || math::is_close(pct, 0.0) {
                (0.0, None)
            } else {
                (size.signum() * f64::INFINITY, Some(pct))
            }
        }
        SizeType::TargetAmount => (size - state.position, None),
        SizeType::TargetValue => (size / state.val_price - state.position, None),
        SizeType::TargetPercent => {
            if state.value.is_nan() {
                return Ok(Err(OrderResult::ignored(StatusInfo::InvalidValue)));
            }
            if state.value <= 0.0 {
                return Ok(Err(OrderResult::rejected(StatusInfo::ValueZeroNeg)));
            }
            (size * state.value / state.val_price - state.position, None)
        }
    };
    Ok(Ok(delta))
}

/// Clamp the delta so the resulting position respects the order direction.
fn clamp_direction(state: &ExecState, order: &Order, delta: f64) -> Result<f64, OrderResult> {
    match order.direction {
        Direction::Both => Ok(delta),
        Direction::LongOnly => {
            if delta >= 0.0 {
                return Ok(delta);
            }
            // Sells may only close the long.
            if state.position <= 0.0 || math::is_close(state.position, 0.0) {
                let info = if order.size_type.is_target() {
                    StatusInfo::OppositeDirection
                } else {
                    StatusInfo::NoOpenPosition
                };
                return Err(OrderResult::rejected(info));
            }
            Ok(delta.max(-state.position))
        }
        Direction::ShortOnly => {
            if delta <= 0.0 {
                return Ok(delta);
            }
            // Buys may only cover the short.
            if state.position >= 0.0 || math::is_close(state.position, 0.0) {
                let info = if order.size_type.is_target() {
                    StatusInfo::OppositeDirection
                } else {
                    StatusInfo::NoOpenPosition
                };
                return Err(OrderResult::rejected(info));
            }
            Ok(delta.min(-state.position))
        }
    }
}

/// Apply the price-area rule to a slippage-adjusted price.
fn check_price_area(
    adj_price: f64,
    area: &PriceArea,
    mode: PriceAreaVioMode,
) -> Result<f64, OrderResult> {
    if mode == PriceAreaVioMode::Ignore {
        return Ok(adj_price);
    }
    let mut price = adj_price;
    let above = !area.high.is_nan() && math::is_less(area.high, price);
    let below = !area.low.is_nan() && math::is_less(price, area.low);
    if above || below {
        match mode {
            PriceAreaVioMode::Cap => {
                if above {
                    price = area.high;
                }
                if below {
                    price = area.low;
                }
            }
            PriceAreaVioMode::Error => {
                return Err(OrderResult::rejected(StatusInfo::PriceAreaViolated));
            }
            PriceAreaVioMode::Ignore => unreachable!(),
        }
    }
    Ok(price)
}

/// Truncate a fill toward zero onto the granularity lattice.
fn apply_granularity(fill: f64, granularity: f64) -> f64 {
    if granularity.is_nan() || !fill.is_finite() {
        return fill;
    }
    let ratio = fill / granularity;
    let steps = if math::is_close(ratio, ratio.round()) {
        ratio.round()
    } else {
        ratio.floor()
    };
    steps * granularity
}

/// Largest buy size under `lock_cash`, accounting for capital released by
/// covering short debt (each covered unit frees twice its reserved value).
fn max_buy_under_lock(state: &ExecState, adj_price: f64, fees: f64, fixed_fees: f64) -> f64 {
    let unit_cost = adj_price * (1.0 + fees);
    let short_size = (-state.position).max(0.0);
    if short_size == 0.0 || state.debt == 0.0 {
        return ((state.free_cash - fixed_fees) / unit_cost).max(0.0);
    }
    let avg_debt_price = state.debt / short_size;
    // Free cash at the point the short is fully covered.
    let at_cover = state.free_cash + 2.0 * state.debt - short_size * unit_cost - fixed_fees;
    if at_cover >= 0.0 {
        // The whole short can be covered; the remainder funds the long leg.
        return short_size + at_cover / unit_cost;
    }
    // Covering only partially affordable.
    let slope = 2.0 * avg_debt_price - unit_cost;
    if slope >= 0.0 {
        // Covering frees more than it costs, yet the endpoint is negative:
        // free cash cannot even absorb the fixed fees.
        return 0.0;
    }
    ((state.free_cash - fixed_fees) / -slope).max(0.0)
}

fn buy(
    state: &ExecState,
    order: &Order,
    area: &PriceArea,
    size: f64,
    price: f64,
    percent: Option<f64>,
) -> Result<(OrderResult, ExecState), OrderResult> {
    let adj_price = price * (1.0 + order.slippage);
    let adj_price = check_price_area(adj_price, area, order.price_area_vio_mode)?;
    let unit_cost = adj_price * (1.0 + order.fees);

    // Affordable size given the cash constraint.
    let mut afford = if order.lock_cash {
        max_buy_under_lock(state, adj_price, order.fees, order.fixed_fees)
    } else if state.cash.is_infinite() {
        f64::INFINITY
    } else {
        ((state.cash - order.fixed_fees) / unit_cost).max(0.0)
    };
    if let Some(pct) = percent {
        afford *= pct;
    }
    if afford <= 0.0 || math::is_close(afford, 0.0) {
        let budget = if order.lock_cash {
            state.free_cash
        } else {
            state.cash
        };
        let info = if budget > 0.0 && budget <= order.fixed_fees {
            StatusInfo::CantCoverFees
        } else {
            StatusInfo::NoCash
        };
        return Err(OrderResult::rejected(info));
    }

    let mut fill = size;
    if fill > order.max_size {
        if !order.allow_partial {
            return Err(OrderResult::rejected(StatusInfo::MaxSizeExceeded));
        }
        fill = order.max_size;
    }
    if fill > afford {
        // An infinite request means "use everything", so the partial-fill
        // contract does not apply to it.
        if !order.allow_partial && size.is_finite() {
            return Err(OrderResult::rejected(StatusInfo::NoCash));
        }
        fill = afford;
    }
    fill = apply_granularity(fill, order.size_granularity);
    if fill <= 0.0 || math::is_close(fill, 0.0) {
        return Err(OrderResult::ignored(StatusInfo::SizeZero));
    }
    if order.min_size > 0.0 && math::is_less(fill, order.min_size) {
        return Err(OrderResult::rejected(StatusInfo::MinSizeViolated));
    }
    if !fill.is_finite() {
        // Infinite affordance (infinite cash) with an infinite request has
        // no meaningful fill size.
        return Err(OrderResult::rejected(StatusInfo::NoCash));
    }

    let fill_value = fill * adj_price;
    let fees_paid = fill_value * order.fees + order.fixed_fees;

    let cover = fill.min((-state.position).max(0.0));
    let debt_release = if cover > 0.0 && state.position < 0.0 {
        state.debt * cover / -state.position
    } else {
        0.0
    };

    let mut new_state = *state;
    new_state.cash = math::add(state.cash, -(fill_value + fees_paid));
    new_state.position = math::add(state.position, fill);
    new_state.debt = math::add(state.debt, -debt_release).max(0.0);
    new_state.free_cash =
        math::add(state.free_cash, 2.0 * debt_release - (fill_value + fees_paid));

    Ok((
        OrderResult::filled(fill, adj_price, fees_paid, OrderSide::Buy),
        new_state,
    ))
}

/// Largest short-opening size whose reserve the free cash can carry, given
/// the proceeds of the long-closing portion of the same fill.
fn max_short_open(
    state: &ExecState,
    adj_price: f64,
    fees: f64,
    fixed_fees: f64,
    cover_long: f64,
) -> f64 {
    let budget = state.free_cash + cover_long * adj_price * (1.0 - fees) - fixed_fees;
    (budget / (adj_price * (1.0 + fees))).max(0.0)
}

fn sell(
    state: &ExecState,
    order: &Order,
    area: &PriceArea,
    size: f64,
    price: f64,
    percent: Option<f64>,
) -> Result<(OrderResult, ExecState), OrderResult> {
    let adj_price = price * (1.0 - order.slippage);
    let adj_price = check_price_area(adj_price, area, order.price_area_vio_mode)?;

    let long_avail = state.position.max(0.0);
    let mut fill = size;

    if let Some(pct) = percent {
        fill = if long_avail > 0.0 {
            pct * long_avail
        } else {
            pct * max_short_open(state, adj_price, order.fees, order.fixed_fees, 0.0)
        };
    } else if !fill.is_finite() {
        // "Sell everything": close the long and short what free cash can
        // collateralize (nothing extra in long-only mode, which the
        // direction clamp has already applied).
        fill = long_avail + max_short_open(state, adj_price, order.fees, order.fixed_fees, long_avail);
    }

    if fill > order.max_size {
        if !order.allow_partial {
            return Err(OrderResult::rejected(StatusInfo::MaxSizeExceeded));
        }
        fill = order.max_size;
    }

    // Short-opening is bounded by free cash only under lock_cash.
    if order.lock_cash {
        let open_cap = max_short_open(
            state,
            adj_price,
            order.fees,
            order.fixed_fees,
            fill.min(long_avail),
        );
        let capped = fill.min(long_avail) + open_cap;
        if fill > capped {
            if !order.allow_partial && size.is_finite() {
                return Err(OrderResult::rejected(StatusInfo::NoCash));
            }
            fill = capped;
        }
    }

    fill = apply_granularity(fill, order.size_granularity);
    if fill <= 0.0 || math::is_close(fill, 0.0) {
        return Err(OrderResult::ignored(StatusInfo::SizeZero));
    }
    if order.min_size > 0.0 && math::is_less(fill, order.min_size) {
        return Err(OrderResult::rejected(StatusInfo::MinSizeViolated));
    }
    if !fill.is_finite() {
        return Err(OrderResult::rejected(StatusInfo::NoCash));
    }

    let proceeds = fill * adj_price;
    let fees_paid = proceeds * order.fees + order.fixed_fees;
    let new_cash = math::add(state.cash, proceeds - fees_paid);
    if math::is_less(new_cash, 0.0) && state.cash >= 0.0 {
        // Only fixed fees can turn a sell into a net debit.
        return Err(OrderResult::rejected(StatusInfo::CantCoverFees));
    }

    let short_open = (fill - long_avail).max(0.0);
    let debt_added = short_open * adj_price;

    let mut new_state = *state;
    new_state.cash = new_cash;
    new_state.position = math::add(state.position, -fill);
    new_state.debt = state.debt + debt_added;
    new_state.free_cash =
        math::add(state.free_cash, proceeds - fees_paid - 2.0 * debt_added);

    Ok((
        OrderResult::filled(fill, adj_price, fees_paid, OrderSide::Sell),
        new_state,
    ))
}
