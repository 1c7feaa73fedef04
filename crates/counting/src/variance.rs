//! Per-line variance and valuation.
//!
//! Everything here is a pure function of a line's stored inputs and the
//! owning session's state. Lines cache the result in a [`LineVariance`] and
//! recompute it whenever an input changes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::state::SessionState;

/// Above this absolute difference a zero-system line is a 100% variance;
/// at or below it the difference is treated as rounding noise.
pub const ZERO_SYSTEM_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// Inputs the variance of one line depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarianceInputs {
    pub state: SessionState,
    pub qty_system: Decimal,
    pub qty_counted: Decimal,
    pub qty_review_counted: Decimal,
    pub unit_cost: Decimal,
}

/// Derived quantities and values of one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LineVariance {
    pub qty_difference: Decimal,
    pub product_value_before: Decimal,
    pub net_difference_value: Decimal,
    /// Percentage with two decimals.
    pub variance_percentage: Decimal,
}

impl LineVariance {
    /// Derived values, or `None` when one of them leaves the `Decimal` range.
    pub fn try_compute(inputs: &VarianceInputs) -> Option<Self> {
        let qty_difference = qty_difference(
            inputs.state,
            inputs.qty_system,
            inputs.qty_counted,
            inputs.qty_review_counted,
        )?;
        Some(Self {
            qty_difference,
            product_value_before: inputs.qty_system.checked_mul(inputs.unit_cost)?,
            net_difference_value: qty_difference.checked_mul(inputs.unit_cost)?,
            variance_percentage: variance_percentage(inputs.qty_system, qty_difference)?,
        })
    }

    /// Infallible form used when applying accepted events.
    ///
    /// Sessions refuse inputs [`try_compute`](Self::try_compute) cannot
    /// represent, so the zero fallback is never reached for committed lines.
    pub fn compute(inputs: &VarianceInputs) -> Self {
        Self::try_compute(inputs).unwrap_or_default()
    }
}

/// Counted (or, once in review, reviewed) quantity minus system quantity.
pub fn qty_difference(
    state: SessionState,
    qty_system: Decimal,
    qty_counted: Decimal,
    qty_review_counted: Decimal,
) -> Option<Decimal> {
    if state.is_post_review() {
        qty_review_counted.checked_sub(qty_system)
    } else {
        qty_counted.checked_sub(qty_system)
    }
}

/// `|difference| / |system| × 100`, rounded to two decimals.
///
/// A zero system quantity never reaches the division: it yields 100 when the
/// difference exceeds [`ZERO_SYSTEM_TOLERANCE`], 0 otherwise.
pub fn variance_percentage(qty_system: Decimal, qty_difference: Decimal) -> Option<Decimal> {
    if !qty_system.is_zero() {
        let ratio = qty_difference.abs().checked_div(qty_system.abs())?;
        Some(ratio.checked_mul(Decimal::ONE_HUNDRED)?.round_dp(2))
    } else if qty_difference.abs() > ZERO_SYSTEM_TOLERANCE {
        Some(Decimal::ONE_HUNDRED)
    } else {
        Some(Decimal::ZERO)
    }
}

/// `(qty_review_counted - qty_system) * unit_cost`, independent of state.
pub fn review_difference_value(inputs: &VarianceInputs) -> Option<Decimal> {
    inputs
        .qty_review_counted
        .checked_sub(inputs.qty_system)?
        .checked_mul(inputs.unit_cost)
}
