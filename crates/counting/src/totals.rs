//! Session-level aggregation: a pure reduction over count lines.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::line::CountLine;
use crate::variance::{LineVariance, VarianceInputs, review_difference_value};

/// Signed totals of a session.
///
/// `diff_value_*` sum the lines' cached `net_difference_value`. The
/// `review_value_*` family is computed separately from
/// `(qty_review_counted - qty_system) * unit_cost` and only over lines whose
/// session state is review or later; the two agree once the whole session is
/// past review, but are kept apart so a transition window can show both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionTotals {
    pub line_count: usize,
    pub qty_counted_total: Decimal,
    pub qty_difference_total: Decimal,

    pub diff_qty_positive: Decimal,
    pub diff_qty_negative: Decimal,

    pub diff_value_positive: Decimal,
    pub diff_value_negative: Decimal,
    pub diff_value_net: Decimal,

    pub review_value_positive: Decimal,
    pub review_value_negative: Decimal,
    pub review_value_net: Decimal,
}

impl SessionTotals {
    /// Totals of accepted lines.
    ///
    /// Sessions check every change with [`try_from_inputs`](Self::try_from_inputs)
    /// before accepting it, so the zero fallback is never reached for
    /// committed lines.
    pub fn compute<'a>(lines: impl IntoIterator<Item = &'a CountLine>) -> Self {
        Self::try_from_inputs(lines.into_iter().map(CountLine::variance_inputs)).unwrap_or_default()
    }

    /// Reduce raw line inputs, or `None` when a line value or a running sum
    /// leaves the `Decimal` range.
    pub fn try_from_inputs(inputs: impl IntoIterator<Item = VarianceInputs>) -> Option<Self> {
        let mut totals = Self::default();

        for input in inputs {
            let variance = LineVariance::try_compute(&input)?;
            totals.line_count += 1;
            totals.qty_counted_total = totals.qty_counted_total.checked_add(input.qty_counted)?;

            let diff = variance.qty_difference;
            totals.qty_difference_total = totals.qty_difference_total.checked_add(diff)?;
            if diff > Decimal::ZERO {
                totals.diff_qty_positive = totals.diff_qty_positive.checked_add(diff)?;
            } else if diff < Decimal::ZERO {
                totals.diff_qty_negative = totals.diff_qty_negative.checked_add(diff)?;
            }

            let value = variance.net_difference_value;
            if value > Decimal::ZERO {
                totals.diff_value_positive = totals.diff_value_positive.checked_add(value)?;
            } else if value < Decimal::ZERO {
                totals.diff_value_negative = totals.diff_value_negative.checked_add(value)?;
            }

            if input.state.is_post_review() {
                let review_value = review_difference_value(&input)?;
                if review_value > Decimal::ZERO {
                    totals.review_value_positive = totals.review_value_positive.checked_add(review_value)?;
                } else if review_value < Decimal::ZERO {
                    totals.review_value_negative = totals.review_value_negative.checked_add(review_value)?;
                }
            }
        }

        totals.diff_value_net = totals.diff_value_positive.checked_add(totals.diff_value_negative)?;
        totals.review_value_net = totals
            .review_value_positive
            .checked_add(totals.review_value_negative)?;
        Some(totals)
    }
}
