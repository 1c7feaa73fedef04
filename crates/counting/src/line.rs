use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockcount_core::{Entity, UserId};

use crate::ids::{CategoryId, LineId, LocationId, LotId, PackageId, ProductId};
use crate::state::SessionState;
use crate::variance::{self, LineVariance, VarianceInputs};

/// One snapshot tuple, frozen when lines are generated.
///
/// This is the write-once part of a line: `qty_system`, the unit cost read at
/// the session's effective date, and the category KPI threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub line_id: LineId,
    pub product_id: ProductId,
    pub category_id: Option<CategoryId>,
    pub location_id: LocationId,
    pub lot_id: Option<LotId>,
    pub package_id: Option<PackageId>,
    pub qty_system: Decimal,
    pub unit_cost: Decimal,
    /// Accepted-difference KPI percentage of the product's category.
    pub kpi_threshold: Decimal,
}

/// A countable unit (product × location × lot × package) owned by a session.
///
/// Derived fields live in a cached [`LineVariance`]; every mutator recomputes
/// it, so the cache never disagrees with the inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLine {
    snapshot: SnapshotLine,
    qty_counted: Decimal,
    qty_review_counted: Decimal,
    /// Copy of the owning session's state.
    session_state: SessionState,
    scanned_by: Option<UserId>,
    scanned_at: Option<DateTime<Utc>>,
    barcode_scanned: Option<String>,
    note: Option<String>,
    variance: LineVariance,
}

impl CountLine {
    pub(crate) fn from_snapshot(snapshot: SnapshotLine, session_state: SessionState) -> Self {
        let mut line = Self {
            snapshot,
            qty_counted: Decimal::ZERO,
            qty_review_counted: Decimal::ZERO,
            session_state,
            scanned_by: None,
            scanned_at: None,
            barcode_scanned: None,
            note: None,
            variance: LineVariance::default(),
        };
        line.recompute();
        line
    }

    pub fn line_id(&self) -> LineId {
        self.snapshot.line_id
    }

    pub fn product_id(&self) -> ProductId {
        self.snapshot.product_id
    }

    pub fn category_id(&self) -> Option<CategoryId> {
        self.snapshot.category_id
    }

    pub fn location_id(&self) -> LocationId {
        self.snapshot.location_id
    }

    pub fn lot_id(&self) -> Option<LotId> {
        self.snapshot.lot_id
    }

    pub fn package_id(&self) -> Option<PackageId> {
        self.snapshot.package_id
    }

    pub fn qty_system(&self) -> Decimal {
        self.snapshot.qty_system
    }

    pub fn qty_counted(&self) -> Decimal {
        self.qty_counted
    }

    pub fn qty_review_counted(&self) -> Decimal {
        self.qty_review_counted
    }

    pub fn unit_cost(&self) -> Decimal {
        self.snapshot.unit_cost
    }

    pub fn kpi_threshold(&self) -> Decimal {
        self.snapshot.kpi_threshold
    }

    pub fn session_state(&self) -> SessionState {
        self.session_state
    }

    pub fn scanned_by(&self) -> Option<UserId> {
        self.scanned_by
    }

    pub fn scanned_at(&self) -> Option<DateTime<Utc>> {
        self.scanned_at
    }

    pub fn barcode_scanned(&self) -> Option<&str> {
        self.barcode_scanned.as_deref()
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn variance(&self) -> &LineVariance {
        &self.variance
    }

    pub fn qty_difference(&self) -> Decimal {
        self.variance.qty_difference
    }

    pub fn product_value_before(&self) -> Decimal {
        self.variance.product_value_before
    }

    pub fn net_difference_value(&self) -> Decimal {
        self.variance.net_difference_value
    }

    pub fn variance_percentage(&self) -> Decimal {
        self.variance.variance_percentage
    }

    /// Value of the review adjustment, computed straight from the reviewed
    /// quantity regardless of the cached state-dependent difference.
    pub fn review_difference_value(&self) -> Decimal {
        variance::review_difference_value(&self.variance_inputs()).unwrap_or_default()
    }

    /// The inputs the cached variance is derived from.
    pub fn variance_inputs(&self) -> VarianceInputs {
        VarianceInputs {
            state: self.session_state,
            qty_system: self.snapshot.qty_system,
            qty_counted: self.qty_counted,
            qty_review_counted: self.qty_review_counted,
            unit_cost: self.snapshot.unit_cost,
        }
    }

    pub(crate) fn record_count(
        &mut self,
        qty: Decimal,
        scanned_by: UserId,
        scanned_at: DateTime<Utc>,
        barcode: Option<String>,
    ) {
        self.qty_counted = qty;
        self.scanned_by = Some(scanned_by);
        self.scanned_at = Some(scanned_at);
        if barcode.is_some() {
            self.barcode_scanned = barcode;
        }
        self.recompute();
    }

    pub(crate) fn set_review_count(&mut self, qty: Decimal) {
        self.qty_review_counted = qty;
        self.recompute();
    }

    /// Freeze the counted quantity as the review baseline.
    pub(crate) fn seed_review_count(&mut self) {
        self.qty_review_counted = self.qty_counted;
        self.recompute();
    }

    pub(crate) fn set_note(&mut self, note: Option<String>) {
        self.note = note;
    }

    pub(crate) fn set_unit_cost(&mut self, unit_cost: Decimal) {
        self.snapshot.unit_cost = unit_cost;
        self.recompute();
    }

    pub(crate) fn set_session_state(&mut self, state: SessionState) {
        self.session_state = state;
        self.recompute();
    }

    fn recompute(&mut self) {
        self.variance = LineVariance::compute(&self.variance_inputs());
    }
}

impl Entity for CountLine {
    type Id = LineId;

    fn id(&self) -> &Self::Id {
        &self.snapshot.line_id
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn generated_line_starts_uncounted() {
        let line = CountLine::from_snapshot(snapshot(8, 2), SessionState::InProgress);
        assert_eq!(line.qty_counted(), Decimal::ZERO);
        assert_eq!(line.qty_difference(), Decimal::from(-8));
        assert_eq!(line.product_value_before(), Decimal::from(16));
        assert_eq!(line.variance_percentage(), Decimal::ONE_HUNDRED);
    }

    #[test]
    fn recording_a_count_stamps_scan_metadata() {
        let mut line = CountLine::from_snapshot(snapshot(5, 1), SessionState::InProgress);
        let operator = UserId::new();
        let at = Utc::now();
        line.record_count(Decimal::from(5), operator, at, Some("4006381333931".to_string()));

        assert_eq!(line.scanned_by(), Some(operator));
        assert_eq!(line.scanned_at(), Some(at));
        assert_eq!(line.barcode_scanned(), Some("4006381333931"));
        assert_eq!(line.qty_difference(), Decimal::ZERO);

        // a manual re-count keeps the last scanned barcode
        line.record_count(Decimal::from(6), operator, at, None);
        assert_eq!(line.barcode_scanned(), Some("4006381333931"));
    }

    #[test]
    fn in_progress_difference_ignores_review_quantity() {
        let line = line(SessionState::InProgress, 10, 12, 3, 1);
        assert_eq!(line.qty_difference(), Decimal::from(2));
    }

    #[test]
    fn post_review_difference_uses_review_quantity() {
        for state in [
            SessionState::Review,
            SessionState::Approval,
            SessionState::Done,
            SessionState::Rejected,
        ] {
            let line = line(state, 10, 12, 7, 1);
            assert_eq!(line.qty_difference(), Decimal::from(-3), "state {state}");
        }
    }

    #[test]
    fn cost_change_revalues_line() {
        let mut line = line(SessionState::InProgress, 10, 12, 0, 1);
        assert_eq!(line.net_difference_value(), Decimal::from(2));
        line.set_unit_cost(Decimal::from(25));
        assert_eq!(line.net_difference_value(), Decimal::from(50));
        assert_eq!(line.product_value_before(), Decimal::from(250));
    }

    #[test]
    fn seeding_copies_counted_into_review() {
        let mut line = line(SessionState::InProgress, 10, 12, 0, 1);
        line.seed_review_count();
        line.set_session_state(SessionState::Review);
        assert_eq!(line.qty_review_counted(), Decimal::from(12));
        assert_eq!(line.qty_difference(), Decimal::from(2));
    }
}
