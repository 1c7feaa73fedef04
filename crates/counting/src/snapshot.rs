//! Snapshot generation: turn the on-hand inventory view into count lines.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use stockcount_core::DomainError;

use crate::ids::{CategoryId, LineId, LocationId, ProductId, WarehouseId};
use crate::line::SnapshotLine;
use crate::ports::{
    CategoryThresholdStore, CostProvider, InventorySnapshotProvider, LocationResolver, PortError,
    ProductCatalog,
};
use crate::scope::StockScope;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("please select a warehouse first")]
    MissingWarehouse,

    #[error("no internal locations found in warehouse {0}")]
    NoInternalLocations(WarehouseId),

    #[error("inventory lookup failed: {0}")]
    Inventory(PortError),
}

impl SnapshotError {
    /// The domain error a caller sees; provider failures have no domain
    /// equivalent and yield `None`.
    pub fn as_domain_error(&self) -> Option<DomainError> {
        match self {
            SnapshotError::MissingWarehouse | SnapshotError::NoInternalLocations(_) => {
                Some(DomainError::validation(self.to_string()))
            }
            SnapshotError::Inventory(_) => None,
        }
    }
}

/// Reads the collaborators needed to materialize a session's lines.
///
/// Generation is all-or-nothing: any inventory or location failure aborts
/// before a single line is produced. Cost and category lookups never abort;
/// a missing or failed lookup values the line at zero.
pub struct SnapshotGenerator<'a> {
    pub locations: &'a dyn LocationResolver,
    pub inventory: &'a dyn InventorySnapshotProvider,
    pub catalog: &'a dyn ProductCatalog,
    pub costs: &'a dyn CostProvider,
    pub thresholds: &'a dyn CategoryThresholdStore,
}

impl SnapshotGenerator<'_> {
    /// The explicit location when one is set, otherwise every internal
    /// location of the warehouse.
    pub fn resolve_locations(&self, scope: &StockScope) -> Result<BTreeSet<LocationId>, SnapshotError> {
        let warehouse = scope.warehouse.ok_or(SnapshotError::MissingWarehouse)?;

        if let Some(location) = scope.location {
            return Ok(BTreeSet::from([location]));
        }

        let locations = self
            .locations
            .internal_locations(warehouse)
            .map_err(SnapshotError::Inventory)?;
        if locations.is_empty() {
            return Err(SnapshotError::NoInternalLocations(warehouse));
        }
        Ok(locations)
    }

    pub fn generate(&self, scope: &StockScope, as_of: NaiveDate) -> Result<Vec<SnapshotLine>, SnapshotError> {
        let locations = self.resolve_locations(scope)?;
        let include_zero = scope.filter.includes_zero();

        let records = self
            .inventory
            .list_quantities(&locations, include_zero)
            .map_err(SnapshotError::Inventory)?;

        tracing::debug!(
            locations = locations.len(),
            records = records.len(),
            filter = scope.filter.as_str(),
            "resolved inventory snapshot"
        );

        let mut costs: BTreeMap<ProductId, Decimal> = BTreeMap::new();
        let mut categories: BTreeMap<ProductId, (Option<CategoryId>, Decimal)> = BTreeMap::new();

        let lines = records
            .into_iter()
            .filter(|r| locations.contains(&r.location_id))
            .filter(|r| include_zero || r.quantity > Decimal::ZERO)
            .map(|r| {
                let unit_cost = *costs
                    .entry(r.product_id)
                    .or_insert_with(|| unit_cost(self.costs, r.product_id, as_of));
                let (category_id, kpi_threshold) = *categories
                    .entry(r.product_id)
                    .or_insert_with(|| category_threshold(self.catalog, self.thresholds, r.product_id));

                SnapshotLine {
                    line_id: LineId::new(),
                    product_id: r.product_id,
                    category_id,
                    location_id: r.location_id,
                    lot_id: r.lot_id,
                    package_id: r.package_id,
                    qty_system: r.quantity,
                    unit_cost,
                    kpi_threshold,
                }
            })
            .collect();

        Ok(lines)
    }
}

/// Standard cost at `as_of`, zero when unknown or unavailable.
pub fn unit_cost(costs: &dyn CostProvider, product: ProductId, as_of: NaiveDate) -> Decimal {
    match costs.standard_cost(product, as_of) {
        Ok(Some(cost)) => cost,
        Ok(None) => Decimal::ZERO,
        Err(err) => {
            tracing::warn!(%product, %as_of, error = %err, "standard cost lookup failed; valuing at zero");
            Decimal::ZERO
        }
    }
}

/// Category of a product and its KPI threshold, zero when unknown or unavailable.
pub fn category_threshold(
    catalog: &dyn ProductCatalog,
    thresholds: &dyn CategoryThresholdStore,
    product: ProductId,
) -> (Option<CategoryId>, Decimal) {
    let category = match catalog.category_of(product) {
        Ok(category) => category,
        Err(err) => {
            tracing::warn!(%product, error = %err, "category lookup failed");
            None
        }
    };
    let threshold = category
        .map(|c| match thresholds.kpi_threshold(c) {
            Ok(threshold) => threshold.unwrap_or(Decimal::ZERO),
            Err(err) => {
                tracing::warn!(category = %c, error = %err, "kpi threshold lookup failed");
                Decimal::ZERO
            }
        })
        .unwrap_or(Decimal::ZERO);
    (category, threshold)
}
