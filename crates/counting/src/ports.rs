//! Ports to the collaborators a count session depends on.
//!
//! The domain never calls these itself; the application layer resolves
//! lookups before deciding a command and fires notifications after the
//! resulting events are committed.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use stockcount_core::UserId;

use crate::ids::{CategoryId, LocationId, LotId, PackageId, ProductId, SessionId, WarehouseId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator rejected the request: {0}")]
    Rejected(String),
}

/// One on-hand tuple as reported by the inventory view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantityRecord {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub lot_id: Option<LotId>,
    pub package_id: Option<PackageId>,
    pub quantity: Decimal,
}

pub trait InventorySnapshotProvider: Send + Sync {
    fn list_quantities(
        &self,
        locations: &BTreeSet<LocationId>,
        include_zero: bool,
    ) -> Result<Vec<QuantityRecord>, PortError>;
}

pub trait LocationResolver: Send + Sync {
    /// Internal-usage locations of a warehouse.
    fn internal_locations(&self, warehouse: WarehouseId) -> Result<BTreeSet<LocationId>, PortError>;
}

pub trait ProductCatalog: Send + Sync {
    fn category_of(&self, product: ProductId) -> Result<Option<CategoryId>, PortError>;
}

pub trait CostProvider: Send + Sync {
    /// Unit standard cost at `as_of`; `None` when the product has none.
    fn standard_cost(&self, product: ProductId, as_of: NaiveDate) -> Result<Option<Decimal>, PortError>;
}

pub trait CategoryThresholdStore: Send + Sync {
    /// Accepted-difference KPI percentage of a category.
    fn kpi_threshold(&self, category: CategoryId) -> Result<Option<Decimal>, PortError>;
}

pub trait TaskAssigner: Send + Sync {
    fn assign_task(&self, user: UserId, summary: &str, note: &str) -> Result<(), PortError>;
}

pub trait AuditTrail: Send + Sync {
    fn append_message(
        &self,
        session: SessionId,
        author: UserId,
        timestamp: DateTime<Utc>,
        text: &str,
    ) -> Result<(), PortError>;
}

pub trait SessionNameGenerator: Send + Sync {
    fn next_session_name(&self) -> String;
}
