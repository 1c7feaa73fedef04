use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockcount_core::{DomainError, ValueObject};

use crate::ids::{LocationId, WarehouseId};

/// Which on-hand tuples become count lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockFilter {
    /// Only tuples with on-hand quantity strictly greater than zero.
    #[default]
    Available,
    /// Every matched tuple, whatever its quantity.
    IncludeZero,
}

impl StockFilter {
    pub fn includes_zero(self) -> bool {
        matches!(self, StockFilter::IncludeZero)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StockFilter::Available => "available",
            StockFilter::IncludeZero => "include_zero",
        }
    }
}

impl FromStr for StockFilter {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "available" => Ok(StockFilter::Available),
            "include_zero" => Ok(StockFilter::IncludeZero),
            other => Err(DomainError::validation(format!(
                "unknown stock filter '{other}' (expected 'available' or 'include_zero')"
            ))),
        }
    }
}

/// The slice of stock a session counts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StockScope {
    pub warehouse: Option<WarehouseId>,
    /// Narrows the count to one location instead of every internal location.
    pub location: Option<LocationId>,
    pub filter: StockFilter,
}

impl ValueObject for StockScope {}

impl StockScope {
    pub fn warehouse(warehouse: WarehouseId) -> Self {
        Self {
            warehouse: Some(warehouse),
            location: None,
            filter: StockFilter::default(),
        }
    }

    pub fn at_location(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_filter(mut self, filter: StockFilter) -> Self {
        self.filter = filter;
        self
    }

    /// The warehouse, or the user-facing error generation reports without one.
    pub fn require_warehouse(&self) -> Result<WarehouseId, DomainError> {
        self.warehouse
            .ok_or_else(|| DomainError::validation("please select a warehouse first"))
    }
}
