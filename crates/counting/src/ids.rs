//! Identifiers for count sessions, their lines, and the stock entities they
//! reference.

use stockcount_core::{AggregateId, uuid_newtype};

uuid_newtype! {
    /// Count session identifier (also the session's event-stream id).
    pub struct SessionId;
}

uuid_newtype! {
    /// Count line identifier, unique within the whole system.
    pub struct LineId;
}

uuid_newtype! {
    pub struct ProductId;
}

uuid_newtype! {
    /// Product category; carries the accepted-difference KPI threshold.
    pub struct CategoryId;
}

uuid_newtype! {
    pub struct WarehouseId;
}

uuid_newtype! {
    pub struct LocationId;
}

uuid_newtype! {
    /// Lot or serial number.
    pub struct LotId;
}

uuid_newtype! {
    pub struct PackageId;
}

impl SessionId {
    pub fn stream_id(&self) -> AggregateId {
        AggregateId::of(*self)
    }
}

impl From<AggregateId> for SessionId {
    fn from(value: AggregateId) -> Self {
        Self::from_uuid(value.into())
    }
}
