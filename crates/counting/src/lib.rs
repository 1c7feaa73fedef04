//! `stockcount-counting` — the stock count review domain.
//!
//! A count session snapshots on-hand stock for a warehouse scope, collects
//! counted quantities, and walks a review/approval lifecycle. Everything here
//! is pure: lookups arrive through [`ports`] and are resolved by the caller
//! before a command is decided.

pub mod ids;
pub mod line;
pub mod ports;
pub mod refusal;
pub mod scope;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod totals;
pub mod variance;

pub use ids::{CategoryId, LineId, LocationId, LotId, PackageId, ProductId, SessionId, WarehouseId};
pub use line::{CountLine, SnapshotLine};
pub use ports::{
    AuditTrail, CategoryThresholdStore, CostProvider, InventorySnapshotProvider, LocationResolver,
    PortError, ProductCatalog, QuantityRecord, SessionNameGenerator, TaskAssigner,
};
pub use refusal::{RefusalAction, RefusalDecision};
pub use scope::{StockFilter, StockScope};
pub use session::{
    AGGREGATE_TYPE, AuditEntry, ProductCost, SessionCommand, SessionEvent, StockCountSession,
};
// Commands
pub use session::{
    AddAttendee, AnnotateLine, ApproveCount, AssignFinanceManager, ChangeScope, ConfirmRefusal,
    CreateSession, GenerateLines, RecordCount, RefreshCosts, RemoveAttendee, ReviseReviewCount,
    SubmitCount, ValidateCount,
};
// Events
pub use session::{
    AttendeeAdded, AttendeeRemoved, CostsRefreshed, CountRecorded, CountSubmitted,
    FinanceManagerAssigned, LineAnnotated, LinesGenerated, RecountRequested, RefusalLogged,
    ReviewCountRevised, ScopeChanged, SentForApproval, SessionApproved, SessionCreated,
    SessionRejected,
};
pub use snapshot::{SnapshotError, SnapshotGenerator};
pub use state::SessionState;
pub use totals::SessionTotals;
pub use variance::{LineVariance, VarianceInputs};
