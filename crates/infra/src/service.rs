//! The stock count action surface.
//!
//! Every action takes the tenant, the acting [`Actor`] and the session version
//! the caller last observed, dispatches one command through the
//! [`CommandDispatcher`], and returns the session as committed. Lookups
//! (snapshot, costs) run before the append; notifications (approval task,
//! audit message) run after it and never fail the committed action.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockcount_auth::{AccessPolicy, Actor, is_finance_manager};
use stockcount_core::{AggregateRoot, DomainError, ExpectedVersion, TenantId, UserId};
use stockcount_counting::snapshot::unit_cost;
use stockcount_counting::{
    AGGREGATE_TYPE, AddAttendee, AnnotateLine, ApproveCount, AssignFinanceManager, AuditTrail,
    CategoryThresholdStore, ChangeScope, ConfirmRefusal, CostProvider, CreateSession,
    GenerateLines, InventorySnapshotProvider, LineId, LocationId, LocationResolver, PortError,
    ProductCatalog, ProductCost, RecordCount, RefreshCosts, RefusalAction, RefusalDecision,
    RemoveAttendee, ReviseReviewCount, SessionCommand, SessionId, SessionNameGenerator,
    SnapshotError, SnapshotGenerator, StockCountSession, StockFilter, StockScope, SubmitCount,
    TaskAssigner, ValidateCount, WarehouseId,
};
use stockcount_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::StockCountConfig;
use crate::event_store::EventStore;

/// Summary of the task assigned to the finance manager on validation.
pub const APPROVAL_TASK_SUMMARY: &str = "Approve Stock Count";

/// Service-level error callers see.
#[derive(Debug, Error)]
pub enum StockCountError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Stale expected version or a concurrent transition won the race.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("stock count session not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Inventory or location lookup failed; nothing was committed.
    #[error("inventory lookup failed: {0}")]
    Provider(#[from] PortError),

    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl StockCountError {
    /// True for errors the acting user can fix by changing their input.
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, StockCountError::Validation(_))
    }
}

impl From<DispatchError> for StockCountError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Validation(msg) => StockCountError::Validation(msg),
            DispatchError::InvalidTransition(msg) => StockCountError::InvalidTransition(msg),
            DispatchError::Concurrency(msg) => StockCountError::Conflict(msg),
            DispatchError::InvariantViolation(msg) => StockCountError::Invariant(msg),
            DispatchError::Unauthorized => StockCountError::Unauthorized,
            DispatchError::NotFound => StockCountError::NotFound,
            other @ (DispatchError::TenantIsolation(_)
            | DispatchError::Deserialize(_)
            | DispatchError::Store(_)
            | DispatchError::Publish(_)) => StockCountError::Infrastructure(other.to_string()),
        }
    }
}

impl From<DomainError> for StockCountError {
    fn from(value: DomainError) -> Self {
        DispatchError::from(value).into()
    }
}

impl From<SnapshotError> for StockCountError {
    fn from(value: SnapshotError) -> Self {
        match value {
            SnapshotError::Inventory(err) => StockCountError::Provider(err),
            other => StockCountError::Validation(other.to_string()),
        }
    }
}

pub type SessionResult = Result<StockCountSession, StockCountError>;

/// Collaborators the service calls out to.
#[derive(Clone)]
pub struct StockCountPorts {
    pub locations: Arc<dyn LocationResolver>,
    pub inventory: Arc<dyn InventorySnapshotProvider>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub costs: Arc<dyn CostProvider>,
    pub thresholds: Arc<dyn CategoryThresholdStore>,
    pub tasks: Arc<dyn TaskAssigner>,
    pub audit: Arc<dyn AuditTrail>,
    pub names: Arc<dyn SessionNameGenerator>,
    pub access: Arc<dyn AccessPolicy>,
}

impl StockCountPorts {
    /// Wire every lookup port to one backend that serves them all.
    pub fn with_inventory<I>(
        inventory: Arc<I>,
        tasks: Arc<dyn TaskAssigner>,
        audit: Arc<dyn AuditTrail>,
        names: Arc<dyn SessionNameGenerator>,
        access: Arc<dyn AccessPolicy>,
    ) -> Self
    where
        I: LocationResolver
            + InventorySnapshotProvider
            + ProductCatalog
            + CostProvider
            + CategoryThresholdStore
            + 'static,
    {
        Self {
            locations: inventory.clone(),
            inventory: inventory.clone(),
            catalog: inventory.clone(),
            costs: inventory.clone(),
            thresholds: inventory,
            tasks,
            audit,
            names,
            access,
        }
    }

    fn snapshot_generator(&self) -> SnapshotGenerator<'_> {
        SnapshotGenerator {
            locations: self.locations.as_ref(),
            inventory: self.inventory.as_ref(),
            catalog: self.catalog.as_ref(),
            costs: self.costs.as_ref(),
            thresholds: self.thresholds.as_ref(),
        }
    }
}

/// Input of [`StockCountService::create_session`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewSession {
    /// Generated from the name sequence when absent or blank.
    pub name: Option<String>,
    pub warehouse: Option<WarehouseId>,
    pub location: Option<LocationId>,
    /// Falls back to the configured default filter.
    pub filter: Option<StockFilter>,
    /// Date standard costs are read at; today when absent.
    pub effective_date: Option<NaiveDate>,
    pub note: Option<String>,
}

pub struct StockCountService<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    ports: StockCountPorts,
    config: StockCountConfig,
}

impl<S, B> StockCountService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>, ports: StockCountPorts, config: StockCountConfig) -> Self {
        Self {
            dispatcher,
            ports,
            config,
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    pub fn config(&self) -> &StockCountConfig {
        &self.config
    }

    /// Current state of a session.
    pub fn session(&self, tenant_id: TenantId, session_id: SessionId) -> SessionResult {
        let session = self
            .dispatcher
            .load(tenant_id, session_id.stream_id(), |_, a| StockCountSession::empty(a.into()))?;
        if !session.is_created() {
            return Err(StockCountError::NotFound);
        }
        Ok(session)
    }

    pub fn create_session(&self, tenant_id: TenantId, actor: &Actor, new: NewSession) -> SessionResult {
        let name = new
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.ports.names.next_session_name());
        let scope = StockScope {
            warehouse: new.warehouse,
            location: new.location,
            filter: new.filter.unwrap_or(self.config.default_stock_filter),
        };
        let now = Utc::now();
        let session_id = SessionId::new();

        let command = SessionCommand::CreateSession(CreateSession {
            tenant_id,
            session_id,
            name,
            owner: actor.user_id,
            scope,
            effective_date: new.effective_date.unwrap_or_else(|| now.date_naive()),
            note: new.note,
            occurred_at: now,
        });
        self.execute(tenant_id, actor, session_id, ExpectedVersion::Exact(0), command)
    }

    /// Replace the scope of a draft or rejected session. Existing lines stay
    /// until the next generation.
    pub fn change_scope(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
        scope: StockScope,
    ) -> SessionResult {
        let command = SessionCommand::ChangeScope(ChangeScope {
            tenant_id,
            session_id,
            scope,
            occurred_at: Utc::now(),
        });
        self.execute(tenant_id, actor, session_id, expected, command)
    }

    /// Set (`Some`) or clear (`None`) the finance manager.
    pub fn assign_finance_manager(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
        finance_manager: Option<UserId>,
    ) -> SessionResult {
        let command = SessionCommand::AssignFinanceManager(AssignFinanceManager {
            tenant_id,
            session_id,
            finance_manager,
            occurred_at: Utc::now(),
        });
        self.execute(tenant_id, actor, session_id, expected, command)
    }

    pub fn add_attendee(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
        user: UserId,
    ) -> SessionResult {
        let command = SessionCommand::AddAttendee(AddAttendee {
            tenant_id,
            session_id,
            user,
            occurred_at: Utc::now(),
        });
        self.execute(tenant_id, actor, session_id, expected, command)
    }

    pub fn remove_attendee(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
        user: UserId,
    ) -> SessionResult {
        let command = SessionCommand::RemoveAttendee(RemoveAttendee {
            tenant_id,
            session_id,
            user,
            occurred_at: Utc::now(),
        });
        self.execute(tenant_id, actor, session_id, expected, command)
    }

    /// Pull a fresh inventory snapshot into the session.
    ///
    /// **Data-losing**: every existing line, with its counted and reviewed
    /// quantities, is discarded and replaced. Either the whole new line set is
    /// committed or nothing is.
    pub fn generate_lines(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
    ) -> SessionResult {
        let current = self.session(tenant_id, session_id)?;
        expected.check(current.version())?;
        current.ensure_can_generate()?;

        let as_of = effective_date(&current);
        let lines = self
            .ports
            .snapshot_generator()
            .generate(current.scope(), as_of)?;

        let command = SessionCommand::GenerateLines(GenerateLines {
            tenant_id,
            session_id,
            lines,
            occurred_at: Utc::now(),
        });
        // Pin the version the snapshot was resolved against.
        self.execute(
            tenant_id,
            actor,
            session_id,
            ExpectedVersion::Exact(current.version()),
            command,
        )
    }

    /// Record the counted quantity of a line; the actor is stamped as scanner.
    #[allow(clippy::too_many_arguments)]
    pub fn record_count(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
        line_id: LineId,
        qty_counted: Decimal,
        barcode: Option<String>,
    ) -> SessionResult {
        let command = SessionCommand::RecordCount(RecordCount {
            tenant_id,
            session_id,
            line_id,
            qty_counted,
            scanned_by: actor.user_id,
            barcode,
            occurred_at: Utc::now(),
        });
        self.execute(tenant_id, actor, session_id, expected, command)
    }

    pub fn revise_review_count(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
        line_id: LineId,
        qty_review_counted: Decimal,
    ) -> SessionResult {
        let command = SessionCommand::ReviseReviewCount(ReviseReviewCount {
            tenant_id,
            session_id,
            line_id,
            qty_review_counted,
            occurred_at: Utc::now(),
        });
        self.execute(tenant_id, actor, session_id, expected, command)
    }

    pub fn annotate_line(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
        line_id: LineId,
        note: Option<String>,
    ) -> SessionResult {
        let command = SessionCommand::AnnotateLine(AnnotateLine {
            tenant_id,
            session_id,
            line_id,
            note,
            occurred_at: Utc::now(),
        });
        self.execute(tenant_id, actor, session_id, expected, command)
    }

    /// Re-read the standard cost of every product on the session at its
    /// effective date and revalue the lines.
    pub fn refresh_costs(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
    ) -> SessionResult {
        let current = self.session(tenant_id, session_id)?;
        expected.check(current.version())?;

        let as_of = effective_date(&current);
        let costs = current
            .products()
            .into_iter()
            .map(|product_id| ProductCost {
                product_id,
                unit_cost: unit_cost(self.ports.costs.as_ref(), product_id, as_of),
            })
            .collect();

        let command = SessionCommand::RefreshCosts(RefreshCosts {
            tenant_id,
            session_id,
            costs,
            occurred_at: Utc::now(),
        });
        self.execute(
            tenant_id,
            actor,
            session_id,
            ExpectedVersion::Exact(current.version()),
            command,
        )
    }

    pub fn submit_count(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
    ) -> SessionResult {
        let command = SessionCommand::SubmitCount(SubmitCount {
            tenant_id,
            session_id,
            occurred_at: Utc::now(),
        });
        self.execute(tenant_id, actor, session_id, expected, command)
    }

    /// Send a reviewed count for approval and assign the approval task to the
    /// finance manager.
    pub fn validate(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
    ) -> SessionResult {
        let command = SessionCommand::ValidateCount(ValidateCount {
            tenant_id,
            session_id,
            occurred_at: Utc::now(),
        });
        let session = self.execute(tenant_id, actor, session_id, expected, command)?;

        if let Some(finance_manager) = session.finance_manager() {
            let note = format!("Stock Count {} needs approval.", session.name());
            if let Err(err) = self
                .ports
                .tasks
                .assign_task(finance_manager, APPROVAL_TASK_SUMMARY, &note)
            {
                tracing::error!(
                    tenant_id = %tenant_id,
                    session_id = %session_id,
                    finance_manager = %finance_manager,
                    error = %err,
                    "failed to assign approval task"
                );
            }
        }
        Ok(session)
    }

    pub fn approve(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
    ) -> SessionResult {
        let command = SessionCommand::ApproveCount(ApproveCount {
            tenant_id,
            session_id,
            approved_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        self.execute(tenant_id, actor, session_id, expected, command)
    }

    /// Send the session back to counting; counted figures are kept.
    pub fn request_recount(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
        reason: &str,
    ) -> SessionResult {
        let decision = RefusalDecision::new(session_id, reason, RefusalAction::Recount, actor.user_id)?;
        self.confirm_refusal(tenant_id, actor, expected, decision)
    }

    pub fn reject(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
        reason: &str,
    ) -> SessionResult {
        let decision = RefusalDecision::new(session_id, reason, RefusalAction::Reject, actor.user_id)?;
        self.confirm_refusal(tenant_id, actor, expected, decision)
    }

    /// Apply a refusal decision, then forward its audit entry to the audit
    /// trail.
    pub fn confirm_refusal(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        expected: ExpectedVersion,
        decision: RefusalDecision,
    ) -> SessionResult {
        let session_id = decision.session_id();
        let command = SessionCommand::ConfirmRefusal(ConfirmRefusal {
            tenant_id,
            decision,
            occurred_at: Utc::now(),
        });
        let session = self.execute(tenant_id, actor, session_id, expected, command)?;

        if let Some(entry) = session.audit_log().last() {
            if let Err(err) =
                self.ports
                    .audit
                    .append_message(session_id, entry.author, entry.recorded_at, &entry.text)
            {
                tracing::error!(
                    tenant_id = %tenant_id,
                    session_id = %session_id,
                    error = %err,
                    "failed to post refusal to the audit trail"
                );
            }
        }
        Ok(session)
    }

    /// Whether `actor` is this session's finance manager and a member of the
    /// finance-manager group.
    pub fn is_finance_manager(
        &self,
        tenant_id: TenantId,
        session_id: SessionId,
        actor: &Actor,
    ) -> Result<bool, StockCountError> {
        let session = self.session(tenant_id, session_id)?;
        Ok(is_finance_manager(
            self.ports.access.as_ref(),
            actor,
            session.finance_manager(),
        ))
    }

    fn execute(
        &self,
        tenant_id: TenantId,
        actor: &Actor,
        session_id: SessionId,
        expected: ExpectedVersion,
        command: SessionCommand,
    ) -> SessionResult {
        let action = command.action();
        let committed = self
            .dispatcher
            .dispatch(
                tenant_id,
                session_id.stream_id(),
                AGGREGATE_TYPE,
                expected,
                command,
                |_, a| StockCountSession::empty(a.into()),
            )
            .map_err(|err| {
                tracing::debug!(
                    tenant_id = %tenant_id,
                    session_id = %session_id,
                    action,
                    error = %err,
                    "stock count action refused"
                );
                StockCountError::from(err)
            })?;

        if let Some(version) = committed.version() {
            tracing::info!(
                tenant_id = %tenant_id,
                session_id = %session_id,
                actor = %actor.user_id,
                action,
                version,
                state = %committed.aggregate.state(),
                "stock count session updated"
            );
        }
        Ok(committed.aggregate)
    }
}

fn effective_date(session: &StockCountSession) -> NaiveDate {
    session
        .effective_date()
        .unwrap_or_else(|| Utc::now().date_naive())
}
