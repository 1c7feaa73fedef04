use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockcount_core::{Aggregate, AggregateRoot, DomainError, TenantId, UserId};
use stockcount_events::Event;

use crate::ids::{LineId, ProductId, SessionId};
use crate::line::{CountLine, SnapshotLine};
use crate::refusal::{RefusalAction, RefusalDecision};
use crate::scope::StockScope;
use crate::state::SessionState;
use crate::totals::SessionTotals;
use crate::variance::VarianceInputs;

/// Stream type of count session events.
pub const AGGREGATE_TYPE: &str = "stockcount.session";

/// An immutable audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub author: UserId,
    pub recorded_at: DateTime<Utc>,
    pub text: String,
}

/// Aggregate root: StockCountSession.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockCountSession {
    id: SessionId,
    tenant_id: Option<TenantId>,
    name: String,
    state: SessionState,
    note: Option<String>,
    owner: Option<UserId>,
    attendees: BTreeSet<UserId>,
    finance_manager: Option<UserId>,
    scope: StockScope,
    effective_date: Option<NaiveDate>,
    date_start: Option<DateTime<Utc>>,
    date_end: Option<DateTime<Utc>>,
    review_date: Option<DateTime<Utc>>,
    approval_date: Option<DateTime<Utc>>,
    rejection_date: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    lines: Vec<CountLine>,
    audit_log: Vec<AuditEntry>,
    totals: SessionTotals,
    version: u64,
    created: bool,
}

impl StockCountSession {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SessionId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            state: SessionState::Draft,
            note: None,
            owner: None,
            attendees: BTreeSet::new(),
            finance_manager: None,
            scope: StockScope::default(),
            effective_date: None,
            date_start: None,
            date_end: None,
            review_date: None,
            approval_date: None,
            rejection_date: None,
            rejection_reason: None,
            lines: Vec::new(),
            audit_log: Vec::new(),
            totals: SessionTotals::default(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SessionId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    pub fn attendees(&self) -> &BTreeSet<UserId> {
        &self.attendees
    }

    pub fn finance_manager(&self) -> Option<UserId> {
        self.finance_manager
    }

    pub fn scope(&self) -> &StockScope {
        &self.scope
    }

    /// Date standard costs are read at.
    pub fn effective_date(&self) -> Option<NaiveDate> {
        self.effective_date
    }

    pub fn date_start(&self) -> Option<DateTime<Utc>> {
        self.date_start
    }

    pub fn date_end(&self) -> Option<DateTime<Utc>> {
        self.date_end
    }

    pub fn review_date(&self) -> Option<DateTime<Utc>> {
        self.review_date
    }

    pub fn approval_date(&self) -> Option<DateTime<Utc>> {
        self.approval_date
    }

    pub fn rejection_date(&self) -> Option<DateTime<Utc>> {
        self.rejection_date
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn lines(&self) -> &[CountLine] {
        &self.lines
    }

    pub fn line(&self, line_id: LineId) -> Option<&CountLine> {
        self.lines.iter().find(|l| l.line_id() == line_id)
    }

    pub fn audit_log(&self) -> &[AuditEntry] {
        &self.audit_log
    }

    pub fn totals(&self) -> &SessionTotals {
        &self.totals
    }

    /// Distinct products across the current lines.
    pub fn products(&self) -> BTreeSet<ProductId> {
        self.lines.iter().map(|l| l.product_id()).collect()
    }
}

impl AggregateRoot for StockCountSession {
    type Id = SessionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Command: CreateSession. The name is already resolved by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSession {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub name: String,
    pub owner: UserId,
    pub scope: StockScope,
    pub effective_date: NaiveDate,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeScope {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub scope: StockScope,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignFinanceManager. `None` clears the assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignFinanceManager {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub finance_manager: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAttendee {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub user: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveAttendee {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub user: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: GenerateLines. Carries the resolved snapshot; replaces every
/// existing line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateLines {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub lines: Vec<SnapshotLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCount {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub line_id: LineId,
    pub qty_counted: Decimal,
    pub scanned_by: UserId,
    pub barcode: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviseReviewCount {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub line_id: LineId,
    pub qty_review_counted: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotateLine {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub line_id: LineId,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Unit cost of one product at the session's effective date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCost {
    pub product_id: ProductId,
    pub unit_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshCosts {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub costs: Vec<ProductCost>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitCount {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateCount {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveCount {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmRefusal {
    pub tenant_id: TenantId,
    pub decision: RefusalDecision,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCommand {
    CreateSession(CreateSession),
    ChangeScope(ChangeScope),
    AssignFinanceManager(AssignFinanceManager),
    AddAttendee(AddAttendee),
    RemoveAttendee(RemoveAttendee),
    GenerateLines(GenerateLines),
    RecordCount(RecordCount),
    ReviseReviewCount(ReviseReviewCount),
    AnnotateLine(AnnotateLine),
    RefreshCosts(RefreshCosts),
    SubmitCount(SubmitCount),
    ValidateCount(ValidateCount),
    ApproveCount(ApproveCount),
    ConfirmRefusal(ConfirmRefusal),
}

impl SessionCommand {
    /// Action name used in logs and transition errors.
    pub fn action(&self) -> &'static str {
        match self {
            SessionCommand::CreateSession(_) => "create session",
            SessionCommand::ChangeScope(_) => "change scope",
            SessionCommand::AssignFinanceManager(_) => "assign finance manager",
            SessionCommand::AddAttendee(_) => "add attendee",
            SessionCommand::RemoveAttendee(_) => "remove attendee",
            SessionCommand::GenerateLines(_) => "generate lines",
            SessionCommand::RecordCount(_) => "record count",
            SessionCommand::ReviseReviewCount(_) => "revise review count",
            SessionCommand::AnnotateLine(_) => "annotate line",
            SessionCommand::RefreshCosts(_) => "refresh costs",
            SessionCommand::SubmitCount(_) => "submit count",
            SessionCommand::ValidateCount(_) => "validate",
            SessionCommand::ApproveCount(_) => "approve",
            SessionCommand::ConfirmRefusal(c) => match c.decision.action() {
                RefusalAction::Recount => "request recount",
                RefusalAction::Reject => "reject",
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCreated {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub name: String,
    pub owner: UserId,
    pub scope: StockScope,
    pub effective_date: NaiveDate,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeChanged {
    pub session_id: SessionId,
    pub scope: StockScope,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinanceManagerAssigned {
    pub session_id: SessionId,
    pub finance_manager: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeAdded {
    pub session_id: SessionId,
    pub user: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeRemoved {
    pub session_id: SessionId,
    pub user: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LinesGenerated. The whole line set travels in this one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinesGenerated {
    pub session_id: SessionId,
    pub lines: Vec<SnapshotLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRecorded {
    pub session_id: SessionId,
    pub line_id: LineId,
    pub qty_counted: Decimal,
    pub scanned_by: UserId,
    pub barcode: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewCountRevised {
    pub session_id: SessionId,
    pub line_id: LineId,
    pub qty_review_counted: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAnnotated {
    pub session_id: SessionId,
    pub line_id: LineId,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostsRefreshed {
    pub session_id: SessionId,
    pub costs: Vec<ProductCost>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSubmitted {
    pub session_id: SessionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentForApproval {
    pub session_id: SessionId,
    pub finance_manager: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionApproved {
    pub session_id: SessionId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefusalLogged. Always precedes the recount or rejection it explains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefusalLogged {
    pub session_id: SessionId,
    pub author: UserId,
    pub action: RefusalAction,
    pub reason: String,
    pub text: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecountRequested {
    pub session_id: SessionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRejected {
    pub session_id: SessionId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    SessionCreated(SessionCreated),
    ScopeChanged(ScopeChanged),
    FinanceManagerAssigned(FinanceManagerAssigned),
    AttendeeAdded(AttendeeAdded),
    AttendeeRemoved(AttendeeRemoved),
    LinesGenerated(LinesGenerated),
    CountRecorded(CountRecorded),
    ReviewCountRevised(ReviewCountRevised),
    LineAnnotated(LineAnnotated),
    CostsRefreshed(CostsRefreshed),
    CountSubmitted(CountSubmitted),
    SentForApproval(SentForApproval),
    SessionApproved(SessionApproved),
    RefusalLogged(RefusalLogged),
    RecountRequested(RecountRequested),
    SessionRejected(SessionRejected),
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::SessionCreated(e) => e.session_id,
            SessionEvent::ScopeChanged(e) => e.session_id,
            SessionEvent::FinanceManagerAssigned(e) => e.session_id,
            SessionEvent::AttendeeAdded(e) => e.session_id,
            SessionEvent::AttendeeRemoved(e) => e.session_id,
            SessionEvent::LinesGenerated(e) => e.session_id,
            SessionEvent::CountRecorded(e) => e.session_id,
            SessionEvent::ReviewCountRevised(e) => e.session_id,
            SessionEvent::LineAnnotated(e) => e.session_id,
            SessionEvent::CostsRefreshed(e) => e.session_id,
            SessionEvent::CountSubmitted(e) => e.session_id,
            SessionEvent::SentForApproval(e) => e.session_id,
            SessionEvent::SessionApproved(e) => e.session_id,
            SessionEvent::RefusalLogged(e) => e.session_id,
            SessionEvent::RecountRequested(e) => e.session_id,
            SessionEvent::SessionRejected(e) => e.session_id,
        }
    }
}

impl Event for SessionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SessionCreated(_) => "stockcount.session.created",
            SessionEvent::ScopeChanged(_) => "stockcount.session.scope_changed",
            SessionEvent::FinanceManagerAssigned(_) => "stockcount.session.finance_manager_assigned",
            SessionEvent::AttendeeAdded(_) => "stockcount.session.attendee_added",
            SessionEvent::AttendeeRemoved(_) => "stockcount.session.attendee_removed",
            SessionEvent::LinesGenerated(_) => "stockcount.session.lines_generated",
            SessionEvent::CountRecorded(_) => "stockcount.session.count_recorded",
            SessionEvent::ReviewCountRevised(_) => "stockcount.session.review_count_revised",
            SessionEvent::LineAnnotated(_) => "stockcount.session.line_annotated",
            SessionEvent::CostsRefreshed(_) => "stockcount.session.costs_refreshed",
            SessionEvent::CountSubmitted(_) => "stockcount.session.count_submitted",
            SessionEvent::SentForApproval(_) => "stockcount.session.sent_for_approval",
            SessionEvent::SessionApproved(_) => "stockcount.session.approved",
            SessionEvent::RefusalLogged(_) => "stockcount.session.refusal_logged",
            SessionEvent::RecountRequested(_) => "stockcount.session.recount_requested",
            SessionEvent::SessionRejected(_) => "stockcount.session.rejected",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::SessionCreated(e) => e.occurred_at,
            SessionEvent::ScopeChanged(e) => e.occurred_at,
            SessionEvent::FinanceManagerAssigned(e) => e.occurred_at,
            SessionEvent::AttendeeAdded(e) => e.occurred_at,
            SessionEvent::AttendeeRemoved(e) => e.occurred_at,
            SessionEvent::LinesGenerated(e) => e.occurred_at,
            SessionEvent::CountRecorded(e) => e.occurred_at,
            SessionEvent::ReviewCountRevised(e) => e.occurred_at,
            SessionEvent::LineAnnotated(e) => e.occurred_at,
            SessionEvent::CostsRefreshed(e) => e.occurred_at,
            SessionEvent::CountSubmitted(e) => e.occurred_at,
            SessionEvent::SentForApproval(e) => e.occurred_at,
            SessionEvent::SessionApproved(e) => e.occurred_at,
            SessionEvent::RefusalLogged(e) => e.occurred_at,
            SessionEvent::RecountRequested(e) => e.occurred_at,
            SessionEvent::SessionRejected(e) => e.occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for StockCountSession {
    type Command = SessionCommand;
    type Event = SessionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SessionEvent::SessionCreated(e) => {
                self.id = e.session_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.owner = Some(e.owner);
                self.scope = e.scope.clone();
                self.effective_date = Some(e.effective_date);
                self.note = e.note.clone();
                self.date_start = Some(e.occurred_at);
                self.state = SessionState::Draft;
                self.created = true;
            }
            SessionEvent::ScopeChanged(e) => {
                self.scope = e.scope.clone();
            }
            SessionEvent::FinanceManagerAssigned(e) => {
                self.finance_manager = e.finance_manager;
            }
            SessionEvent::AttendeeAdded(e) => {
                self.attendees.insert(e.user);
            }
            SessionEvent::AttendeeRemoved(e) => {
                self.attendees.remove(&e.user);
            }
            SessionEvent::LinesGenerated(e) => {
                self.state = SessionState::InProgress;
                self.lines = e
                    .lines
                    .iter()
                    .cloned()
                    .map(|s| CountLine::from_snapshot(s, SessionState::InProgress))
                    .collect();
            }
            SessionEvent::CountRecorded(e) => {
                if let Some(line) = self.line_mut(e.line_id) {
                    line.record_count(e.qty_counted, e.scanned_by, e.occurred_at, e.barcode.clone());
                }
            }
            SessionEvent::ReviewCountRevised(e) => {
                if let Some(line) = self.line_mut(e.line_id) {
                    line.set_review_count(e.qty_review_counted);
                }
            }
            SessionEvent::LineAnnotated(e) => {
                if let Some(line) = self.line_mut(e.line_id) {
                    line.set_note(e.note.clone());
                }
            }
            SessionEvent::CostsRefreshed(e) => {
                for cost in &e.costs {
                    for line in self.lines.iter_mut().filter(|l| l.product_id() == cost.product_id) {
                        line.set_unit_cost(cost.unit_cost);
                    }
                }
            }
            SessionEvent::CountSubmitted(e) => {
                // Seed before the state flip so the review difference starts
                // from the counted figure.
                for line in &mut self.lines {
                    line.seed_review_count();
                }
                self.set_state(SessionState::Review);
                self.review_date = Some(e.occurred_at);
            }
            SessionEvent::SentForApproval(e) => {
                self.set_state(SessionState::Approval);
                self.approval_date = Some(e.occurred_at);
            }
            SessionEvent::SessionApproved(e) => {
                self.set_state(SessionState::Done);
                self.date_end = Some(e.occurred_at);
            }
            SessionEvent::RefusalLogged(e) => {
                self.audit_log.push(AuditEntry {
                    author: e.author,
                    recorded_at: e.occurred_at,
                    text: e.text.clone(),
                });
            }
            SessionEvent::RecountRequested(_) => {
                self.set_state(SessionState::InProgress);
            }
            SessionEvent::SessionRejected(e) => {
                self.set_state(SessionState::Rejected);
                self.rejection_date = Some(e.occurred_at);
                self.rejection_reason = Some(e.reason.clone());
            }
        }

        self.totals = SessionTotals::compute(&self.lines);

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if let SessionCommand::CreateSession(cmd) = command {
            return self.handle_create(cmd);
        }
        if !self.created {
            return Err(DomainError::not_found());
        }

        match command {
            SessionCommand::CreateSession(_) => Err(DomainError::conflict("session already exists")),
            SessionCommand::ChangeScope(cmd) => {
                self.ensure_target(cmd.tenant_id, cmd.session_id)?;
                self.ensure_state(command, &[SessionState::Draft, SessionState::Rejected])?;
                Ok(vec![SessionEvent::ScopeChanged(ScopeChanged {
                    session_id: cmd.session_id,
                    scope: cmd.scope.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            SessionCommand::AssignFinanceManager(cmd) => {
                self.ensure_target(cmd.tenant_id, cmd.session_id)?;
                self.ensure_not_done(command)?;
                Ok(vec![SessionEvent::FinanceManagerAssigned(FinanceManagerAssigned {
                    session_id: cmd.session_id,
                    finance_manager: cmd.finance_manager,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SessionCommand::AddAttendee(cmd) => {
                self.ensure_target(cmd.tenant_id, cmd.session_id)?;
                self.ensure_not_done(command)?;
                if self.attendees.contains(&cmd.user) {
                    return Ok(vec![]);
                }
                Ok(vec![SessionEvent::AttendeeAdded(AttendeeAdded {
                    session_id: cmd.session_id,
                    user: cmd.user,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SessionCommand::RemoveAttendee(cmd) => {
                self.ensure_target(cmd.tenant_id, cmd.session_id)?;
                self.ensure_not_done(command)?;
                if !self.attendees.contains(&cmd.user) {
                    return Ok(vec![]);
                }
                Ok(vec![SessionEvent::AttendeeRemoved(AttendeeRemoved {
                    session_id: cmd.session_id,
                    user: cmd.user,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SessionCommand::GenerateLines(cmd) => self.handle_generate(cmd),
            SessionCommand::RecordCount(cmd) => {
                self.ensure_target(cmd.tenant_id, cmd.session_id)?;
                self.ensure_state(command, &[SessionState::InProgress])?;
                ensure_quantity(cmd.qty_counted)?;
                self.ensure_line(cmd.line_id)?;
                ensure_representable(
                    self.inputs_with(cmd.line_id, |i| i.qty_counted = cmd.qty_counted),
                )?;
                Ok(vec![SessionEvent::CountRecorded(CountRecorded {
                    session_id: cmd.session_id,
                    line_id: cmd.line_id,
                    qty_counted: cmd.qty_counted,
                    scanned_by: cmd.scanned_by,
                    barcode: cmd.barcode.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            SessionCommand::ReviseReviewCount(cmd) => {
                self.ensure_target(cmd.tenant_id, cmd.session_id)?;
                self.ensure_state(command, &[SessionState::Review])?;
                ensure_quantity(cmd.qty_review_counted)?;
                self.ensure_line(cmd.line_id)?;
                ensure_representable(
                    self.inputs_with(cmd.line_id, |i| i.qty_review_counted = cmd.qty_review_counted),
                )?;
                Ok(vec![SessionEvent::ReviewCountRevised(ReviewCountRevised {
                    session_id: cmd.session_id,
                    line_id: cmd.line_id,
                    qty_review_counted: cmd.qty_review_counted,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SessionCommand::AnnotateLine(cmd) => {
                self.ensure_target(cmd.tenant_id, cmd.session_id)?;
                self.ensure_not_done(command)?;
                self.ensure_line(cmd.line_id)?;
                let note = cmd
                    .note
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string);
                Ok(vec![SessionEvent::LineAnnotated(LineAnnotated {
                    session_id: cmd.session_id,
                    line_id: cmd.line_id,
                    note,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SessionCommand::RefreshCosts(cmd) => {
                self.ensure_target(cmd.tenant_id, cmd.session_id)?;
                self.ensure_not_done(command)?;
                // Later entries win, as in `apply`.
                let costs: BTreeMap<ProductId, Decimal> =
                    cmd.costs.iter().map(|c| (c.product_id, c.unit_cost)).collect();
                ensure_representable(
                    self.lines
                        .iter()
                        .map(|l| {
                            let mut inputs = l.variance_inputs();
                            if let Some(cost) = costs.get(&l.product_id()) {
                                inputs.unit_cost = *cost;
                            }
                            inputs
                        })
                        .collect(),
                )?;
                Ok(vec![SessionEvent::CostsRefreshed(CostsRefreshed {
                    session_id: cmd.session_id,
                    costs: cmd.costs.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            SessionCommand::SubmitCount(cmd) => {
                self.ensure_target(cmd.tenant_id, cmd.session_id)?;
                self.ensure_state(command, &[SessionState::InProgress])?;
                Ok(vec![SessionEvent::CountSubmitted(CountSubmitted {
                    session_id: cmd.session_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SessionCommand::ValidateCount(cmd) => {
                self.ensure_target(cmd.tenant_id, cmd.session_id)?;
                self.ensure_state(command, &[SessionState::Review])?;
                let finance_manager = self.finance_manager.ok_or_else(|| {
                    DomainError::validation("please assign a finance manager before validating")
                })?;
                Ok(vec![SessionEvent::SentForApproval(SentForApproval {
                    session_id: cmd.session_id,
                    finance_manager,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SessionCommand::ApproveCount(cmd) => {
                self.ensure_target(cmd.tenant_id, cmd.session_id)?;
                self.ensure_state(command, &[SessionState::Approval])?;
                Ok(vec![SessionEvent::SessionApproved(SessionApproved {
                    session_id: cmd.session_id,
                    approved_by: cmd.approved_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SessionCommand::ConfirmRefusal(cmd) => self.handle_refusal(command, cmd),
        }
    }
}

impl StockCountSession {
    /// Whether lines may be (re)generated now. Checked before the snapshot is
    /// pulled so a refused generation costs no inventory lookups.
    pub fn ensure_can_generate(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if !matches!(
            self.state,
            SessionState::Draft | SessionState::InProgress | SessionState::Rejected
        ) {
            return Err(DomainError::invalid_transition("generate lines", self.state));
        }
        self.scope.require_warehouse()?;
        Ok(())
    }

    fn line_mut(&mut self, line_id: LineId) -> Option<&mut CountLine> {
        self.lines.iter_mut().find(|l| l.line_id() == line_id)
    }

    /// Move to `state` and keep every line's denormalized copy in step.
    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        for line in &mut self.lines {
            line.set_session_state(state);
        }
    }

    fn ensure_target(&self, tenant_id: TenantId, session_id: SessionId) -> Result<(), DomainError> {
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != session_id {
            return Err(DomainError::invariant("session_id mismatch"));
        }
        Ok(())
    }

    fn ensure_state(&self, command: &SessionCommand, allowed: &[SessionState]) -> Result<(), DomainError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(command.action(), self.state))
        }
    }

    fn ensure_not_done(&self, command: &SessionCommand) -> Result<(), DomainError> {
        if self.state == SessionState::Done {
            return Err(DomainError::invalid_transition(command.action(), self.state));
        }
        Ok(())
    }

    /// Current line inputs with `edit` applied to one line.
    fn inputs_with(&self, line_id: LineId, edit: impl Fn(&mut VarianceInputs)) -> Vec<VarianceInputs> {
        self.lines
            .iter()
            .map(|l| {
                let mut inputs = l.variance_inputs();
                if l.line_id() == line_id {
                    edit(&mut inputs);
                }
                inputs
            })
            .collect()
    }

    fn ensure_line(&self, line_id: LineId) -> Result<(), DomainError> {
        match self.line(line_id) {
            Some(_) => Ok(()),
            None => Err(DomainError::validation(format!("unknown line {line_id}"))),
        }
    }

    fn handle_create(&self, cmd: &CreateSession) -> Result<Vec<SessionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("session already exists"));
        }
        if self.id != cmd.session_id {
            return Err(DomainError::invariant("session_id mismatch"));
        }
        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        Ok(vec![SessionEvent::SessionCreated(SessionCreated {
            tenant_id: cmd.tenant_id,
            session_id: cmd.session_id,
            name: name.to_string(),
            owner: cmd.owner,
            scope: cmd.scope.clone(),
            effective_date: cmd.effective_date,
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_generate(&self, cmd: &GenerateLines) -> Result<Vec<SessionEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.session_id)?;
        self.ensure_can_generate()?;

        let mut seen = BTreeSet::new();
        for line in &cmd.lines {
            if !seen.insert(line.line_id) {
                return Err(DomainError::invariant(format!("duplicate line id {}", line.line_id)));
            }
            if self.scope.location.is_some_and(|loc| loc != line.location_id) {
                return Err(DomainError::invariant(format!(
                    "line {} lies outside the session's location",
                    line.line_id
                )));
            }
        }

        ensure_representable(
            cmd.lines
                .iter()
                .map(|l| VarianceInputs {
                    state: SessionState::InProgress,
                    qty_system: l.qty_system,
                    qty_counted: Decimal::ZERO,
                    qty_review_counted: Decimal::ZERO,
                    unit_cost: l.unit_cost,
                })
                .collect(),
        )?;

        Ok(vec![SessionEvent::LinesGenerated(LinesGenerated {
            session_id: cmd.session_id,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_refusal(
        &self,
        command: &SessionCommand,
        cmd: &ConfirmRefusal,
    ) -> Result<Vec<SessionEvent>, DomainError> {
        let decision = &cmd.decision;
        self.ensure_target(cmd.tenant_id, decision.session_id())?;
        let allowed: &[SessionState] = match decision.action() {
            RefusalAction::Recount => {
                &[SessionState::Review, SessionState::Approval, SessionState::Rejected]
            }
            RefusalAction::Reject => &[SessionState::Review, SessionState::Approval],
        };
        self.ensure_state(command, allowed)?;
        if decision.reason().trim().is_empty() {
            return Err(DomainError::validation("a reason is required"));
        }

        let logged = SessionEvent::RefusalLogged(RefusalLogged {
            session_id: self.id,
            author: decision.author(),
            action: decision.action(),
            reason: decision.reason().to_string(),
            text: decision.audit_text(),
            occurred_at: cmd.occurred_at,
        });
        let outcome = match decision.action() {
            RefusalAction::Recount => SessionEvent::RecountRequested(RecountRequested {
                session_id: self.id,
                occurred_at: cmd.occurred_at,
            }),
            RefusalAction::Reject => SessionEvent::SessionRejected(SessionRejected {
                session_id: self.id,
                reason: decision.reason().to_string(),
                occurred_at: cmd.occurred_at,
            }),
        };
        Ok(vec![logged, outcome])
    }
}

/// Refuses a line set whose values or totals would leave the `Decimal` range
/// while counting, in review, or right after submission seeds the review
/// quantities.
fn ensure_representable(inputs: Vec<VarianceInputs>) -> Result<(), DomainError> {
    let counting = inputs.iter().map(|i| VarianceInputs {
        state: SessionState::InProgress,
        ..*i
    });
    let reviewed = inputs.iter().map(|i| VarianceInputs {
        state: SessionState::Review,
        ..*i
    });
    let seeded = inputs.iter().map(|i| VarianceInputs {
        state: SessionState::Review,
        qty_review_counted: i.qty_counted,
        ..*i
    });

    if SessionTotals::try_from_inputs(counting).is_some()
        && SessionTotals::try_from_inputs(reviewed).is_some()
        && SessionTotals::try_from_inputs(seeded).is_some()
    {
        Ok(())
    } else {
        Err(DomainError::validation("quantity or cost is too large to value"))
    }
}

fn ensure_quantity(qty: Decimal) -> Result<(), DomainError> {
    if qty < Decimal::ZERO {
        return Err(DomainError::validation("quantity cannot be negative"));
    }
    Ok(())
}
