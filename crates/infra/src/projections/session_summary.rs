use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockcount_core::{AggregateId, TenantId, UserId};
use stockcount_counting::{AGGREGATE_TYPE, SessionEvent, SessionId, SessionState};
use stockcount_events::EventEnvelope;

use crate::read_model::TenantStore;

/// One row of the session list view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub name: String,
    pub state: SessionState,
    pub line_count: usize,
    pub finance_manager: Option<UserId>,
    pub date_start: Option<DateTime<Utc>>,
    pub review_date: Option<DateTime<Utc>>,
    pub approval_date: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
    pub rejection_date: Option<DateTime<Utc>>,
}

impl SessionSummary {
    fn blank(session_id: SessionId) -> Self {
        Self {
            session_id,
            name: String::new(),
            state: SessionState::Draft,
            line_count: 0,
            finance_manager: None,
            date_start: None,
            review_date: None,
            approval_date: None,
            date_end: None,
            rejection_date: None,
        }
    }
}

/// Tenant+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum SessionSummaryError {
    #[error("failed to deserialize session event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Session list projection.
///
/// Consumes published envelopes and keeps one [`SessionSummary`] per session.
/// Envelopes of other aggregate types are ignored; redeliveries at or below
/// the stream cursor are dropped.
#[derive(Debug)]
pub struct SessionSummaryProjection<S>
where
    S: TenantStore<SessionId, SessionSummary>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> SessionSummaryProjection<S>
where
    S: TenantStore<SessionId, SessionSummary>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, session_id: &SessionId) -> Option<SessionSummary> {
        self.store.get(tenant_id, session_id)
    }

    /// All sessions of a tenant, by name.
    pub fn list(&self, tenant_id: TenantId) -> Vec<SessionSummary> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Sessions of a tenant in one lifecycle state.
    pub fn list_in_state(&self, tenant_id: TenantId, state: SessionState) -> Vec<SessionSummary> {
        self.list(tenant_id)
            .into_iter()
            .filter(|s| s.state == state)
            .collect()
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), SessionSummaryError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = match self.cursors.write() {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        let key = CursorKey { tenant_id, aggregate_id };
        let last = *cursors.get(&key).unwrap_or(&0);

        if seq == 0 {
            return Err(SessionSummaryError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(SessionSummaryError::NonMonotonicSequence { last, found: seq });
        }

        let event: SessionEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| SessionSummaryError::Deserialize(e.to_string()))?;

        let session_id = event.session_id();
        if session_id.stream_id() != aggregate_id {
            return Err(SessionSummaryError::TenantIsolation(
                "event session_id does not match envelope aggregate_id".to_string(),
            ));
        }
        if let SessionEvent::SessionCreated(e) = &event {
            if e.tenant_id != tenant_id {
                return Err(SessionSummaryError::TenantIsolation(
                    "event tenant_id does not match envelope tenant_id".to_string(),
                ));
            }
        }

        let mut row = self
            .store
            .get(tenant_id, &session_id)
            .unwrap_or_else(|| SessionSummary::blank(session_id));

        match event {
            SessionEvent::SessionCreated(e) => {
                row.name = e.name;
                row.state = SessionState::Draft;
                row.date_start = Some(e.occurred_at);
            }
            SessionEvent::FinanceManagerAssigned(e) => row.finance_manager = e.finance_manager,
            SessionEvent::LinesGenerated(e) => {
                row.state = SessionState::InProgress;
                row.line_count = e.lines.len();
            }
            SessionEvent::CountSubmitted(e) => {
                row.state = SessionState::Review;
                row.review_date = Some(e.occurred_at);
            }
            SessionEvent::SentForApproval(e) => {
                row.state = SessionState::Approval;
                row.approval_date = Some(e.occurred_at);
            }
            SessionEvent::SessionApproved(e) => {
                row.state = SessionState::Done;
                row.date_end = Some(e.occurred_at);
            }
            SessionEvent::RecountRequested(_) => row.state = SessionState::InProgress,
            SessionEvent::SessionRejected(e) => {
                row.state = SessionState::Rejected;
                row.rejection_date = Some(e.occurred_at);
            }
            // Line-level and membership events do not change the summary.
            SessionEvent::ScopeChanged(_)
            | SessionEvent::AttendeeAdded(_)
            | SessionEvent::AttendeeRemoved(_)
            | SessionEvent::CountRecorded(_)
            | SessionEvent::ReviewCountRevised(_)
            | SessionEvent::LineAnnotated(_)
            | SessionEvent::CostsRefreshed(_)
            | SessionEvent::RefusalLogged(_) => {}
        }

        self.store.upsert(tenant_id, session_id, row);
        cursors.insert(key, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), SessionSummaryError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
        tenants.sort();
        tenants.dedup();
        for t in tenants {
            self.store.clear_tenant(t);
        }

        // Deterministic replay order: tenant, aggregate, sequence.
        envs.sort_by_key(|e| (e.tenant_id(), e.aggregate_id(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
