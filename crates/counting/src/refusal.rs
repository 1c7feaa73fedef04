//! Refusal decisions: send a reviewed count back for recount, or reject it.

use serde::{Deserialize, Serialize};

use stockcount_core::{DomainError, DomainResult, UserId};

use crate::ids::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefusalAction {
    /// Back to `in_progress`; counted figures are kept.
    Recount,
    /// Terminal `rejected`, with the reason stored on the session.
    Reject,
}

impl RefusalAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RefusalAction::Recount => "recount",
            RefusalAction::Reject => "reject",
        }
    }
}

impl core::fmt::Display for RefusalAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A confirmed refusal, valid for exactly one confirm operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefusalDecision {
    session_id: SessionId,
    reason: String,
    action: RefusalAction,
    author: UserId,
}

impl RefusalDecision {
    /// Fails with a validation error when the reason is blank.
    pub fn new(
        session_id: SessionId,
        reason: impl Into<String>,
        action: RefusalAction,
        author: UserId,
    ) -> DomainResult<Self> {
        let reason = reason.into().trim().to_string();
        if reason.is_empty() {
            return Err(DomainError::validation("a reason is required"));
        }
        Ok(Self {
            session_id,
            reason,
            action,
            author,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn action(&self) -> RefusalAction {
        self.action
    }

    pub fn author(&self) -> UserId {
        self.author
    }

    /// Text of the audit entry recorded on the session.
    pub fn audit_text(&self) -> String {
        format!("Action: {}. Reason: {}", self.action, self.reason)
    }
}
