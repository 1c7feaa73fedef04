//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only (validation, lifecycle, conflicts).
/// Port and storage failures are modeled by the crates that own those seams.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// User-correctable input problem; the action is blocked and state is unchanged.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An action was invoked from a lifecycle state that does not allow it.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// Stale version / concurrent modification.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// `action` is not allowed while the aggregate is in `state`.
    pub fn invalid_transition(action: &str, state: impl core::fmt::Display) -> Self {
        Self::InvalidTransition(format!("cannot {action} while {state}"))
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// True for errors the acting user can fix by changing their input.
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_action_and_state() {
        let err = DomainError::invalid_transition("approve", "review");
        assert_eq!(
            err,
            DomainError::InvalidTransition("cannot approve while review".to_string())
        );
        assert_eq!(err.to_string(), "invalid transition: cannot approve while review");
    }

    #[test]
    fn only_validation_is_user_correctable() {
        assert!(DomainError::validation("pick a warehouse").is_user_correctable());
        assert!(!DomainError::conflict("stale").is_user_correctable());
        assert!(!DomainError::not_found().is_user_correctable());
    }
}
