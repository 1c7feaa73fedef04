use serde::{Deserialize, Serialize};

/// Lifecycle state of a count session.
///
/// ```text
/// draft ─generate─▶ in_progress ─submit─▶ review ─validate─▶ approval ─approve─▶ done
///                      ▲                     │                  │
///                      ├──────recount────────┴──────────────────┤
///                      │                                        │
///                      └─generate── rejected ◀──────reject──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Draft,
    InProgress,
    Review,
    Approval,
    Done,
    Rejected,
}

impl SessionState {
    /// Review, approval, done and rejected: the reviewed quantity is authoritative.
    pub fn is_post_review(self) -> bool {
        matches!(
            self,
            SessionState::Review | SessionState::Approval | SessionState::Done | SessionState::Rejected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Draft => "draft",
            SessionState::InProgress => "in_progress",
            SessionState::Review => "review",
            SessionState::Approval => "approval",
            SessionState::Done => "done",
            SessionState::Rejected => "rejected",
        }
    }
}

impl core::fmt::Display for SessionState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
