use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role (group) identifier.
///
/// Opaque string at this layer; which roles exist and who holds them is owned
/// by the access-control collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Members may approve count sessions they are assigned to.
    pub const FINANCE_MANAGER: Role = Role(Cow::Borrowed("stock_count.finance_manager"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
