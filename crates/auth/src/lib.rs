//! `stockcount-auth` — explicit actor identity and the access-control seam.
//!
//! Every session action receives the acting [`Actor`] as a parameter; group
//! membership questions go through an injected [`AccessPolicy`]. This crate
//! holds no access rules of its own beyond the role-claim default.

pub mod actor;
pub mod authorize;
pub mod roles;

pub use actor::Actor;
pub use authorize::{AccessPolicy, RoleClaimsPolicy, is_finance_manager};
pub use roles::Role;
