use std::sync::Arc;

use stockcount_core::UserId;

use crate::{Actor, Role};

/// Group-membership check supplied by the access-control collaborator.
///
/// - No IO expected on the hot path
/// - No panics
pub trait AccessPolicy: Send + Sync {
    fn is_member(&self, actor: &Actor, role: &Role) -> bool;
}

impl<P> AccessPolicy for Arc<P>
where
    P: AccessPolicy + ?Sized,
{
    fn is_member(&self, actor: &Actor, role: &Role) -> bool {
        (**self).is_member(actor, role)
    }
}

/// Trusts the role claims carried on the [`Actor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RoleClaimsPolicy;

impl AccessPolicy for RoleClaimsPolicy {
    fn is_member(&self, actor: &Actor, role: &Role) -> bool {
        actor.has_role(role)
    }
}

/// True iff `actor` is the session's assigned finance manager and belongs to
/// the finance-manager group.
pub fn is_finance_manager(
    policy: &dyn AccessPolicy,
    actor: &Actor,
    assigned: Option<UserId>,
) -> bool {
    assigned == Some(actor.user_id) && policy.is_member(actor, &Role::FINANCE_MANAGER)
}
