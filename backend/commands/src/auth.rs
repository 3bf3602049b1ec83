/// Authorization gate.
use opbot_core::RoleResolver;
use tracing::warn;

use crate::types::{Command, RoleSet};

/// Whether a caller holding `roles` may run `command`.
pub fn authorize(command: &Command, roles: &RoleSet) -> bool {
    command
        .roles
        .as_ref()
        .is_none_or(|req| req.is_satisfied_by(roles))
}

/// Resolve and deduplicate the sender's roles. A failing resolver is
/// treated as "no roles" so unrestricted commands keep working.
pub async fn resolve_roles(resolver: &dyn RoleResolver, user: &str) -> RoleSet {
    match resolver.resolve(user).await {
        Ok(roles) => roles.into_iter().collect(),
        Err(e) => {
            warn!(user, error = %e, "Role resolution failed, continuing with no roles");
            RoleSet::new()
        }
    }
}
