use crate::error::AuthError;
use crate::middleware::auth::CurrentUser;
use crate::models::user::Role;

/// Pure authorization predicates, evaluated only after the auth pipeline has
/// resolved an identity. None of these touch a store.

pub fn require_role(identity: &CurrentUser, allowed: &[Role]) -> Result<(), AuthError> {
    if allowed.contains(&identity.user.role) {
        Ok(())
    } else {
        Err(AuthError::InsufficientPermissions)
    }
}

pub fn require_org_unit(identity: &CurrentUser, allowed: &[i64]) -> Result<(), AuthError> {
    if allowed.contains(&identity.user.org_unit_id) {
        Ok(())
    } else {
        Err(AuthError::RestrictedToOrgUnit)
    }
}

/// Admins may act on any resource; everyone else only on their own.
pub fn require_owner(identity: &CurrentUser, owner_id: i64) -> Result<(), AuthError> {
    match identity.user.role {
        Role::Admin => Ok(()),
        Role::Input | Role::Output => {
            if identity.user.id == owner_id {
                Ok(())
            } else {
                Err(AuthError::NotOwner)
            }
        }
    }
}
