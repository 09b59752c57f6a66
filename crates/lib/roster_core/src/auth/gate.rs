//! Role and ownership gates.

use std::collections::{BTreeSet, HashMap};

use super::{AuthError, Claims, jwt};

/// Verified identity of the caller for the lifetime of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub roles: BTreeSet<String>,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            username: claims.username,
            roles: claims.roles,
        }
    }
}

/// Admits a caller holding at least one of a configured set of roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGate {
    required: BTreeSet<String>,
}

impl RoleGate {
    pub fn any_of<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// `Unauthorized` without a usable identity, `InsufficientPermissions`
    /// when no role overlaps. A gate with no required roles admits nobody.
    pub fn check(&self, identity: Option<&Identity>) -> Result<(), AuthError> {
        let identity = identity.ok_or(AuthError::Unauthorized)?;
        if identity.roles.is_empty() {
            return Err(AuthError::Unauthorized);
        }
        if self.required.intersection(&identity.roles).next().is_some() {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermissions)
        }
    }
}

/// Admits a caller who owns the addressed resource, or holds the admin role.
///
/// Ownership holds when the path's owner parameter equals the caller's
/// username, or the path's id parameter equals the caller's user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipGate {
    owner_param: String,
    id_param: String,
    admin_role: String,
}

impl Default for OwnershipGate {
    fn default() -> Self {
        Self::new("username", "id", crate::models::user::ROLE_ADMIN)
    }
}

impl OwnershipGate {
    pub fn new(
        owner_param: impl Into<String>,
        id_param: impl Into<String>,
        admin_role: impl Into<String>,
    ) -> Self {
        Self {
            owner_param: owner_param.into(),
            id_param: id_param.into(),
            admin_role: admin_role.into(),
        }
    }

    pub fn check(&self, claims: &Claims, params: &HashMap<String, String>) -> Result<(), AuthError> {
        let owns_by_name = params
            .get(&self.owner_param)
            .is_some_and(|v| *v == claims.username);
        let owns_by_id = params.get(&self.id_param).is_some_and(|v| *v == claims.sub);

        if owns_by_name || owns_by_id || claims.roles.contains(&self.admin_role) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }

    /// Verify `token` independently of any earlier middleware, then check
    /// ownership against the path parameters.
    pub fn authorize(
        &self,
        token: &str,
        secret: &[u8],
        params: &HashMap<String, String>,
    ) -> Result<Claims, AuthError> {
        let claims = jwt::verify(token, secret)?;
        self.check(&claims, params)?;
        Ok(claims)
    }
}
