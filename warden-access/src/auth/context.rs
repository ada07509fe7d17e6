//! Access Context
//!
//! Snapshot of the signed-in user used for authorization decisions.

use super::permissions::role_grants;
use crate::{AccessError, AccessResult};
use warden_core::{Permission, Role, User};

/// Authorization view of the current session
#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    user: Option<User>,
}

impl AccessContext {
    pub fn new(user: Option<User>) -> Self {
        Self { user }
    }

    /// Context with nobody signed in
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn role(&self) -> Option<Role> {
        self.user.as_ref().map(|u| u.role)
    }

    pub fn organization_id(&self) -> Option<&str> {
        self.user.as_ref().and_then(|u| u.organization_id.as_deref())
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Global administrator
    pub fn is_admin(&self) -> bool {
        self.role().is_some_and(|role| role.is_global())
    }

    /// Global or organization administrator
    pub fn is_administrator(&self) -> bool {
        self.role().is_some_and(|role| role.is_administrative())
    }

    /// False when nobody is signed in
    pub fn has_permission(&self, permission: Permission) -> bool {
        match self.role() {
            Some(role) => role_grants(role, permission),
            None => false,
        }
    }

    /// Admins reach every organization; everyone else only their own
    pub fn can_access_organization(&self, organization_id: &str) -> bool {
        if self.is_admin() {
            return true;
        }
        self.organization_id() == Some(organization_id)
    }

    /// Same as `can_access_organization`, for records that may have no organization
    pub fn can_access_optional(&self, organization_id: Option<&str>) -> bool {
        match organization_id {
            Some(id) => self.can_access_organization(id),
            None => self.is_admin(),
        }
    }

    /// The signed-in user, or `NotAuthenticated`
    pub fn require_user(&self) -> AccessResult<&User> {
        self.user.as_ref().ok_or(AccessError::NotAuthenticated)
    }

    /// The signed-in user if they hold `permission`
    pub fn require(&self, permission: Permission) -> AccessResult<&User> {
        let user = self.require_user()?;
        if !role_grants(user.role, permission) {
            return Err(AccessError::permission(format!(
                "Role {} lacks the {} permission",
                user.role, permission
            )));
        }
        Ok(user)
    }

    /// The signed-in user if they are a global administrator
    pub fn require_admin(&self) -> AccessResult<&User> {
        let user = self.require_user()?;
        if !user.role.is_global() {
            return Err(AccessError::permission("Only administrators may do this"));
        }
        Ok(user)
    }

    /// Fail unless the organization is within reach
    pub fn require_organization(&self, organization_id: Option<&str>) -> AccessResult<()> {
        if self.can_access_optional(organization_id) {
            Ok(())
        } else {
            Err(AccessError::permission(
                "Organization is outside your scope",
            ))
        }
    }
}
