//! Permission System
//!
//! Fixed mapping from role to granted permissions. `Admin` and `OrgAdmin`
//! share a permission set and differ only in organization scope, which is
//! enforced by [`AccessContext`](super::AccessContext).

use std::collections::HashSet;
use warden_core::{Permission, Role};

/// Every permission granted to `role`
pub fn role_permissions(role: Role) -> HashSet<Permission> {
    let granted: &[Permission] = match role {
        Role::Admin | Role::OrgAdmin => &Permission::ALL,
        Role::Editor => &[
            Permission::View,
            Permission::Create,
            Permission::Edit,
            Permission::Delete,
            Permission::Export,
        ],
        Role::Viewer => &[Permission::View, Permission::Export],
    };

    granted.iter().copied().collect()
}

/// Whether `role` grants `permission`
pub fn role_grants(role: Role, permission: Permission) -> bool {
    role_permissions(role).contains(&permission)
}
