//! Core data type definitions
//!
//! Records shared by every backend. Field names serialize camelCase, which is
//! the shape of the local document; remote row types map their own columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the root organization that can never be deleted
pub const SYSTEM_ORGANIZATION_NAME: &str = "System";

/// Name of the sample organization created when an empty local store is bootstrapped
pub const DEMO_ORGANIZATION_NAME: &str = "Demo Organization";

/// Privilege tier assigned to a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Global administrator
    Admin,
    /// Administrator bound to a single organization
    OrgAdmin,
    Editor,
    Viewer,
}

impl Role {
    /// Every role, most privileged first
    pub const ALL: [Role; 4] = [Role::Admin, Role::OrgAdmin, Role::Editor, Role::Viewer];

    /// Roles that only a global administrator may hand out
    pub fn is_administrative(&self) -> bool {
        matches!(self, Role::Admin | Role::OrgAdmin)
    }

    /// Whether the role is scoped to the whole system rather than one organization
    pub fn is_global(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::OrgAdmin => write!(f, "org_admin"),
            Role::Editor => write!(f, "editor"),
            Role::Viewer => write!(f, "viewer"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "org_admin" | "orgadmin" => Ok(Role::OrgAdmin),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// A single grantable capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    View,
    Create,
    Edit,
    Delete,
    Export,
    ManageUsers,
}

impl Permission {
    pub const ALL: [Permission; 6] = [
        Permission::View,
        Permission::Create,
        Permission::Edit,
        Permission::Delete,
        Permission::Export,
        Permission::ManageUsers,
    ];
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::View => write!(f, "view"),
            Permission::Create => write!(f, "create"),
            Permission::Edit => write!(f, "edit"),
            Permission::Delete => write!(f, "delete"),
            Permission::Export => write!(f, "export"),
            Permission::ManageUsers => write!(f, "manage_users"),
        }
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "view" => Ok(Permission::View),
            "create" => Ok(Permission::Create),
            "edit" => Ok(Permission::Edit),
            "delete" => Ok(Permission::Delete),
            "export" => Ok(Permission::Export),
            "manage_users" => Ok(Permission::ManageUsers),
            _ => Err(format!("Unknown permission: {}", s)),
        }
    }
}

/// Tenant boundary scoping users and data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }

    /// Whether this is the protected root organization
    pub fn is_system(&self) -> bool {
        self.name == SYSTEM_ORGANIZATION_NAME
    }
}

/// An account that can authenticate when active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub organization_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// A user joined with the organization it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(flatten)]
    pub user: User,
    pub organization: Option<Organization>,
}

impl Profile {
    pub fn new(user: User, organization: Option<Organization>) -> Self {
        Self { user, organization }
    }
}

/// Lifecycle of an account request; `Approved` and `Rejected` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Approved => write!(f, "approved"),
            RequestStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            _ => Err(format!("Unknown request status: {}", s)),
        }
    }
}

/// A self-service signup awaiting disposition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRequest {
    pub id: String,
    pub username: String,
    pub email: String,
    pub requested_role: Role,
    pub organization_id: Option<String>,
    pub message: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl AccountRequest {
    /// Build a fresh pending request from caller input
    pub fn pending(input: AccountRequestInput) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: input.username,
            email: input.email,
            requested_role: input.requested_role,
            organization_id: input.organization_id,
            message: input.message,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
        }
    }

    /// New record value marking this request approved
    pub fn approved(&self, approver_id: &str) -> Self {
        Self {
            status: RequestStatus::Approved,
            approved_by: Some(approver_id.to_string()),
            approved_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    /// New record value marking this request rejected
    pub fn rejected(&self, rejector_id: &str, reason: Option<String>) -> Self {
        Self {
            status: RequestStatus::Rejected,
            rejected_by: Some(rejector_id.to_string()),
            rejected_at: Some(Utc::now()),
            rejection_reason: reason,
            ..self.clone()
        }
    }
}

/// Input for `create_organization`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrganization {
    pub name: String,
}

/// Partial update for an organization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizationUpdate {
    pub name: Option<String>,
}

/// Input for `create_user`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub organization_id: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Partial update for a user; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub organization_id: Option<String>,
    pub is_active: Option<bool>,
}

impl UserUpdate {
    /// Whether the update touches fields only an administrator may change
    pub fn changes_privileges(&self) -> bool {
        self.role.is_some() || self.organization_id.is_some() || self.is_active.is_some()
    }

    /// Apply the update to a user record, producing a new value
    pub fn apply(&self, user: &User) -> User {
        User {
            username: self.username.clone().unwrap_or_else(|| user.username.clone()),
            email: self.email.clone().unwrap_or_else(|| user.email.clone()),
            role: self.role.unwrap_or(user.role),
            organization_id: self
                .organization_id
                .clone()
                .or_else(|| user.organization_id.clone()),
            is_active: self.is_active.unwrap_or(user.is_active),
            ..user.clone()
        }
    }
}

/// Input for an anonymous account request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRequestInput {
    pub username: String,
    pub email: String,
    pub requested_role: Role,
    pub organization_id: Option<String>,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_strings() {
        for role in Role::ALL {
            let parsed: Role = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::OrgAdmin).unwrap(), "\"org_admin\"");
        assert_eq!(
            serde_json::to_string(&Permission::ManageUsers).unwrap(),
            "\"manage_users\""
        );
    }

    #[test]
    fn test_request_transitions_build_new_values() {
        let request = AccountRequest::pending(AccountRequestInput {
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            requested_role: Role::Editor,
            organization_id: Some("org-1".to_string()),
            message: None,
        });

        let approved = request.approved("admin-1");
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(approved.approved_by.as_deref(), Some("admin-1"));
        assert!(approved.status.is_terminal());

        let rejected = request.rejected("admin-1", Some("duplicate".to_string()));
        assert_eq!(rejected.status, RequestStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("duplicate"));
    }

    #[test]
    fn test_profile_flattens_user_fields() {
        let org = Organization::new("Acme");
        let user = User {
            id: "u1".to_string(),
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            role: Role::Viewer,
            organization_id: Some(org.id.clone()),
            created_at: Utc::now(),
            is_active: true,
        };
        let json = serde_json::to_value(Profile::new(user, Some(org))).unwrap();
        assert_eq!(json["username"], "ada");
        assert_eq!(json["organization"]["name"], "Acme");
    }
}
