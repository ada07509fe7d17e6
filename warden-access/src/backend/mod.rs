//! Identity backends
//!
//! A backend stores identities and records and verifies credentials. It makes
//! no authorization decisions beyond what its own storage enforces; the
//! manager applies role and scope rules before calling in.

use crate::{AccessError, AccessResult};
use async_trait::async_trait;
use serde::Serialize;
use warden_core::{
    AccountRequest, NewOrganization, NewUser, Organization, OrganizationUpdate, Profile,
    RequestStatus, User, UserUpdate,
};

pub mod local;
pub mod remote;
pub mod schema;

pub use local::LocalBackend;
pub use remote::RemoteBackend;

/// Which backend is serving requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Remote,
    Local,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Remote => write!(f, "remote"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

#[async_trait]
pub trait IdentityBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Prepare the backend for use. Called once by the manager.
    async fn initialize(&self) -> AccessResult<()>;

    /// Profile of a session persisted by an earlier sign-in, if still valid
    async fn restore_session(&self) -> AccessResult<Option<Profile>>;

    /// Verify credentials and persist the session
    async fn sign_in(&self, identifier: &str, secret: &str) -> AccessResult<Profile>;

    async fn sign_out(&self) -> AccessResult<()>;

    async fn list_organizations(&self) -> AccessResult<Vec<Organization>>;

    async fn get_organization(&self, id: &str) -> AccessResult<Option<Organization>>;

    async fn create_organization(&self, input: &NewOrganization) -> AccessResult<Organization>;

    async fn update_organization(
        &self,
        id: &str,
        update: &OrganizationUpdate,
    ) -> AccessResult<Organization>;

    async fn delete_organization(&self, id: &str) -> AccessResult<()>;

    /// Users with their organization, optionally limited to one organization
    async fn list_users(&self, organization_id: Option<&str>) -> AccessResult<Vec<Profile>>;

    async fn get_user(&self, id: &str) -> AccessResult<Option<Profile>>;

    async fn create_user(&self, input: &NewUser) -> AccessResult<User>;

    async fn update_user(&self, id: &str, update: &UserUpdate) -> AccessResult<User>;

    async fn delete_user(&self, id: &str) -> AccessResult<()>;

    async fn insert_account_request(&self, request: &AccountRequest) -> AccessResult<AccountRequest>;

    async fn get_account_request(&self, id: &str) -> AccessResult<Option<AccountRequest>>;

    async fn list_account_requests(
        &self,
        status: Option<RequestStatus>,
        organization_id: Option<&str>,
    ) -> AccessResult<Vec<AccountRequest>>;

    /// Store a resolved request. Fails with `Conflict` unless the stored
    /// record is still pending.
    async fn resolve_account_request(&self, resolved: &AccountRequest) -> AccessResult<AccountRequest>;

    /// Initial credential for a user provisioned from an account request
    fn temporary_password(&self) -> String;

    /// Serialized backup of all backend data
    async fn export_data(&self) -> AccessResult<String> {
        Err(unsupported(self.kind(), "export"))
    }

    /// Replace all backend data with a backup
    async fn import_data(&self, _payload: &str) -> AccessResult<()> {
        Err(unsupported(self.kind(), "import"))
    }

    /// Wipe all data and start from a fresh bootstrap
    async fn reset_data(&self) -> AccessResult<()> {
        Err(unsupported(self.kind(), "reset"))
    }
}

fn unsupported(kind: BackendKind, operation: &str) -> AccessError {
    AccessError::validation(format!("Data {} is not available on the {} backend", operation, kind))
}
