//! Remote identity backend
//!
//! Maps identity operations onto the hosted service: credentials go through
//! the auth endpoints, records live in the `profiles`, `organizations` and
//! `account_requests` tables. Row-level policies on the service still apply
//! on top of the manager's checks.

use super::{BackendKind, IdentityBackend};
use crate::{AccessError, AccessResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_core::{
    AccountRequest, NewOrganization, NewUser, Organization, OrganizationUpdate, Profile,
    RequestStatus, Role, User, UserUpdate, WardenError,
};
use warden_remote::{Order, Query, RemoteClient};
use warden_store::{ClientStorage, REMOTE_SESSION_KEY};

const PROFILES: &str = "profiles";
const ORGANIZATIONS: &str = "organizations";
const ACCOUNT_REQUESTS: &str = "account_requests";

/// Profiles with their organization embedded
const PROFILE_COLUMNS: &str = "*,organizations(*)";

const TEMPORARY_PASSWORD_LENGTH: usize = 16;

#[derive(Debug, Deserialize)]
struct OrganizationRow {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Organization {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    id: String,
    username: String,
    email: String,
    role: Role,
    organization_id: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default = "default_active")]
    is_active: bool,
    #[serde(default)]
    organizations: Option<OrganizationRow>,
}

impl ProfileRow {
    fn into_profile(self) -> Profile {
        let organization = self.organizations.map(Organization::from);
        let user = User {
            id: self.id,
            username: self.username,
            email: self.email,
            role: self.role,
            organization_id: self.organization_id,
            created_at: self.created_at,
            is_active: self.is_active,
        };
        Profile::new(user, organization)
    }
}

#[derive(Debug, Deserialize)]
struct AccountRequestRow {
    id: String,
    username: String,
    email: String,
    requested_role: Role,
    organization_id: Option<String>,
    message: Option<String>,
    status: RequestStatus,
    created_at: DateTime<Utc>,
    #[serde(default)]
    approved_by: Option<String>,
    #[serde(default)]
    approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    rejected_by: Option<String>,
    #[serde(default)]
    rejected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    rejection_reason: Option<String>,
}

impl From<AccountRequestRow> for AccountRequest {
    fn from(row: AccountRequestRow) -> Self {
        AccountRequest {
            id: row.id,
            username: row.username,
            email: row.email,
            requested_role: row.requested_role,
            organization_id: row.organization_id,
            message: row.message,
            status: row.status,
            created_at: row.created_at,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            rejected_by: row.rejected_by,
            rejected_at: row.rejected_at,
            rejection_reason: row.rejection_reason,
        }
    }
}

pub struct RemoteBackend {
    client: Arc<RemoteClient>,
    session: Arc<dyn ClientStorage>,
}

impl RemoteBackend {
    pub fn new(client: Arc<RemoteClient>, session: Arc<dyn ClientStorage>) -> Self {
        Self { client, session }
    }

    async fn fetch_profile(&self, id: &str) -> AccessResult<Option<Profile>> {
        let rows: Vec<ProfileRow> = self
            .client
            .select(PROFILES, &Query::new().select(PROFILE_COLUMNS).eq("id", id).limit(1))
            .await?;
        Ok(rows.into_iter().next().map(ProfileRow::into_profile))
    }

    async fn fetch_user(&self, id: &str) -> AccessResult<User> {
        self.fetch_profile(id)
            .await?
            .map(|profile| profile.user)
            .ok_or_else(|| AccessError::not_found(format!("User {}", id)))
    }

    /// Sign out locally and remotely after a sign-in that cannot be used
    async fn abandon_session(&self) {
        if let Err(e) = self.client.sign_out().await {
            warn!("Failed to end remote session: {}", e);
        }
        if let Err(e) = self.session.remove(REMOTE_SESSION_KEY).await {
            warn!("Failed to clear stored remote session: {}", e);
        }
    }
}

#[async_trait]
impl IdentityBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn initialize(&self) -> AccessResult<()> {
        self.client.health_check().await.map_err(|e| AccessError::Backend {
            message: format!("Remote identity service unavailable: {}", e),
            source: Some(Box::new(e)),
        })?;
        info!(url = %self.client.config().base_url, "Connected to remote identity service");
        Ok(())
    }

    async fn restore_session(&self) -> AccessResult<Option<Profile>> {
        let Some(token) = self.session.get(REMOTE_SESSION_KEY).await? else {
            return Ok(None);
        };

        let Some(auth_user) = self.client.restore_session(&token).await? else {
            self.session.remove(REMOTE_SESSION_KEY).await?;
            return Ok(None);
        };

        match self.fetch_profile(&auth_user.id).await? {
            Some(profile) if profile.user.is_active => Ok(Some(profile)),
            _ => {
                debug!(user_id = %auth_user.id, "Remote session has no active profile");
                self.abandon_session().await;
                Ok(None)
            }
        }
    }

    async fn sign_in(&self, identifier: &str, secret: &str) -> AccessResult<Profile> {
        let session = match self.client.sign_in_with_password(identifier, secret).await {
            Ok(session) => session,
            Err(WardenError::Authentication { .. }) => return Err(AccessError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        let profile = match self.fetch_profile(&session.user.id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                self.abandon_session().await;
                return Err(AccessError::not_found("No profile exists for this account"));
            }
            Err(e) => {
                self.abandon_session().await;
                return Err(e);
            }
        };

        self.session
            .set(REMOTE_SESSION_KEY, &session.access_token)
            .await?;
        Ok(profile)
    }

    async fn sign_out(&self) -> AccessResult<()> {
        self.session.remove(REMOTE_SESSION_KEY).await?;
        self.client.sign_out().await?;
        Ok(())
    }

    async fn list_organizations(&self) -> AccessResult<Vec<Organization>> {
        let rows: Vec<OrganizationRow> = self
            .client
            .select(ORGANIZATIONS, &Query::new().order_by("name", Order::Ascending))
            .await?;
        Ok(rows.into_iter().map(Organization::from).collect())
    }

    async fn get_organization(&self, id: &str) -> AccessResult<Option<Organization>> {
        let rows: Vec<OrganizationRow> = self
            .client
            .select(ORGANIZATIONS, &Query::new().eq("id", id).limit(1))
            .await?;
        Ok(rows.into_iter().next().map(Organization::from))
    }

    async fn create_organization(&self, input: &NewOrganization) -> AccessResult<Organization> {
        let row: OrganizationRow = self
            .client
            .insert(ORGANIZATIONS, &json!({ "name": input.name }))
            .await?;
        Ok(row.into())
    }

    async fn update_organization(
        &self,
        id: &str,
        update: &OrganizationUpdate,
    ) -> AccessResult<Organization> {
        let Some(name) = &update.name else {
            return self
                .get_organization(id)
                .await?
                .ok_or_else(|| AccessError::not_found(format!("Organization {}", id)));
        };

        let rows: Vec<OrganizationRow> = self
            .client
            .update(ORGANIZATIONS, &Query::new().eq("id", id), &json!({ "name": name }))
            .await?;
        rows.into_iter()
            .next()
            .map(Organization::from)
            .ok_or_else(|| AccessError::not_found(format!("Organization {}", id)))
    }

    async fn delete_organization(&self, id: &str) -> AccessResult<()> {
        // Referential constraints on the service reject deletes of organizations in use
        self.client
            .delete(ORGANIZATIONS, &Query::new().eq("id", id))
            .await?;
        Ok(())
    }

    async fn list_users(&self, organization_id: Option<&str>) -> AccessResult<Vec<Profile>> {
        let mut query = Query::new()
            .select(PROFILE_COLUMNS)
            .order_by("created_at", Order::Ascending);
        if let Some(id) = organization_id {
            query = query.eq("organization_id", id);
        }

        let rows: Vec<ProfileRow> = self.client.select(PROFILES, &query).await?;
        Ok(rows.into_iter().map(ProfileRow::into_profile).collect())
    }

    async fn get_user(&self, id: &str) -> AccessResult<Option<Profile>> {
        self.fetch_profile(id).await
    }

    async fn create_user(&self, input: &NewUser) -> AccessResult<User> {
        let identity = self
            .client
            .admin_create_user(
                &input.email,
                &input.password,
                json!({ "username": input.username }),
            )
            .await?;

        let profile = json!({
            "id": identity.id,
            "username": input.username,
            "email": input.email,
            "role": input.role,
            "organization_id": input.organization_id,
            "is_active": input.is_active,
        });

        match self.client.insert::<_, ProfileRow>(PROFILES, &profile).await {
            Ok(row) => Ok(row.into_profile().user),
            Err(e) => {
                warn!(user_id = %identity.id, "Profile insert failed, removing identity");
                if let Err(cleanup) = self.client.admin_delete_user(&identity.id).await {
                    warn!("Failed to remove orphaned identity: {}", cleanup);
                }
                Err(e.into())
            }
        }
    }

    async fn update_user(&self, id: &str, update: &UserUpdate) -> AccessResult<User> {
        let mut credentials = Map::new();
        if let Some(email) = &update.email {
            credentials.insert("email".to_string(), json!(email));
        }
        if let Some(password) = &update.password {
            credentials.insert("password".to_string(), json!(password));
        }

        if !credentials.is_empty() {
            let own = self
                .client
                .session()
                .await
                .is_some_and(|session| session.user.id == id);
            if own {
                self.client.update_current_user(Value::Object(credentials)).await?;
            } else {
                self.client
                    .admin_update_user(id, Value::Object(credentials))
                    .await?;
            }
        }

        let mut changes = Map::new();
        if let Some(username) = &update.username {
            changes.insert("username".to_string(), json!(username));
        }
        if let Some(email) = &update.email {
            changes.insert("email".to_string(), json!(email));
        }
        if let Some(role) = update.role {
            changes.insert("role".to_string(), json!(role));
        }
        if let Some(organization_id) = &update.organization_id {
            changes.insert("organization_id".to_string(), json!(organization_id));
        }
        if let Some(is_active) = update.is_active {
            changes.insert("is_active".to_string(), json!(is_active));
        }

        if changes.is_empty() {
            return self.fetch_user(id).await;
        }

        let rows: Vec<ProfileRow> = self
            .client
            .update(PROFILES, &Query::new().eq("id", id), &Value::Object(changes))
            .await?;
        rows.into_iter()
            .next()
            .map(|row| row.into_profile().user)
            .ok_or_else(|| AccessError::not_found(format!("User {}", id)))
    }

    async fn delete_user(&self, id: &str) -> AccessResult<()> {
        self.client
            .delete(PROFILES, &Query::new().eq("id", id))
            .await?;

        match self.client.admin_delete_user(id).await {
            Ok(()) => Ok(()),
            Err(e @ WardenError::Config { .. }) => {
                warn!(user_id = %id, "Profile deleted but identity kept: {}", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_account_request(&self, request: &AccountRequest) -> AccessResult<AccountRequest> {
        let row = json!({
            "id": request.id,
            "username": request.username,
            "email": request.email,
            "requested_role": request.requested_role,
            "organization_id": request.organization_id,
            "message": request.message,
            "status": request.status,
            "created_at": request.created_at,
        });

        let stored: AccountRequestRow = self.client.insert(ACCOUNT_REQUESTS, &row).await?;
        Ok(stored.into())
    }

    async fn get_account_request(&self, id: &str) -> AccessResult<Option<AccountRequest>> {
        let rows: Vec<AccountRequestRow> = self
            .client
            .select(ACCOUNT_REQUESTS, &Query::new().eq("id", id).limit(1))
            .await?;
        Ok(rows.into_iter().next().map(AccountRequest::from))
    }

    async fn list_account_requests(
        &self,
        status: Option<RequestStatus>,
        organization_id: Option<&str>,
    ) -> AccessResult<Vec<AccountRequest>> {
        let mut query = Query::new().order_by("created_at", Order::Descending);
        if let Some(status) = status {
            query = query.eq("status", status);
        }
        if let Some(id) = organization_id {
            query = query.eq("organization_id", id);
        }

        let rows: Vec<AccountRequestRow> = self.client.select(ACCOUNT_REQUESTS, &query).await?;
        Ok(rows.into_iter().map(AccountRequest::from).collect())
    }

    async fn resolve_account_request(&self, resolved: &AccountRequest) -> AccessResult<AccountRequest> {
        let changes = json!({
            "status": resolved.status,
            "approved_by": resolved.approved_by,
            "approved_at": resolved.approved_at,
            "rejected_by": resolved.rejected_by,
            "rejected_at": resolved.rejected_at,
            "rejection_reason": resolved.rejection_reason,
        });

        // Filtering on status makes the transition conditional on the row still being pending
        let query = Query::new()
            .eq("id", &resolved.id)
            .eq("status", RequestStatus::Pending);
        let rows: Vec<AccountRequestRow> = self
            .client
            .update(ACCOUNT_REQUESTS, &query, &changes)
            .await?;

        rows.into_iter()
            .next()
            .map(AccountRequest::from)
            .ok_or_else(|| {
                AccessError::conflict(format!("Account request {} is no longer pending", resolved.id))
            })
    }

    fn temporary_password(&self) -> String {
        (0..TEMPORARY_PASSWORD_LENGTH)
            .map(|_| fastrand::alphanumeric())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_remote::RemoteClientConfig;
    use warden_store::MemoryClientStorage;

    #[test]
    fn test_profile_row_embeds_organization() {
        let row: ProfileRow = serde_json::from_value(json!({
            "id": "u1",
            "username": "ada",
            "email": "ada@example.com",
            "role": "org_admin",
            "organization_id": "o1",
            "created_at": "2024-01-01T00:00:00Z",
            "organizations": { "id": "o1", "name": "Acme", "created_at": "2024-01-01T00:00:00Z" }
        }))
        .unwrap();

        let profile = row.into_profile();
        assert!(profile.user.is_active);
        assert_eq!(profile.user.role, Role::OrgAdmin);
        assert_eq!(profile.organization.unwrap().name, "Acme");
    }

    #[test]
    fn test_temporary_passwords_are_random() {
        let client = RemoteClient::new(RemoteClientConfig::new("http://127.0.0.1:1", "key")).unwrap();
        let backend = RemoteBackend::new(Arc::new(client), Arc::new(MemoryClientStorage::new()));

        let first = backend.temporary_password();
        let second = backend.temporary_password();
        assert_eq!(first.len(), TEMPORARY_PASSWORD_LENGTH);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first, second);
    }
}
