//! Local identity backend
//!
//! Keeps organizations, users and account requests in the local document
//! store. Every change is a read-modify-write of the whole document. The
//! signed-in user is kept in client storage under `SESSION_USER_KEY`.

use super::schema::{LocalData, StoredUser, LOCAL_SCHEMA_VERSION};
use super::{BackendKind, IdentityBackend};
use crate::{AccessError, AccessResult};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_core::{
    AccountRequest, NewOrganization, NewUser, Organization, OrganizationUpdate, Profile,
    RequestStatus, Role, User, UserUpdate, DEMO_ORGANIZATION_NAME, SYSTEM_ORGANIZATION_NAME,
};
use warden_store::{ClientStorage, DocumentStore, SESSION_USER_KEY};

/// Username of the administrator created on an empty store
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
/// Initial credential of the bootstrap administrator
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
const DEFAULT_ADMIN_EMAIL: &str = "admin@warden.local";

/// Placeholder credential for users provisioned from account requests
pub const LOCAL_TEMPORARY_PASSWORD: &str = "changeme";

pub struct LocalBackend {
    store: Arc<dyn DocumentStore>,
    session: Arc<dyn ClientStorage>,
}

impl LocalBackend {
    pub fn new(store: Arc<dyn DocumentStore>, session: Arc<dyn ClientStorage>) -> Self {
        Self { store, session }
    }

    /// Current data; an empty store reads as empty collections
    async fn read(&self) -> AccessResult<LocalData> {
        let document = self.store.load().await?;
        Ok(LocalData::from_document(document)?
            .map(|(data, _)| data)
            .unwrap_or_else(|| LocalData {
                schema_version: LOCAL_SCHEMA_VERSION,
                ..Default::default()
            }))
    }

    async fn write(&self, data: &LocalData) -> AccessResult<()> {
        self.store.save(&data.to_document()?).await?;
        Ok(())
    }

    fn bootstrap_data() -> LocalData {
        let system = Organization::new(SYSTEM_ORGANIZATION_NAME);
        let demo = Organization::new(DEMO_ORGANIZATION_NAME);

        let admin = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: DEFAULT_ADMIN_USERNAME.to_string(),
            email: DEFAULT_ADMIN_EMAIL.to_string(),
            role: Role::Admin,
            organization_id: Some(system.id.clone()),
            created_at: Utc::now(),
            is_active: true,
        };

        LocalData {
            schema_version: LOCAL_SCHEMA_VERSION,
            organizations: vec![system, demo],
            users: vec![StoredUser {
                user: admin,
                password: DEFAULT_ADMIN_PASSWORD.to_string(),
            }],
            account_requests: Vec::new(),
        }
    }

    fn check_username_free(data: &LocalData, username: &str, except: Option<&str>) -> AccessResult<()> {
        let taken = data.users.iter().any(|stored| {
            stored.user.username.eq_ignore_ascii_case(username) && Some(stored.user.id.as_str()) != except
        });
        if taken {
            return Err(AccessError::conflict(format!("Username '{}' is already taken", username)));
        }
        Ok(())
    }

    fn check_organization_exists(data: &LocalData, organization_id: Option<&str>) -> AccessResult<()> {
        match organization_id {
            Some(id) if data.organization(id).is_none() => {
                Err(AccessError::not_found(format!("Organization {}", id)))
            }
            _ => Ok(()),
        }
    }

    async fn persist_session(&self, user: &User) -> AccessResult<()> {
        let serialized = serde_json::to_string(user)
            .map_err(|e| AccessError::backend(format!("Failed to serialize session: {}", e)))?;
        self.session.set(SESSION_USER_KEY, &serialized).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn initialize(&self) -> AccessResult<()> {
        self.store.health_check().await?;
        let document = self.store.load().await?;

        match LocalData::from_document(document)? {
            None => {
                let data = Self::bootstrap_data();
                self.write(&data).await?;
                info!(
                    organizations = data.organizations.len(),
                    "Bootstrapped empty local store with default administrator"
                );
            }
            Some((data, true)) => {
                self.write(&data).await?;
                info!(version = LOCAL_SCHEMA_VERSION, "Upgraded local data schema");
            }
            Some((_, false)) => debug!("Local data is current"),
        }

        Ok(())
    }

    async fn restore_session(&self) -> AccessResult<Option<Profile>> {
        let Some(serialized) = self.session.get(SESSION_USER_KEY).await? else {
            return Ok(None);
        };

        let saved: User = match serde_json::from_str(&serialized) {
            Ok(user) => user,
            Err(e) => {
                warn!("Discarding unreadable local session: {}", e);
                self.session.remove(SESSION_USER_KEY).await?;
                return Ok(None);
            }
        };

        // Re-read the record so changes made since sign-in apply
        let data = self.read().await?;
        match data.user(&saved.id) {
            Some(stored) if stored.user.is_active => Ok(Some(data.profile(&stored.user))),
            _ => {
                debug!(user_id = %saved.id, "Saved session user no longer valid");
                self.session.remove(SESSION_USER_KEY).await?;
                Ok(None)
            }
        }
    }

    async fn sign_in(&self, identifier: &str, secret: &str) -> AccessResult<Profile> {
        if secret.is_empty() {
            return Err(AccessError::InvalidCredentials);
        }
        let data = self.read().await?;

        // TODO: compare against a password hash once local credentials are hashed
        let stored = data
            .users
            .iter()
            .find(|stored| {
                (stored.user.username == identifier || stored.user.email == identifier)
                    && stored.password == secret
                    && stored.user.is_active
            })
            .ok_or(AccessError::InvalidCredentials)?;

        self.persist_session(&stored.user).await?;
        Ok(data.profile(&stored.user))
    }

    async fn sign_out(&self) -> AccessResult<()> {
        self.session.remove(SESSION_USER_KEY).await?;
        Ok(())
    }

    async fn list_organizations(&self) -> AccessResult<Vec<Organization>> {
        Ok(self.read().await?.organizations)
    }

    async fn get_organization(&self, id: &str) -> AccessResult<Option<Organization>> {
        Ok(self.read().await?.organization(id).cloned())
    }

    async fn create_organization(&self, input: &NewOrganization) -> AccessResult<Organization> {
        let mut data = self.read().await?;
        if data
            .organizations
            .iter()
            .any(|o| o.name.eq_ignore_ascii_case(&input.name))
        {
            return Err(AccessError::conflict(format!(
                "Organization '{}' already exists",
                input.name
            )));
        }

        let organization = Organization::new(input.name.clone());
        data.organizations.push(organization.clone());
        self.write(&data).await?;
        Ok(organization)
    }

    async fn update_organization(
        &self,
        id: &str,
        update: &OrganizationUpdate,
    ) -> AccessResult<Organization> {
        let mut data = self.read().await?;
        let index = data
            .organizations
            .iter()
            .position(|o| o.id == id)
            .ok_or_else(|| AccessError::not_found(format!("Organization {}", id)))?;

        let current = &data.organizations[index];
        let updated = Organization {
            name: update.name.clone().unwrap_or_else(|| current.name.clone()),
            ..current.clone()
        };

        if data
            .organizations
            .iter()
            .any(|o| o.id != id && o.name.eq_ignore_ascii_case(&updated.name))
        {
            return Err(AccessError::conflict(format!(
                "Organization '{}' already exists",
                updated.name
            )));
        }

        data.organizations[index] = updated.clone();
        self.write(&data).await?;
        Ok(updated)
    }

    async fn delete_organization(&self, id: &str) -> AccessResult<()> {
        let mut data = self.read().await?;
        if data.organization(id).is_none() {
            return Err(AccessError::not_found(format!("Organization {}", id)));
        }

        let users_before = data.users.len();
        data.organizations.retain(|o| o.id != id);
        data.users
            .retain(|stored| stored.user.organization_id.as_deref() != Some(id));

        self.write(&data).await?;
        info!(
            organization_id = %id,
            removed_users = users_before - data.users.len(),
            "Deleted organization"
        );
        Ok(())
    }

    async fn list_users(&self, organization_id: Option<&str>) -> AccessResult<Vec<Profile>> {
        let data = self.read().await?;
        Ok(data
            .users
            .iter()
            .filter(|stored| {
                organization_id.is_none() || stored.user.organization_id.as_deref() == organization_id
            })
            .map(|stored| data.profile(&stored.user))
            .collect())
    }

    async fn get_user(&self, id: &str) -> AccessResult<Option<Profile>> {
        let data = self.read().await?;
        Ok(data.user(id).map(|stored| data.profile(&stored.user)))
    }

    async fn create_user(&self, input: &NewUser) -> AccessResult<User> {
        let mut data = self.read().await?;
        Self::check_username_free(&data, &input.username, None)?;
        Self::check_organization_exists(&data, input.organization_id.as_deref())?;

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: input.username.clone(),
            email: input.email.clone(),
            role: input.role,
            organization_id: input.organization_id.clone(),
            created_at: Utc::now(),
            is_active: input.is_active,
        };

        data.users.push(StoredUser {
            user: user.clone(),
            password: input.password.clone(),
        });
        self.write(&data).await?;
        Ok(user)
    }

    async fn update_user(&self, id: &str, update: &UserUpdate) -> AccessResult<User> {
        let mut data = self.read().await?;
        let index = data
            .users
            .iter()
            .position(|stored| stored.user.id == id)
            .ok_or_else(|| AccessError::not_found(format!("User {}", id)))?;

        if let Some(username) = &update.username {
            Self::check_username_free(&data, username, Some(id))?;
        }
        Self::check_organization_exists(&data, update.organization_id.as_deref())?;

        let current = &data.users[index];
        let replacement = StoredUser {
            user: update.apply(&current.user),
            password: update
                .password
                .clone()
                .unwrap_or_else(|| current.password.clone()),
        };

        let user = replacement.user.clone();
        data.users[index] = replacement;
        self.write(&data).await?;
        Ok(user)
    }

    async fn delete_user(&self, id: &str) -> AccessResult<()> {
        let mut data = self.read().await?;
        let before = data.users.len();
        data.users.retain(|stored| stored.user.id != id);
        if data.users.len() == before {
            return Err(AccessError::not_found(format!("User {}", id)));
        }
        self.write(&data).await
    }

    async fn insert_account_request(&self, request: &AccountRequest) -> AccessResult<AccountRequest> {
        let mut data = self.read().await?;
        data.account_requests.push(request.clone());
        self.write(&data).await?;
        Ok(request.clone())
    }

    async fn get_account_request(&self, id: &str) -> AccessResult<Option<AccountRequest>> {
        let data = self.read().await?;
        Ok(data.account_requests.into_iter().find(|r| r.id == id))
    }

    async fn list_account_requests(
        &self,
        status: Option<RequestStatus>,
        organization_id: Option<&str>,
    ) -> AccessResult<Vec<AccountRequest>> {
        let data = self.read().await?;
        let mut requests: Vec<AccountRequest> = data
            .account_requests
            .into_iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .filter(|r| organization_id.is_none() || r.organization_id.as_deref() == organization_id)
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn resolve_account_request(&self, resolved: &AccountRequest) -> AccessResult<AccountRequest> {
        let mut data = self.read().await?;
        let index = data
            .account_requests
            .iter()
            .position(|r| r.id == resolved.id)
            .ok_or_else(|| AccessError::not_found(format!("Account request {}", resolved.id)))?;

        if data.account_requests[index].status != RequestStatus::Pending {
            return Err(AccessError::conflict(format!(
                "Account request {} is already {}",
                resolved.id, data.account_requests[index].status
            )));
        }

        data.account_requests[index] = resolved.clone();
        self.write(&data).await?;
        Ok(resolved.clone())
    }

    fn temporary_password(&self) -> String {
        LOCAL_TEMPORARY_PASSWORD.to_string()
    }

    async fn export_data(&self) -> AccessResult<String> {
        Ok(self.store.export().await?)
    }

    async fn import_data(&self, payload: &str) -> AccessResult<()> {
        // Reject documents this build cannot read before replacing anything
        if let Ok(document @ Value::Object(_)) = serde_json::from_str::<Value>(payload) {
            LocalData::from_document(document)?;
        }

        self.store.import(payload).await?;
        self.initialize().await
    }

    async fn reset_data(&self) -> AccessResult<()> {
        self.store.clear().await?;
        self.session.remove(SESSION_USER_KEY).await?;
        self.initialize().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_store::{MemoryClientStorage, MemoryDocumentStore};

    fn backend() -> LocalBackend {
        LocalBackend::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryClientStorage::new()),
        )
    }

    #[tokio::test]
    async fn test_initialize_bootstraps_once() {
        let backend = backend();
        backend.initialize().await.unwrap();
        backend.initialize().await.unwrap();

        assert_eq!(backend.list_organizations().await.unwrap().len(), 2);
        let users = backend.list_users(None).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user.role, Role::Admin);
        assert_eq!(
            users[0].organization.as_ref().map(|o| o.name.as_str()),
            Some(SYSTEM_ORGANIZATION_NAME)
        );
    }

    #[tokio::test]
    async fn test_sign_in_by_username_or_email() {
        let backend = backend();
        backend.initialize().await.unwrap();

        backend
            .sign_in(DEFAULT_ADMIN_USERNAME, DEFAULT_ADMIN_PASSWORD)
            .await
            .unwrap();
        backend
            .sign_in(DEFAULT_ADMIN_EMAIL, DEFAULT_ADMIN_PASSWORD)
            .await
            .unwrap();

        let restored = backend.restore_session().await.unwrap().unwrap();
        assert_eq!(restored.user.username, DEFAULT_ADMIN_USERNAME);

        backend.sign_out().await.unwrap();
        assert!(backend.restore_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inactive_user_cannot_sign_in() {
        let backend = backend();
        backend.initialize().await.unwrap();
        let system = backend.list_organizations().await.unwrap()[0].clone();

        backend
            .create_user(&NewUser {
                username: "dormant".to_string(),
                email: "dormant@example.com".to_string(),
                password: "pw".to_string(),
                role: Role::Viewer,
                organization_id: Some(system.id),
                is_active: false,
            })
            .await
            .unwrap();

        let result = backend.sign_in("dormant", "pw").await;
        assert!(matches!(result, Err(AccessError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let backend = backend();
        backend.initialize().await.unwrap();

        let result = backend
            .create_user(&NewUser {
                username: "ADMIN".to_string(),
                email: "other@example.com".to_string(),
                password: "pw".to_string(),
                role: Role::Viewer,
                organization_id: None,
                is_active: true,
            })
            .await;
        assert!(matches!(result, Err(AccessError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_delete_organization_cascades_to_users() {
        let backend = backend();
        backend.initialize().await.unwrap();
        let demo = backend
            .list_organizations()
            .await
            .unwrap()
            .into_iter()
            .find(|o| o.name == DEMO_ORGANIZATION_NAME)
            .unwrap();

        backend
            .create_user(&NewUser {
                username: "member".to_string(),
                email: "member@example.com".to_string(),
                password: "pw".to_string(),
                role: Role::Editor,
                organization_id: Some(demo.id.clone()),
                is_active: true,
            })
            .await
            .unwrap();
        assert_eq!(backend.list_users(Some(&demo.id)).await.unwrap().len(), 1);

        backend.delete_organization(&demo.id).await.unwrap();
        assert!(backend.list_users(Some(&demo.id)).await.unwrap().is_empty());
        assert_eq!(backend.list_users(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_only_pending_requests() {
        let backend = backend();
        backend.initialize().await.unwrap();

        let request = AccountRequest::pending(warden_core::AccountRequestInput {
            username: "newcomer".to_string(),
            email: "newcomer@example.com".to_string(),
            requested_role: Role::Viewer,
            organization_id: None,
            message: None,
        });
        backend.insert_account_request(&request).await.unwrap();

        backend
            .resolve_account_request(&request.rejected("admin", None))
            .await
            .unwrap();
        let again = backend.resolve_account_request(&request.approved("admin")).await;
        assert!(matches!(again, Err(AccessError::Conflict { .. })));
    }
}
