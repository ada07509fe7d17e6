//! Shared fixtures for access tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use warden_access::backend::local::{DEFAULT_ADMIN_PASSWORD, DEFAULT_ADMIN_USERNAME};
use warden_access::{
    AccessError, AccessManager, AccessResult, BackendKind, BackendSet, IdentityBackend,
    LocalBackend,
};
use warden_core::{
    AccountRequest, NewOrganization, NewUser, Organization, OrganizationUpdate, Profile,
    RequestStatus, Role, User, UserUpdate, DEMO_ORGANIZATION_NAME, SYSTEM_ORGANIZATION_NAME,
};
use warden_store::{MemoryClientStorage, MemoryDocumentStore};

pub const MEMBER_PASSWORD: &str = "member-pass";

/// A manager over in-memory storage, with handles to that storage
pub struct TestApp {
    pub manager: AccessManager,
    pub store: MemoryDocumentStore,
    pub storage: MemoryClientStorage,
}

impl TestApp {
    /// Another manager over the same storage, as after a restart
    pub fn restart(&self) -> AccessManager {
        local_manager(&self.store, &self.storage)
    }

    pub async fn login_admin(&self) {
        self.manager
            .login(DEFAULT_ADMIN_USERNAME, DEFAULT_ADMIN_PASSWORD, false)
            .await
            .unwrap();
    }

    pub async fn switch_to_admin(&self) {
        self.manager.logout().await.unwrap();
        self.login_admin().await;
    }

    pub async fn login_as(&self, username: &str) {
        self.manager.logout().await.unwrap();
        self.manager
            .login(username, MEMBER_PASSWORD, false)
            .await
            .unwrap();
    }

    pub async fn organization(&self, name: &str) -> Organization {
        self.manager
            .list_organizations()
            .await
            .unwrap()
            .into_iter()
            .find(|o| o.name == name)
            .unwrap_or_else(|| panic!("organization {} not visible", name))
    }

    pub async fn system(&self) -> Organization {
        self.organization(SYSTEM_ORGANIZATION_NAME).await
    }

    pub async fn demo(&self) -> Organization {
        self.organization(DEMO_ORGANIZATION_NAME).await
    }

    /// Create a user as the signed-in caller
    pub async fn create_member(&self, username: &str, role: Role, organization_id: &str) -> User {
        self.manager
            .create_user(NewUser {
                username: username.to_string(),
                email: format!("{}@example.com", username),
                password: MEMBER_PASSWORD.to_string(),
                role,
                organization_id: Some(organization_id.to_string()),
                is_active: true,
            })
            .await
            .unwrap()
    }
}

pub fn local_manager(store: &MemoryDocumentStore, storage: &MemoryClientStorage) -> AccessManager {
    let local: Arc<dyn IdentityBackend> = Arc::new(LocalBackend::new(
        Arc::new(store.clone()),
        Arc::new(storage.clone()),
    ));
    AccessManager::new(BackendSet { remote: None, local }, Arc::new(storage.clone()))
}

pub async fn spawn_local() -> TestApp {
    let store = MemoryDocumentStore::new();
    let storage = MemoryClientStorage::new();
    let manager = local_manager(&store, &storage);
    manager.initialize().await.unwrap();

    TestApp {
        manager,
        store,
        storage,
    }
}

/// Remote stand-in whose initialization always fails
#[derive(Default)]
pub struct UnreachableBackend {
    pub initialize_calls: AtomicUsize,
}

impl UnreachableBackend {
    pub fn calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }
}

fn unreachable() -> AccessError {
    AccessError::backend("identity service unreachable")
}

#[async_trait::async_trait]
impl IdentityBackend for UnreachableBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn initialize(&self) -> AccessResult<()> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        Err(unreachable())
    }

    async fn restore_session(&self) -> AccessResult<Option<Profile>> {
        Err(unreachable())
    }

    async fn sign_in(&self, _identifier: &str, _secret: &str) -> AccessResult<Profile> {
        Err(unreachable())
    }

    async fn sign_out(&self) -> AccessResult<()> {
        Err(unreachable())
    }

    async fn list_organizations(&self) -> AccessResult<Vec<Organization>> {
        Err(unreachable())
    }

    async fn get_organization(&self, _id: &str) -> AccessResult<Option<Organization>> {
        Err(unreachable())
    }

    async fn create_organization(&self, _input: &NewOrganization) -> AccessResult<Organization> {
        Err(unreachable())
    }

    async fn update_organization(
        &self,
        _id: &str,
        _update: &OrganizationUpdate,
    ) -> AccessResult<Organization> {
        Err(unreachable())
    }

    async fn delete_organization(&self, _id: &str) -> AccessResult<()> {
        Err(unreachable())
    }

    async fn list_users(&self, _organization_id: Option<&str>) -> AccessResult<Vec<Profile>> {
        Err(unreachable())
    }

    async fn get_user(&self, _id: &str) -> AccessResult<Option<Profile>> {
        Err(unreachable())
    }

    async fn create_user(&self, _input: &NewUser) -> AccessResult<User> {
        Err(unreachable())
    }

    async fn update_user(&self, _id: &str, _update: &UserUpdate) -> AccessResult<User> {
        Err(unreachable())
    }

    async fn delete_user(&self, _id: &str) -> AccessResult<()> {
        Err(unreachable())
    }

    async fn insert_account_request(&self, _request: &AccountRequest) -> AccessResult<AccountRequest> {
        Err(unreachable())
    }

    async fn get_account_request(&self, _id: &str) -> AccessResult<Option<AccountRequest>> {
        Err(unreachable())
    }

    async fn list_account_requests(
        &self,
        _status: Option<RequestStatus>,
        _organization_id: Option<&str>,
    ) -> AccessResult<Vec<AccountRequest>> {
        Err(unreachable())
    }

    async fn resolve_account_request(&self, _resolved: &AccountRequest) -> AccessResult<AccountRequest> {
        Err(unreachable())
    }

    fn temporary_password(&self) -> String {
        String::new()
    }
}
