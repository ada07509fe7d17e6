//! Access Manager
//!
//! Owns backend selection and session state, and applies role and
//! organization scope rules before every backend call.

use crate::auth::AccessContext;
use crate::backend::{BackendKind, IdentityBackend};
use crate::{AccessError, AccessResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{broadcast, OnceCell};
use tracing::{debug, info, warn};
use warden_core::{
    log_operation_error, log_operation_start, log_operation_success, with_timeout, NewOrganization,
    NewUser, Organization, OrganizationUpdate, Permission, Profile, User, UserUpdate,
};
use warden_store::{ClientStorage, REMEMBERED_IDENTIFIER_KEY};

/// Backends available to a manager; `remote` is absent when not configured
#[derive(Clone)]
pub struct BackendSet {
    pub remote: Option<Arc<dyn IdentityBackend>>,
    pub local: Arc<dyn IdentityBackend>,
}

/// Session change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(User),
    Restored(User),
    SignedOut,
}

pub struct AccessManager {
    backends: BackendSet,
    preferences: Arc<dyn ClientStorage>,
    active: OnceCell<Arc<dyn IdentityBackend>>,
    fell_back: AtomicBool,
    session: RwLock<Option<Profile>>,
    events: broadcast::Sender<SessionEvent>,
}

impl AccessManager {
    /// Create a manager. No backend is touched until the first operation.
    pub fn new(backends: BackendSet, preferences: Arc<dyn ClientStorage>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            backends,
            preferences,
            active: OnceCell::new(),
            fell_back: AtomicBool::new(false),
            session: RwLock::new(None),
            events,
        }
    }

    /// Select and start a backend and restore any persisted session.
    ///
    /// Runs once; later calls return the backend chosen by the first call.
    pub async fn initialize(&self) -> AccessResult<BackendKind> {
        Ok(self.ensure_initialized().await?.kind())
    }

    /// Await the one-time initialization and return the active backend
    pub async fn ensure_initialized(&self) -> AccessResult<Arc<dyn IdentityBackend>> {
        self.active
            .get_or_try_init(|| self.select_backend())
            .await
            .cloned()
    }

    /// Initialize within `timeout_seconds`, for startup readiness gating
    pub async fn wait_ready(&self, timeout_seconds: u64) -> AccessResult<BackendKind> {
        with_timeout(
            self.initialize(),
            timeout_seconds.saturating_mul(1000),
            "access_manager_initialize",
        )
        .await?
    }

    async fn select_backend(&self) -> AccessResult<Arc<dyn IdentityBackend>> {
        log_operation_start!("initialize");

        match &self.backends.remote {
            Some(remote) if !self.fell_back.load(Ordering::SeqCst) => {
                match self.start(remote.clone()).await {
                    Ok(backend) => {
                        log_operation_success!("initialize", backend = "remote");
                        return Ok(backend);
                    }
                    Err(e) => {
                        self.fell_back.store(true, Ordering::SeqCst);
                        warn!(error = %e, "Remote backend failed to start, falling back to local store");
                    }
                }
            }
            Some(_) => debug!("Remote backend already failed once, staying local"),
            None => info!("Remote backend not configured, using local store"),
        }

        let backend = self.start(self.backends.local.clone()).await.inspect_err(|e| {
            log_operation_error!("initialize", e, backend = "local");
        })?;
        log_operation_success!("initialize", backend = "local");
        Ok(backend)
    }

    async fn start(&self, backend: Arc<dyn IdentityBackend>) -> AccessResult<Arc<dyn IdentityBackend>> {
        backend.initialize().await?;

        if let Some(profile) = backend.restore_session().await? {
            info!(user_id = %profile.user.id, backend = %backend.kind(), "Restored session");
            let user = profile.user.clone();
            self.set_session(Some(profile));
            self.emit(SessionEvent::Restored(user));
        }

        Ok(backend)
    }

    /// Kind of the active backend, if initialization has completed
    pub fn active_backend(&self) -> Option<BackendKind> {
        self.active.get().map(|backend| backend.kind())
    }

    /// Whether initialization fell back from the remote backend
    pub fn used_fallback(&self) -> bool {
        self.fell_back.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_session(&self, profile: Option<Profile>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = profile;
    }

    pub fn current_profile(&self) -> Option<Profile> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.current_profile().map(|profile| profile.user)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Authorization snapshot of the current session
    pub fn context(&self) -> AccessContext {
        AccessContext::new(self.current_user())
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.context().has_permission(permission)
    }

    pub fn can_access_organization(&self, organization_id: &str) -> bool {
        self.context().can_access_organization(organization_id)
    }

    /// Login identifier saved by a previous `login(.., remember = true)`
    pub async fn remembered_identifier(&self) -> AccessResult<Option<String>> {
        Ok(self.preferences.get(REMEMBERED_IDENTIFIER_KEY).await?)
    }

    /// Sign in. A failed attempt leaves the current session untouched.
    pub async fn login(&self, identifier: &str, secret: &str, remember: bool) -> AccessResult<Profile> {
        let backend = self.ensure_initialized().await?;
        log_operation_start!("login", identifier = %identifier);

        let profile = match backend.sign_in(identifier, secret).await {
            Ok(profile) => profile,
            Err(e) => {
                log_operation_error!("login", e, identifier = %identifier);
                return Err(e);
            }
        };

        if !profile.user.is_active {
            warn!(user_id = %profile.user.id, "Inactive account signed in, ending session");
            if let Err(e) = backend.sign_out().await {
                warn!("Failed to end session of inactive account: {}", e);
            }
            return Err(AccessError::permission("Account is inactive"));
        }

        let remembered = if remember {
            self.preferences.set(REMEMBERED_IDENTIFIER_KEY, identifier).await
        } else {
            self.preferences.remove(REMEMBERED_IDENTIFIER_KEY).await
        };
        if let Err(e) = remembered {
            warn!("Failed to update remembered identifier: {}", e);
        }

        self.set_session(Some(profile.clone()));
        self.emit(SessionEvent::SignedIn(profile.user.clone()));
        log_operation_success!("login", user_id = %profile.user.id, role = %profile.user.role);
        Ok(profile)
    }

    /// Sign out. In-memory session state is cleared even if the backend call fails.
    pub async fn logout(&self) -> AccessResult<()> {
        let backend = self.ensure_initialized().await?;
        let result = backend.sign_out().await;

        self.set_session(None);
        self.emit(SessionEvent::SignedOut);

        if let Err(e) = &result {
            warn!("Backend sign-out failed: {}", e);
        } else {
            info!("Signed out");
        }
        result
    }

    // Organizations

    /// Organizations visible to the caller; empty without the view permission
    pub async fn list_organizations(&self) -> AccessResult<Vec<Organization>> {
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();
        if !ctx.has_permission(Permission::View) {
            return Ok(Vec::new());
        }

        let organizations = backend.list_organizations().await?;
        Ok(organizations
            .into_iter()
            .filter(|o| ctx.can_access_organization(&o.id))
            .collect())
    }

    pub async fn get_organization(&self, id: &str) -> AccessResult<Organization> {
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();
        ctx.require(Permission::View)?;
        ctx.require_organization(Some(id))?;

        backend
            .get_organization(id)
            .await?
            .ok_or_else(|| AccessError::not_found(format!("Organization {}", id)))
    }

    /// Create an organization; administrators only
    pub async fn create_organization(&self, input: NewOrganization) -> AccessResult<Organization> {
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();
        ctx.require(Permission::Create)?;
        ctx.require_admin()?;

        let name = input.name.trim();
        if name.is_empty() {
            return Err(AccessError::validation("Organization name is required"));
        }
        if name == warden_core::SYSTEM_ORGANIZATION_NAME {
            return Err(AccessError::conflict("The system organization already exists"));
        }

        let organization = backend
            .create_organization(&NewOrganization {
                name: name.to_string(),
            })
            .await?;
        info!(organization_id = %organization.id, name = %organization.name, "Created organization");
        Ok(organization)
    }

    pub async fn update_organization(
        &self,
        id: &str,
        update: OrganizationUpdate,
    ) -> AccessResult<Organization> {
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();
        ctx.require(Permission::Edit)?;
        ctx.require_organization(Some(id))?;

        let current = backend
            .get_organization(id)
            .await?
            .ok_or_else(|| AccessError::not_found(format!("Organization {}", id)))?;

        if let Some(name) = &update.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(AccessError::validation("Organization name is required"));
            }
            // The protected organization is identified by name
            if current.is_system() || name == warden_core::SYSTEM_ORGANIZATION_NAME {
                return Err(AccessError::conflict("The system organization cannot be renamed"));
            }
        }

        let update = OrganizationUpdate {
            name: update.name.map(|name| name.trim().to_string()),
        };
        backend.update_organization(id, &update).await
    }

    /// Delete an organization and, on the local backend, its users
    pub async fn delete_organization(&self, id: &str) -> AccessResult<()> {
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();

        let organization = backend
            .get_organization(id)
            .await?
            .ok_or_else(|| AccessError::not_found(format!("Organization {}", id)))?;
        if organization.is_system() {
            warn!(organization_id = %id, "Refused to delete the system organization");
            return Err(AccessError::conflict("The system organization cannot be deleted"));
        }

        ctx.require(Permission::Delete)?;
        ctx.require_organization(Some(id))?;
        if ctx.organization_id() == Some(id) {
            return Err(AccessError::conflict("You cannot delete your own organization"));
        }

        backend.delete_organization(id).await?;
        info!(organization_id = %id, "Deleted organization");
        Ok(())
    }

    // Users

    /// Users visible to the caller.
    ///
    /// Admins see every user (optionally filtered); organization admins only
    /// their own organization; callers without `manage_users` get nothing.
    pub async fn list_users(&self, organization_id: Option<&str>) -> AccessResult<Vec<Profile>> {
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();
        if !ctx.has_permission(Permission::ManageUsers) {
            return Ok(Vec::new());
        }

        let scope = if ctx.is_admin() {
            organization_id
        } else {
            match (ctx.organization_id(), organization_id) {
                (Some(own), None) => Some(own),
                (Some(own), Some(requested)) if own == requested => Some(own),
                _ => return Ok(Vec::new()),
            }
        };

        let users = backend.list_users(scope).await?;
        Ok(users
            .into_iter()
            .filter(|profile| ctx.can_access_optional(profile.user.organization_id.as_deref()))
            .collect())
    }

    /// A user record; anyone may read their own
    pub async fn get_user(&self, id: &str) -> AccessResult<Profile> {
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();
        let caller = ctx.require_user()?;

        if caller.id != id {
            ctx.require(Permission::ManageUsers)?;
        }

        let profile = backend
            .get_user(id)
            .await?
            .ok_or_else(|| AccessError::not_found(format!("User {}", id)))?;

        if caller.id != id {
            ctx.require_organization(profile.user.organization_id.as_deref())?;
        }
        Ok(profile)
    }

    pub async fn create_user(&self, input: NewUser) -> AccessResult<User> {
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();
        ctx.require(Permission::Create)?;
        let caller = ctx.require(Permission::ManageUsers)?;

        if input.role.is_administrative() && !ctx.is_admin() {
            return Err(AccessError::permission(
                "Only administrators may create admin or org_admin users",
            ));
        }

        let input = NewUser {
            organization_id: input
                .organization_id
                .clone()
                .or_else(|| (!ctx.is_admin()).then(|| caller.organization_id.clone()).flatten()),
            ..input
        };
        validate_new_user(&input)?;
        ctx.require_organization(input.organization_id.as_deref())?;

        let user = backend.create_user(&input).await?;
        info!(user_id = %user.id, username = %user.username, role = %user.role, "Created user");
        Ok(user)
    }

    /// Update a user. Users may change their own email and credential;
    /// everything else needs `manage_users` within scope.
    pub async fn update_user(&self, id: &str, update: UserUpdate) -> AccessResult<User> {
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();
        let caller = ctx.require_user()?;

        validate_user_update(&update)?;

        let self_service = caller.id == id && update.username.is_none() && !update.changes_privileges();
        if !self_service {
            ctx.require(Permission::Edit)?;
            ctx.require(Permission::ManageUsers)?;

            let target = backend
                .get_user(id)
                .await?
                .ok_or_else(|| AccessError::not_found(format!("User {}", id)))?;
            ctx.require_organization(target.user.organization_id.as_deref())?;

            if !ctx.is_admin() {
                if target.user.role.is_administrative() && caller.id != id {
                    return Err(AccessError::permission(
                        "Only administrators may modify admin or org_admin users",
                    ));
                }
                if update.role.is_some_and(|role| role.is_administrative() && role != target.user.role) {
                    return Err(AccessError::permission(
                        "Only administrators may grant admin or org_admin",
                    ));
                }
                if update.changes_privileges() && caller.id == id {
                    return Err(AccessError::permission(
                        "You cannot change your own role or organization",
                    ));
                }
            }
            let destination = update
                .organization_id
                .as_deref()
                .or(target.user.organization_id.as_deref());
            ctx.require_organization(destination)?;
        }

        let user = backend.update_user(id, &update).await?;
        if caller.id == id {
            self.refresh_session(user.clone());
        }
        debug!(user_id = %id, "Updated user");
        Ok(user)
    }

    pub async fn delete_user(&self, id: &str) -> AccessResult<()> {
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();
        let caller = ctx.require_user()?;

        if caller.id == id {
            warn!(user_id = %id, "Refused self-deletion");
            return Err(AccessError::conflict("You cannot delete your own account"));
        }

        ctx.require(Permission::Delete)?;
        ctx.require(Permission::ManageUsers)?;

        let target = backend
            .get_user(id)
            .await?
            .ok_or_else(|| AccessError::not_found(format!("User {}", id)))?;
        ctx.require_organization(target.user.organization_id.as_deref())?;
        if target.user.role.is_administrative() && !ctx.is_admin() {
            return Err(AccessError::permission(
                "Only administrators may delete admin or org_admin users",
            ));
        }

        backend.delete_user(id).await?;
        info!(user_id = %id, "Deleted user");
        Ok(())
    }

    fn refresh_session(&self, user: User) {
        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(profile) = session.as_mut() {
            if profile.user.id == user.id {
                *profile = Profile::new(user, profile.organization.clone());
            }
        }
    }

    // Data portability

    /// Serialized backup of the local store; administrators only
    pub async fn export_data(&self) -> AccessResult<String> {
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();
        ctx.require(Permission::Export)?;
        ctx.require_admin()?;
        backend.export_data().await
    }

    /// Replace the local store with a backup; administrators only
    pub async fn import_data(&self, payload: &str) -> AccessResult<()> {
        let backend = self.ensure_initialized().await?;
        self.context().require_admin()?;
        backend.import_data(payload).await?;
        info!("Imported local data");
        Ok(())
    }

    /// Wipe the local store and bootstrap it again. Ends the current session.
    pub async fn reset_data(&self) -> AccessResult<()> {
        let backend = self.ensure_initialized().await?;
        self.context().require_admin()?;
        backend.reset_data().await?;

        self.set_session(None);
        self.emit(SessionEvent::SignedOut);
        warn!("Local data reset to defaults");
        Ok(())
    }
}

fn validate_new_user(input: &NewUser) -> AccessResult<()> {
    if input.username.trim().is_empty() {
        return Err(AccessError::validation("Username is required"));
    }
    if !input.email.contains('@') {
        return Err(AccessError::validation("A valid email is required"));
    }
    if input.password.is_empty() {
        return Err(AccessError::validation("Password is required"));
    }
    if input.organization_id.is_none() {
        return Err(AccessError::validation("Users must belong to an organization"));
    }
    Ok(())
}

fn validate_user_update(update: &UserUpdate) -> AccessResult<()> {
    if update.username.as_deref().is_some_and(|u| u.trim().is_empty()) {
        return Err(AccessError::validation("Username cannot be empty"));
    }
    if update.email.as_deref().is_some_and(|e| !e.contains('@')) {
        return Err(AccessError::validation("A valid email is required"));
    }
    if update.password.as_deref().is_some_and(str::is_empty) {
        return Err(AccessError::validation("Password cannot be empty"));
    }
    Ok(())
}

impl std::fmt::Debug for AccessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessManager")
            .field("active", &self.active_backend())
            .field("fell_back", &self.used_fallback())
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
