//! Account-request workflow
//!
//! Anyone may submit a request. Administrators resolve requests for every
//! organization, organization admins only for their own. A request moves from
//! `pending` to `approved` or `rejected` exactly once.

use crate::manager::AccessManager;
use crate::{AccessError, AccessResult};
use serde::Serialize;
use tracing::{info, warn};
use warden_core::{AccountRequest, AccountRequestInput, NewUser, RequestStatus, User};

/// Result of approving a request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub request: AccountRequest,
    pub user: User,
    /// Initial credential to hand to the new user
    pub temporary_password: String,
}

impl AccessManager {
    /// Submit a signup request. No session is needed.
    pub async fn request_account(&self, input: AccountRequestInput) -> AccessResult<AccountRequest> {
        let backend = self.ensure_initialized().await?;

        if input.username.trim().is_empty() {
            return Err(AccessError::validation("Username is required"));
        }
        if !input.email.contains('@') {
            return Err(AccessError::validation("A valid email is required"));
        }

        let request = backend
            .insert_account_request(&AccountRequest::pending(input))
            .await?;
        info!(request_id = %request.id, username = %request.username, "Account requested");
        Ok(request)
    }

    /// Pending requests within the caller's reach; empty for non-administrators
    pub async fn get_pending_account_requests(&self) -> AccessResult<Vec<AccountRequest>> {
        self.list_account_requests(Some(RequestStatus::Pending)).await
    }

    /// Requests within the caller's reach, optionally by status
    pub async fn list_account_requests(
        &self,
        status: Option<RequestStatus>,
    ) -> AccessResult<Vec<AccountRequest>> {
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();
        if !ctx.is_administrator() {
            return Ok(Vec::new());
        }

        let scope = if ctx.is_admin() {
            None
        } else {
            match ctx.organization_id() {
                Some(own) => Some(own),
                None => return Ok(Vec::new()),
            }
        };

        let requests = backend.list_account_requests(status, scope).await?;
        Ok(requests
            .into_iter()
            .filter(|r| ctx.can_access_optional(r.organization_id.as_deref()))
            .collect())
    }

    /// Fetch a request the caller may resolve, still pending
    async fn resolvable_request(&self, id: &str) -> AccessResult<AccountRequest> {
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();
        ctx.require_user()?;
        if !ctx.is_administrator() {
            return Err(AccessError::permission(
                "Only administrators may resolve account requests",
            ));
        }

        let request = backend
            .get_account_request(id)
            .await?
            .ok_or_else(|| AccessError::not_found(format!("Account request {}", id)))?;
        ctx.require_organization(request.organization_id.as_deref())?;

        if request.status.is_terminal() {
            warn!(request_id = %id, status = %request.status, "Request already resolved");
            return Err(AccessError::conflict(format!(
                "Account request {} is already {}",
                id, request.status
            )));
        }
        Ok(request)
    }

    /// Approve a pending request, provisioning the user it asked for
    pub async fn approve_account_request(&self, id: &str) -> AccessResult<Approval> {
        let request = self.resolvable_request(id).await?;
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();
        let approver = ctx.require_user()?;

        if request.requested_role.is_administrative() && !ctx.is_admin() {
            return Err(AccessError::permission(
                "Only administrators may approve admin or org_admin accounts",
            ));
        }

        let temporary_password = backend.temporary_password();
        let new_user = NewUser {
            username: request.username.clone(),
            email: request.email.clone(),
            password: temporary_password.clone(),
            role: request.requested_role,
            organization_id: request
                .organization_id
                .clone()
                .or_else(|| approver.organization_id.clone()),
            is_active: true,
        };
        let user = backend.create_user(&new_user).await?;

        let resolved = match backend.resolve_account_request(&request.approved(&approver.id)).await {
            Ok(resolved) => resolved,
            Err(e) => {
                // Someone else resolved it first; undo the provisioning
                warn!(request_id = %id, error = %e, "Approval lost, removing provisioned user");
                if let Err(cleanup) = backend.delete_user(&user.id).await {
                    warn!("Failed to remove provisioned user {}: {}", user.id, cleanup);
                }
                return Err(e);
            }
        };

        info!(request_id = %id, user_id = %user.id, approver = %approver.id, "Account request approved");
        Ok(Approval {
            request: resolved,
            user,
            temporary_password,
        })
    }

    /// Reject a pending request
    pub async fn reject_account_request(
        &self,
        id: &str,
        reason: Option<String>,
    ) -> AccessResult<AccountRequest> {
        let request = self.resolvable_request(id).await?;
        let backend = self.ensure_initialized().await?;
        let ctx = self.context();
        let rejector = ctx.require_user()?;

        let resolved = backend
            .resolve_account_request(&request.rejected(&rejector.id, reason))
            .await?;
        info!(request_id = %id, rejector = %rejector.id, "Account request rejected");
        Ok(resolved)
    }
}
