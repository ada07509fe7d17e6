//! Warden Access - identity and access management
//!
//! The [`AccessManager`] owns the current session and implements organization,
//! user and account-request operations on top of an [`IdentityBackend`]. Two
//! backends exist: the hosted identity service and the local document store.
//! The manager picks one at initialization and falls back to local storage
//! when the remote backend cannot start.
//!
//! ## Architecture
//!
//! - **Permissions** (`auth`): static role to permission mapping and the
//!   per-session [`AccessContext`]
//! - **Backends** (`backend`): storage of identities and records, no policy
//! - **Manager** (`manager`, `requests`): policy, scoping and session state

use serde::Serialize;
use std::sync::Arc;
use warden_core::{WardenConfig, WardenError};
use warden_remote::{RemoteClient, RemoteClientConfig};
use warden_store::{ClientStorage, DocumentStore, FileClientStorage, SqliteDocumentStore};

pub mod auth;
pub mod backend;
pub mod manager;
pub mod requests;

pub use auth::{role_permissions, AccessContext};
pub use backend::{BackendKind, IdentityBackend, LocalBackend, RemoteBackend};
pub use manager::{AccessManager, BackendSet, SessionEvent};
pub use requests::Approval;

/// Access-level error, one variant per failure class callers act on
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Backend failure: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Not authenticated")]
    NotAuthenticated,
}

pub type AccessResult<T> = Result<T, AccessError>;

/// Failure class of an [`AccessError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    NotFound,
    Conflict,
    Backend,
    Validation,
    InvalidCredentials,
    NotAuthenticated,
}

impl AccessError {
    /// Create a permission error
    pub fn permission<S: Into<String>>(message: S) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a backend error without a source
    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AccessError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            AccessError::NotFound { .. } => ErrorKind::NotFound,
            AccessError::Conflict { .. } => ErrorKind::Conflict,
            AccessError::Backend { .. } => ErrorKind::Backend,
            AccessError::Validation { .. } => ErrorKind::Validation,
            AccessError::InvalidCredentials => ErrorKind::InvalidCredentials,
            AccessError::NotAuthenticated => ErrorKind::NotAuthenticated,
        }
    }
}

impl From<WardenError> for AccessError {
    fn from(error: WardenError) -> Self {
        match &error {
            WardenError::Remote {
                status: Some(401 | 403),
                message,
                ..
            } => AccessError::permission(message.clone()),
            WardenError::Remote {
                status: Some(404),
                message,
                ..
            } => AccessError::not_found(message.clone()),
            WardenError::Remote {
                status: Some(409),
                message,
                ..
            } => AccessError::conflict(message.clone()),
            WardenError::NotFound { resource, .. } => AccessError::not_found(resource.clone()),
            WardenError::Validation { message, .. } => AccessError::validation(message.clone()),
            _ => {
                error.log();
                AccessError::Backend {
                    message: error.to_string(),
                    source: Some(Box::new(error)),
                }
            }
        }
    }
}

/// Serializable `{success, data | error}` view of an operation result
#[derive(Debug, Clone, Serialize)]
pub struct Outcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl<T> From<AccessResult<T>> for Outcome<T> {
    fn from(result: AccessResult<T>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
                kind: None,
            },
            Err(error) => Self {
                success: false,
                data: None,
                error: Some(error.to_string()),
                kind: Some(error.kind()),
            },
        }
    }
}

/// Wire up a manager from configuration: SQLite local store, file-backed
/// client storage, and the remote backend when it is configured.
///
/// Every client-side key lives in the file storage, so a local session
/// persists across processes until logout.
pub fn build_manager(config: &WardenConfig) -> AccessResult<AccessManager> {
    let client_storage: Arc<dyn ClientStorage> =
        Arc::new(FileClientStorage::new(config.storage.client_path())?);
    let store: Arc<dyn DocumentStore> =
        Arc::new(SqliteDocumentStore::new(config.storage.database_path()));

    let local: Arc<dyn IdentityBackend> =
        Arc::new(LocalBackend::new(store, client_storage.clone()));

    let remote: Option<Arc<dyn IdentityBackend>> =
        match RemoteClientConfig::from_settings(&config.remote) {
            Some(remote_config) => {
                let client = Arc::new(RemoteClient::new(remote_config)?);
                Some(Arc::new(RemoteBackend::new(client, client_storage.clone())))
            }
            None => {
                tracing::info!("Remote identity service not configured");
                None
            }
        };

    Ok(AccessManager::new(BackendSet { remote, local }, client_storage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::ErrorContext;

    #[test]
    fn test_remote_status_mapping() {
        let remote = |status| WardenError::Remote {
            message: "boom".to_string(),
            status: Some(status),
            context: ErrorContext::new("test"),
        };

        assert_eq!(AccessError::from(remote(401)).kind(), ErrorKind::PermissionDenied);
        assert_eq!(AccessError::from(remote(403)).kind(), ErrorKind::PermissionDenied);
        assert_eq!(AccessError::from(remote(404)).kind(), ErrorKind::NotFound);
        assert_eq!(AccessError::from(remote(409)).kind(), ErrorKind::Conflict);
        assert_eq!(AccessError::from(remote(500)).kind(), ErrorKind::Backend);
    }

    #[test]
    fn test_outcome_shape() {
        let failed: Outcome<()> = Outcome::from(Err(AccessError::InvalidCredentials));
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "success": false,
                "error": "Invalid credentials",
                "kind": "invalid_credentials"
            })
        );

        let ok: Outcome<u32> = Outcome::from(Ok(3));
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value, serde_json::json!({ "success": true, "data": 3 }));
    }
}
