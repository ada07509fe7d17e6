//! Local document schema
//!
//! The local store holds a single JSON document. It carries `schemaVersion`;
//! documents from before versioning are treated as version 1 and upgraded on
//! load.

use crate::{AccessError, AccessResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use warden_core::{AccountRequest, Organization, Role, User};

/// Version written by this build
pub const LOCAL_SCHEMA_VERSION: u64 = 2;

/// A user together with the credential checked at local sign-in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUser {
    #[serde(flatten)]
    pub user: User,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalData {
    pub schema_version: u64,
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub users: Vec<StoredUser>,
    #[serde(default)]
    pub account_requests: Vec<AccountRequest>,
}

impl LocalData {
    /// Parse a stored document, upgrading older versions.
    ///
    /// Returns `None` for an empty document and a flag telling whether an
    /// upgrade happened and should be written back.
    pub fn from_document(document: Value) -> AccessResult<Option<(Self, bool)>> {
        let Value::Object(mut root) = document else {
            return Err(AccessError::validation("Local data must be a JSON object"));
        };

        if root.is_empty() {
            return Ok(None);
        }

        let version = root
            .get("schemaVersion")
            .and_then(Value::as_u64)
            .unwrap_or(1);

        if version > LOCAL_SCHEMA_VERSION {
            return Err(AccessError::validation(format!(
                "Local data schema version {} is newer than supported version {}",
                version, LOCAL_SCHEMA_VERSION
            )));
        }

        let migrated = version < LOCAL_SCHEMA_VERSION;
        if version < 2 {
            upgrade_v1(&mut root);
        }

        let data: LocalData = serde_json::from_value(Value::Object(root))
            .map_err(|e| AccessError::validation(format!("Local data is malformed: {}", e)))?;

        Ok(Some((data, migrated)))
    }

    pub fn to_document(&self) -> AccessResult<Value> {
        serde_json::to_value(self)
            .map_err(|e| AccessError::backend(format!("Failed to serialize local data: {}", e)))
    }

    pub fn organization(&self, id: &str) -> Option<&Organization> {
        self.organizations.iter().find(|o| o.id == id)
    }

    pub fn user(&self, id: &str) -> Option<&StoredUser> {
        self.users.iter().find(|u| u.user.id == id)
    }

    /// User joined with its organization
    pub fn profile(&self, user: &User) -> warden_core::Profile {
        let organization = user
            .organization_id
            .as_deref()
            .and_then(|id| self.organization(id))
            .cloned();
        warden_core::Profile::new(user.clone(), organization)
    }
}

/// Unversioned documents: fill fields that older writers left out
fn upgrade_v1(root: &mut Map<String, Value>) {
    let now = Value::String(Utc::now().to_rfc3339());

    for key in ["organizations", "users", "accountRequests"] {
        if !root.get(key).is_some_and(Value::is_array) {
            root.insert(key.to_string(), Value::Array(Vec::new()));
        }
    }

    if let Some(Value::Array(organizations)) = root.get_mut("organizations") {
        for organization in organizations.iter_mut().filter_map(Value::as_object_mut) {
            organization.entry("createdAt").or_insert_with(|| now.clone());
        }
    }

    if let Some(Value::Array(users)) = root.get_mut("users") {
        for user in users.iter_mut().filter_map(Value::as_object_mut) {
            // Accounts without a credential stay locked until an admin sets one
            if !user.get("password").is_some_and(Value::is_string) {
                user.insert("password".to_string(), Value::String(String::new()));
                user.insert("isActive".to_string(), Value::Bool(false));
            }
            user.entry("createdAt").or_insert_with(|| now.clone());
            user.entry("isActive").or_insert(Value::Bool(true));
            user.entry("organizationId").or_insert(Value::Null);
            user.entry("role")
                .or_insert_with(|| Value::String(Role::Viewer.to_string()));
        }
    }

    if let Some(Value::Array(requests)) = root.get_mut("accountRequests") {
        for request in requests.iter_mut().filter_map(Value::as_object_mut) {
            request.entry("createdAt").or_insert_with(|| now.clone());
            request.entry("status").or_insert_with(|| Value::String("pending".to_string()));
            request.entry("organizationId").or_insert(Value::Null);
            request.entry("message").or_insert(Value::Null);
            request
                .entry("requestedRole")
                .or_insert_with(|| Value::String(Role::Viewer.to_string()));
        }
    }

    root.insert(
        "schemaVersion".to_string(),
        Value::Number(LOCAL_SCHEMA_VERSION.into()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_document_needs_bootstrap() {
        assert!(LocalData::from_document(json!({})).unwrap().is_none());
    }

    #[test]
    fn test_legacy_document_is_upgraded() {
        let legacy = json!({
            "organizations": [{ "id": "o1", "name": "System" }],
            "users": [{
                "id": "u1",
                "username": "admin",
                "email": "admin@example.com",
                "password": "pw",
                "role": "admin",
                "organizationId": "o1"
            }]
        });

        let (data, migrated) = LocalData::from_document(legacy).unwrap().unwrap();
        assert!(migrated);
        assert_eq!(data.schema_version, LOCAL_SCHEMA_VERSION);
        assert!(data.users[0].user.is_active);
        assert!(data.account_requests.is_empty());
        assert_eq!(data.profile(&data.users[0].user).organization.unwrap().name, "System");
    }

    #[test]
    fn test_legacy_user_without_password_is_locked() {
        let legacy = json!({
            "users": [{
                "id": "u1",
                "username": "old",
                "email": "old@example.com",
                "role": "admin",
                "isActive": true
            }]
        });

        let (data, _) = LocalData::from_document(legacy).unwrap().unwrap();
        assert!(!data.users[0].user.is_active);
        assert!(data.users[0].password.is_empty());
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let result = LocalData::from_document(json!({ "schemaVersion": 99 }));
        assert!(matches!(result, Err(AccessError::Validation { .. })));
    }

    #[test]
    fn test_current_version_is_not_rewritten() {
        let document = LocalData {
            schema_version: LOCAL_SCHEMA_VERSION,
            ..Default::default()
        }
        .to_document()
        .unwrap();

        let (_, migrated) = LocalData::from_document(document).unwrap().unwrap();
        assert!(!migrated);
    }
}
