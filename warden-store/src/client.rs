//! Client-side key/value storage
//!
//! Small string values kept next to the application: the serialized current
//! user for the lifetime of a session, the remote session token, and a
//! remembered login identifier that outlives sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use warden_core::{WardenError, WardenResult};

/// Serialized current user in local mode (session lifetime)
pub const SESSION_USER_KEY: &str = "warden.current_user";
/// Access token of the remote backend session
pub const REMOTE_SESSION_KEY: &str = "warden.remote_session";
/// Login identifier remembered across sessions
pub const REMEMBERED_IDENTIFIER_KEY: &str = "warden.remembered_identifier";

/// String key/value storage
#[async_trait]
pub trait ClientStorage: Send + Sync {
    async fn get(&self, key: &str) -> WardenResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> WardenResult<()>;

    /// Remove a key; removing a missing key is not an error
    async fn remove(&self, key: &str) -> WardenResult<()>;
}

/// Storage that disappears with the process
#[derive(Debug, Clone, Default)]
pub struct MemoryClientStorage {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryClientStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStorage for MemoryClientStorage {
    async fn get(&self, key: &str) -> WardenResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> WardenResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> WardenResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Storage persisted as one file per key under a directory
#[derive(Debug, Clone)]
pub struct FileClientStorage {
    storage_dir: PathBuf,
}

impl FileClientStorage {
    /// Create the storage, creating its directory if needed
    pub fn new<P: AsRef<Path>>(storage_dir: P) -> WardenResult<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir).map_err(WardenError::Io)?;

        info!("Client storage initialized at: {}", storage_dir.display());
        Ok(Self { storage_dir })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.storage_dir
            .join(format!("{}.value", urlencoding::encode(key)))
    }
}

#[async_trait]
impl ClientStorage for FileClientStorage {
    async fn get(&self, key: &str) -> WardenResult<Option<String>> {
        let path = self.key_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WardenError::Io(e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> WardenResult<()> {
        let path = self.key_path(key);
        tokio::fs::write(&path, value).await?;
        debug!("Stored client value {} at {}", key, path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> WardenResult<()> {
        let path = self.key_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed client value {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WardenError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_set_get_remove() {
        let storage = MemoryClientStorage::new();
        assert_eq!(storage.get(SESSION_USER_KEY).await.unwrap(), None);

        storage.set(SESSION_USER_KEY, "{\"id\":\"u1\"}").await.unwrap();
        assert_eq!(
            storage.get(SESSION_USER_KEY).await.unwrap().as_deref(),
            Some("{\"id\":\"u1\"}")
        );

        storage.remove(SESSION_USER_KEY).await.unwrap();
        storage.remove(SESSION_USER_KEY).await.unwrap();
        assert_eq!(storage.get(SESSION_USER_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let storage = FileClientStorage::new(dir.path().join("client")).unwrap();
        storage
            .set(REMEMBERED_IDENTIFIER_KEY, "admin@example.com")
            .await
            .unwrap();

        let reopened = FileClientStorage::new(dir.path().join("client")).unwrap();
        assert_eq!(
            reopened
                .get(REMEMBERED_IDENTIFIER_KEY)
                .await
                .unwrap()
                .as_deref(),
            Some("admin@example.com")
        );

        reopened.remove(REMEMBERED_IDENTIFIER_KEY).await.unwrap();
        assert_eq!(storage.get(REMEMBERED_IDENTIFIER_KEY).await.unwrap(), None);
    }
}
