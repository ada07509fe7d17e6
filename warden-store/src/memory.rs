//! In-memory document store

use crate::document::{empty_document, DocumentStore};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use warden_core::WardenResult;

/// Document store that lives only as long as the process
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    document: Arc<RwLock<Option<Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a document
    pub fn with_document(document: Value) -> Self {
        Self {
            document: Arc::new(RwLock::new(Some(document))),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn load(&self) -> WardenResult<Value> {
        let document = self.document.read().await;
        Ok(document.clone().unwrap_or_else(empty_document))
    }

    async fn save(&self, document: &Value) -> WardenResult<()> {
        let mut slot = self.document.write().await;
        *slot = Some(document.clone());
        debug!("Saved document to memory store");
        Ok(())
    }

    async fn clear(&self) -> WardenResult<()> {
        let mut slot = self.document.write().await;
        *slot = None;
        Ok(())
    }

    async fn health_check(&self) -> WardenResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_load_without_save_is_empty_object() {
        let store = MemoryDocumentStore::new();
        assert_eq!(store.load().await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_save_overwrites_whole_document() {
        let store = MemoryDocumentStore::new();
        store.save(&json!({"a": 1, "b": 2})).await.unwrap();
        store.save(&json!({"c": 3})).await.unwrap();
        assert_eq!(store.load().await.unwrap(), json!({"c": 3}));

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_import_rejects_non_objects() {
        let store = MemoryDocumentStore::with_document(json!({"keep": true}));

        assert!(store.import("[1, 2, 3]").await.is_err());
        assert!(store.import("\"text\"").await.is_err());
        assert!(store.import("{not json").await.is_err());

        assert_eq!(store.load().await.unwrap(), json!({"keep": true}));
    }
}
