//! Integration tests for the local document stores

use serde_json::json;
use std::sync::Arc;
use warden_store::{DocumentStore, MemoryDocumentStore, SqliteDocumentStore};

fn sample_document() -> serde_json::Value {
    json!({
        "schemaVersion": 1,
        "organizations": [
            {"id": "org-1", "name": "System", "createdAt": "2024-01-01T00:00:00Z"}
        ],
        "users": [],
        "accountRequests": []
    })
}

async fn assert_export_import_round_trip(store: Arc<dyn DocumentStore>) {
    store.save(&sample_document()).await.unwrap();
    let exported = store.export().await.unwrap();

    store.clear().await.unwrap();
    assert_eq!(store.load().await.unwrap(), json!({}));

    store.import(&exported).await.unwrap();
    assert_eq!(store.load().await.unwrap(), sample_document());
    assert_eq!(store.export().await.unwrap(), exported);
}

#[tokio::test]
async fn test_memory_store_round_trip() {
    assert_export_import_round_trip(Arc::new(MemoryDocumentStore::new())).await;
}

#[tokio::test]
async fn test_sqlite_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteDocumentStore::new(dir.path().join("warden.db"));
    assert_export_import_round_trip(Arc::new(store)).await;
}

#[tokio::test]
async fn test_sqlite_store_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("warden.db");

    {
        let store = SqliteDocumentStore::new(&path);
        store.save(&sample_document()).await.unwrap();
    }

    let reopened = SqliteDocumentStore::new(&path);
    assert_eq!(reopened.load().await.unwrap(), sample_document());
    assert!(reopened.health_check().await.is_ok());
}

#[tokio::test]
async fn test_sqlite_import_rejects_array_payload() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteDocumentStore::new(dir.path().join("warden.db"));
    store.save(&sample_document()).await.unwrap();

    let result = store.import("[{\"id\": 1}]").await;
    assert!(matches!(
        result,
        Err(warden_core::WardenError::Validation { .. })
    ));
    assert_eq!(store.load().await.unwrap(), sample_document());
}
