//! Document store abstraction
//!
//! A durable store holding exactly one JSON document. Writes replace the whole
//! document; callers read, modify and write back.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use warden_core::{validation_error, WardenResult};

/// Fixed identifier under which the document is stored
pub const DOCUMENT_KEY: &str = "warden_data";

/// Storage trait for the single-document local store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Return the saved document, or an empty object if nothing has been saved
    async fn load(&self) -> WardenResult<Value>;

    /// Overwrite the entire document
    async fn save(&self, document: &Value) -> WardenResult<()>;

    /// Remove all stored data
    async fn clear(&self) -> WardenResult<()>;

    /// Serialize the current document for backup
    async fn export(&self) -> WardenResult<String> {
        let document = self.load().await?;
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Replace the current document with a backup produced by `export`.
    ///
    /// Payloads that are not a JSON object are rejected and leave the store untouched.
    async fn import(&self, payload: &str) -> WardenResult<()> {
        let document: Value = serde_json::from_str(payload).map_err(|e| {
            validation_error!(
                format!("Import payload is not valid JSON: {}", e),
                "payload",
                "document_store"
            )
        })?;

        if !document.is_object() {
            return Err(validation_error!(
                "Import payload must be a JSON object",
                "payload",
                "document_store"
            ));
        }

        self.save(&document).await?;
        debug!("Imported document into local store");
        Ok(())
    }

    /// Health check for the storage backend
    async fn health_check(&self) -> WardenResult<()>;
}

/// Empty document returned when nothing has been saved yet
pub fn empty_document() -> Value {
    Value::Object(serde_json::Map::new())
}
