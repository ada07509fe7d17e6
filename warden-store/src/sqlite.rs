//! SQLite-backed document store
//!
//! The database is opened lazily on first use. Its schema is versioned through
//! `PRAGMA user_version` and upgraded by `MIGRATIONS` at open time.

use crate::document::{empty_document, DocumentStore, DOCUMENT_KEY};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use warden_core::{ErrorContext, WardenError, WardenResult};

/// Ordered schema migrations; entry `n` upgrades the schema to version `n + 1`
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        key TEXT PRIMARY KEY,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "ALTER TABLE documents ADD COLUMN revision INTEGER NOT NULL DEFAULT 0",
];

/// Current store schema version
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

fn store_error(message: String, operation: &str, source: sqlx::Error) -> WardenError {
    WardenError::Storage {
        message,
        source: Some(Box::new(source)),
        context: ErrorContext::new("sqlite_store").with_operation(operation),
    }
}

/// Document store persisted in an embedded SQLite database
pub struct SqliteDocumentStore {
    path: PathBuf,
    pool: OnceCell<SqlitePool>,
}

impl SqliteDocumentStore {
    /// Create a store for the given database file. Nothing is opened until first use.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            pool: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Await the one-time open and migration step
    async fn pool(&self) -> WardenResult<&SqlitePool> {
        self.pool.get_or_try_init(|| self.open()).await
    }

    async fn open(&self) -> WardenResult<SqlitePool> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                info!("Creating local store directory: {}", parent.display());
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            store_error(
                format!("Failed to open local store {}: {}", self.path.display(), e),
                "open",
                e,
            )
        })?;

        Self::migrate(&pool).await?;
        info!("Local store opened at {}", self.path.display());
        Ok(pool)
    }

    /// Apply every migration newer than the stored schema version
    async fn migrate(pool: &SqlitePool) -> WardenResult<()> {
        let current: i64 = sqlx::query("PRAGMA user_version")
            .fetch_one(pool)
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|e| store_error(format!("Failed to read schema version: {}", e), "migrate", e))?;

        for (index, statement) in MIGRATIONS.iter().enumerate() {
            let version = index as i64 + 1;
            if version <= current {
                continue;
            }

            let mut tx = pool
                .begin()
                .await
                .map_err(|e| store_error(format!("Failed to begin migration: {}", e), "migrate", e))?;

            sqlx::query(statement).execute(&mut *tx).await.map_err(|e| {
                store_error(
                    format!("Migration to schema version {} failed: {}", version, e),
                    "migrate",
                    e,
                )
            })?;

            // PRAGMA does not accept bound parameters
            sqlx::query(&format!("PRAGMA user_version = {}", version))
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    store_error(format!("Failed to record schema version: {}", e), "migrate", e)
                })?;

            tx.commit()
                .await
                .map_err(|e| store_error(format!("Failed to commit migration: {}", e), "migrate", e))?;

            debug!("Local store migrated to schema version {}", version);
        }

        Ok(())
    }

    /// Stored schema version, opening the store if needed
    pub async fn schema_version(&self) -> WardenResult<i64> {
        let pool = self.pool().await?;
        sqlx::query("PRAGMA user_version")
            .fetch_one(pool)
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|e| store_error(format!("Failed to read schema version: {}", e), "schema_version", e))
    }

    /// Number of times the document has been written
    pub async fn revision(&self) -> WardenResult<i64> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT revision FROM documents WHERE key = ?")
            .bind(DOCUMENT_KEY)
            .fetch_optional(pool)
            .await
            .map_err(|e| store_error(format!("Failed to read revision: {}", e), "revision", e))?;

        Ok(match row {
            Some(row) => row.try_get("revision").unwrap_or(0),
            None => 0,
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn load(&self) -> WardenResult<Value> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT body FROM documents WHERE key = ?")
            .bind(DOCUMENT_KEY)
            .fetch_optional(pool)
            .await
            .map_err(|e| store_error(format!("Failed to load document: {}", e), "load", e))?;

        match row {
            Some(row) => {
                let body: String = row
                    .try_get("body")
                    .map_err(|e| store_error(format!("Failed to read document body: {}", e), "load", e))?;
                Ok(serde_json::from_str(&body)?)
            }
            None => Ok(empty_document()),
        }
    }

    async fn save(&self, document: &Value) -> WardenResult<()> {
        let pool = self.pool().await?;
        let body = serde_json::to_string(document)?;

        sqlx::query(
            r#"
            INSERT INTO documents (key, body, updated_at, revision)
            VALUES (?, ?, ?, 1)
            ON CONFLICT(key) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at,
                revision = documents.revision + 1
            "#,
        )
        .bind(DOCUMENT_KEY)
        .bind(body)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .map_err(|e| store_error(format!("Failed to save document: {}", e), "save", e))?;

        debug!("Saved document to local store");
        Ok(())
    }

    async fn clear(&self) -> WardenResult<()> {
        let pool = self.pool().await?;
        sqlx::query("DELETE FROM documents")
            .execute(pool)
            .await
            .map_err(|e| store_error(format!("Failed to clear local store: {}", e), "clear", e))?;

        info!("Cleared local store");
        Ok(())
    }

    async fn health_check(&self) -> WardenResult<()> {
        let pool = self.pool().await?;
        sqlx::query("SELECT 1")
            .fetch_one(pool)
            .await
            .map_err(|e| store_error(format!("Local store health check failed: {}", e), "health_check", e))?;
        Ok(())
    }
}
