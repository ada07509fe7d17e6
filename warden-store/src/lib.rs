//! Warden Store - local persistence
//!
//! Provides the single-document local store used when no remote identity
//! backend is available, plus client-side key/value storage for session and
//! preference values.

pub mod client;
pub mod document;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use client::{
    ClientStorage, FileClientStorage, MemoryClientStorage, REMEMBERED_IDENTIFIER_KEY,
    REMOTE_SESSION_KEY, SESSION_USER_KEY,
};
pub use document::{empty_document, DocumentStore, DOCUMENT_KEY};
pub use memory::MemoryDocumentStore;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteDocumentStore, SCHEMA_VERSION};
