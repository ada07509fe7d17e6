//! Warden Core - shared data model and ambient infrastructure
//!
//! Defines the identity records, the unified error type, configuration and
//! logging used by every other warden crate

pub mod async_utils;
pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use async_utils::*;
pub use config::*;
pub use error::*;
pub use logging::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio;
pub use tracing;
