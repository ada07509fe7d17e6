//! Unified error handling system
//!
//! Provides structured error types with context, recovery suggestions, and proper error chaining

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type WardenResult<T> = Result<T, WardenError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type shared by the store, remote and access crates
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    /// The remote identity service answered with a non-success status
    #[error("Remote service error: {message}")]
    Remote {
        message: String,
        status: Option<u16>,
        context: ErrorContext,
    },

    #[error("Authentication error: {message}")]
    Authentication {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        context: ErrorContext,
    },

    #[error("Resource not found: {resource}")]
    NotFound {
        resource: String,
        context: ErrorContext,
    },

    #[error("Operation timeout: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },
}

impl WardenError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            WardenError::Storage { context, .. } => Some(context),
            WardenError::Config { context, .. } => Some(context),
            WardenError::Network { context, .. } => Some(context),
            WardenError::Remote { context, .. } => Some(context),
            WardenError::Authentication { context, .. } => Some(context),
            WardenError::Validation { context, .. } => Some(context),
            WardenError::NotFound { context, .. } => Some(context),
            WardenError::Timeout { context, .. } => Some(context),
            WardenError::Internal { context, .. } => Some(context),
            _ => None,
        }
    }

    /// HTTP status reported by the remote service, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            WardenError::Remote { status, .. } => *status,
            _ => None,
        }
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            WardenError::Network { .. } => true,
            WardenError::Timeout { .. } => true,
            WardenError::Remote { status, .. } => matches!(status, Some(s) if *s >= 500),
            WardenError::Authentication { .. } => false,
            WardenError::Config { .. } => false,
            WardenError::Validation { .. } => false,
            WardenError::NotFound { .. } => false,
            _ => false,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            WardenError::Internal { .. } | WardenError::Storage { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Internal or storage error occurred"
                );
            }
            WardenError::Config { .. } | WardenError::Validation { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Configuration or validation error"
                );
            }
            WardenError::Network { .. } | WardenError::Timeout { .. } => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Network or timeout error (may be recoverable)"
                );
            }
            _ => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Error occurred"
                );
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! storage_error {
    ($msg:expr, $component:expr) => {
        $crate::WardenError::Storage {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::WardenError::Storage {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::WardenError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'warden config --init' to create default config"),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr, $field:expr, $component:expr) => {
        $crate::WardenError::Validation {
            message: $msg.to_string(),
            field: Some($field.to_string()),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check the field value and format"),
        }
    };
}

#[macro_export]
macro_rules! not_found_error {
    ($resource:expr, $component:expr) => {
        $crate::WardenError::NotFound {
            resource: $resource.to_string(),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Verify the identifier")
                .with_suggestion("Check if the record exists and is visible to the caller"),
        }
    };
}
