//! Client for the hosted identity backend
//!
//! This crate talks to a Supabase-style service: password sign-in and session
//! endpoints under `/auth/v1`, and row-level-secured tables under `/rest/v1`.
//! It only moves data; authorization decisions stay with the access layer.

use std::collections::HashMap;
use warden_core::{ErrorContext, RemoteSettings, WardenError, WardenResult};

pub mod client;
pub mod query;

pub use client::{AuthEvent, AuthSession, AuthUser, RemoteClient};
pub use query::{Order, Query};

/// Configuration for the remote client
#[derive(Debug, Clone)]
pub struct RemoteClientConfig {
    /// Base URL of the service
    pub base_url: String,
    /// Public API key sent with every request
    pub api_key: String,
    /// Elevated key for admin user operations
    pub service_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
    /// Additional headers
    pub headers: HashMap<String, String>,
}

impl RemoteClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            service_key: None,
            timeout_seconds: 30,
            user_agent: format!("warden/{}", env!("CARGO_PKG_VERSION")),
            headers: HashMap::new(),
        }
    }

    /// Build from application settings; `None` when the remote is not configured
    pub fn from_settings(settings: &RemoteSettings) -> Option<Self> {
        if !settings.is_configured() {
            return None;
        }

        let mut config = Self::new(settings.url.clone()?, settings.api_key.clone()?);
        config.service_key = settings.service_key.clone();
        config.timeout_seconds = settings.timeout_seconds;
        Some(config)
    }

    /// Set the elevated service key
    pub fn with_service_key(mut self, key: impl Into<String>) -> Self {
        self.service_key = Some(key.into());
        self
    }

    /// Set additional header
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Join an endpoint path onto the base URL
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Create the HTTP client with common configuration
pub(crate) fn create_http_client(config: &RemoteClientConfig) -> WardenResult<reqwest::Client> {
    url::Url::parse(&config.base_url).map_err(|e| WardenError::Config {
        message: format!("Invalid remote URL '{}': {}", config.base_url, e),
        source: Some(Box::new(e)),
        context: ErrorContext::new("http_client")
            .with_operation("create_client")
            .with_suggestion("Check remote.url"),
    })?;

    let mut headers = reqwest::header::HeaderMap::new();

    headers.insert(
        reqwest::header::USER_AGENT,
        reqwest::header::HeaderValue::from_str(&config.user_agent).map_err(|e| {
            WardenError::Config {
                message: format!("Invalid user agent: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            }
        })?,
    );

    headers.insert(
        "apikey",
        reqwest::header::HeaderValue::from_str(&config.api_key).map_err(|e| {
            WardenError::Config {
                message: format!("Invalid API key header value: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client")
                    .with_operation("create_client")
                    .with_suggestion("Check remote.api_key"),
            }
        })?,
    );

    for (key, value) in &config.headers {
        let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            WardenError::Config {
                message: format!("Invalid header name '{}': {}", key, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            }
        })?;

        let header_value =
            reqwest::header::HeaderValue::from_str(value).map_err(|e| WardenError::Config {
                message: format!("Invalid header value for '{}': {}", key, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            })?;

        headers.insert(header_name, header_value);
    }

    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_seconds))
        .default_headers(headers)
        .build()
        .map_err(|e| WardenError::Config {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })
}

/// Convert a transport failure into a network error
pub(crate) fn network_error(error: reqwest::Error, operation: &str) -> WardenError {
    WardenError::Network {
        message: format!("Request to identity service failed: {}", error),
        source: Some(Box::new(error)),
        context: ErrorContext::new("remote_client")
            .with_operation(operation)
            .with_suggestion("Check network connectivity and remote.url"),
    }
}

/// Convert a non-success response into a remote error carrying its status
pub(crate) async fn handle_response_error(response: reqwest::Response, operation: &str) -> WardenError {
    let status = response.status();
    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();

    WardenError::Remote {
        message: format!(
            "HTTP {} error for {}: {}",
            status.as_u16(),
            url.path(),
            if body.is_empty() {
                status.canonical_reason().unwrap_or("Unknown error")
            } else {
                &body
            }
        ),
        status: Some(status.as_u16()),
        context: ErrorContext::new("remote_client")
            .with_operation(operation)
            .with_suggestion(match status.as_u16() {
                401 => "Check remote.api_key or sign in again",
                403 => "The row-level policy rejected this request",
                404 => "Record or endpoint not found",
                409 => "The change conflicts with an existing record",
                _ => "Check network connectivity and service status",
            }),
    }
}
