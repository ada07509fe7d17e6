//! Remote identity client
//!
//! Wraps the auth endpoints and the tabular REST endpoints of the hosted
//! service. The client keeps the signed-in session in memory and announces
//! session changes to subscribers.

use crate::query::Query;
use crate::{create_http_client, handle_response_error, network_error, RemoteClientConfig};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use warden_core::{ErrorContext, WardenError, WardenResult};

/// Identity as reported by the auth endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Signed-in session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: AuthUser,
}

/// Auth state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(AuthUser),
    SessionRestored(AuthUser),
    SignedOut,
}

pub struct RemoteClient {
    config: RemoteClientConfig,
    http: reqwest::Client,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl RemoteClient {
    pub fn new(config: RemoteClientConfig) -> WardenResult<Self> {
        let http = create_http_client(&config)?;
        let (events, _) = broadcast::channel(16);

        Ok(Self {
            config,
            http,
            session: RwLock::new(None),
            events,
        })
    }

    pub fn config(&self) -> &RemoteClientConfig {
        &self.config
    }

    /// Receive auth state changes from this point on
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Check that the auth service answers
    pub async fn health_check(&self) -> WardenResult<()> {
        let response = self
            .http
            .get(self.config.endpoint("auth/v1/health"))
            .send()
            .await
            .map_err(|e| network_error(e, "health_check"))?;

        if !response.status().is_success() {
            return Err(handle_response_error(response, "health_check").await);
        }

        debug!("Remote identity service is healthy");
        Ok(())
    }

    /// Exchange an email and password for a session
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> WardenResult<AuthSession> {
        let response = self
            .http
            .post(self.config.endpoint("auth/v1/token"))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| network_error(e, "sign_in"))?;

        match response.status() {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                return Err(WardenError::Authentication {
                    message: "Invalid credentials".to_string(),
                    context: ErrorContext::new("remote_client").with_operation("sign_in"),
                });
            }
            status if !status.is_success() => {
                return Err(handle_response_error(response, "sign_in").await);
            }
            _ => {}
        }

        let session: AuthSession = response
            .json()
            .await
            .map_err(|e| network_error(e, "sign_in"))?;

        info!(user_id = %session.user.id, "Signed in to remote identity service");
        *self.session.write().await = Some(session.clone());
        self.emit(AuthEvent::SignedIn(session.user.clone()));
        Ok(session)
    }

    /// End the session. The in-memory session is dropped even if the service call fails.
    pub async fn sign_out(&self) -> WardenResult<()> {
        let session = self.session.write().await.take();
        self.emit(AuthEvent::SignedOut);

        let Some(session) = session else {
            return Ok(());
        };

        let response = self
            .http
            .post(self.config.endpoint("auth/v1/logout"))
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(|e| network_error(e, "sign_out"))?;

        if !response.status().is_success() {
            warn!("Remote sign-out returned {}", response.status());
            return Err(handle_response_error(response, "sign_out").await);
        }

        Ok(())
    }

    /// Current session, if signed in
    pub async fn session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    /// Resume a session from a stored access token.
    ///
    /// Returns `None` when the service no longer accepts the token.
    pub async fn restore_session(&self, access_token: &str) -> WardenResult<Option<AuthUser>> {
        let response = self
            .http
            .get(self.config.endpoint("auth/v1/user"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| network_error(e, "restore_session"))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!("Stored remote session is no longer valid");
                return Ok(None);
            }
            status if !status.is_success() => {
                return Err(handle_response_error(response, "restore_session").await);
            }
            _ => {}
        }

        let user: AuthUser = response
            .json()
            .await
            .map_err(|e| network_error(e, "restore_session"))?;

        *self.session.write().await = Some(AuthSession {
            access_token: access_token.to_string(),
            refresh_token: None,
            expires_in: None,
            user: user.clone(),
        });
        self.emit(AuthEvent::SessionRestored(user.clone()));
        Ok(Some(user))
    }

    /// Request against a table, authorized as the signed-in user or anonymously
    async fn table_request(&self, method: Method, table: &str, query: &Query) -> RequestBuilder {
        let token = match self.session.read().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => self.config.api_key.clone(),
        };

        self.http
            .request(method, self.config.endpoint(&format!("rest/v1/{}", table)))
            .bearer_auth(token)
            .query(&query.to_params())
    }

    async fn send(&self, request: RequestBuilder, operation: &str) -> WardenResult<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| network_error(e, operation))?;

        if !response.status().is_success() {
            return Err(handle_response_error(response, operation).await);
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response, operation: &str) -> WardenResult<T> {
        response.json().await.map_err(|e| network_error(e, operation))
    }

    /// Read rows
    pub async fn select<T: DeserializeOwned>(&self, table: &str, query: &Query) -> WardenResult<Vec<T>> {
        let request = self.table_request(Method::GET, table, query).await;
        let response = self.send(request, "select").await?;
        Self::decode(response, "select").await
    }

    /// Insert one row and return it as stored
    pub async fn insert<T, R>(&self, table: &str, row: &T) -> WardenResult<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self
            .table_request(Method::POST, table, &Query::new())
            .await
            .header("Prefer", "return=representation")
            .json(row);
        let response = self.send(request, "insert").await?;

        let mut rows: Vec<R> = Self::decode(response, "insert").await?;
        if rows.is_empty() {
            return Err(WardenError::Internal {
                message: format!("Insert into {} returned no row", table),
                source: None,
                context: ErrorContext::new("remote_client").with_operation("insert"),
            });
        }
        Ok(rows.swap_remove(0))
    }

    /// Patch the rows matching `query` and return them
    pub async fn update<T, R>(&self, table: &str, query: &Query, changes: &T) -> WardenResult<Vec<R>>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        Self::require_filter(table, query, "update")?;
        let request = self
            .table_request(Method::PATCH, table, query)
            .await
            .header("Prefer", "return=representation")
            .json(changes);
        let response = self.send(request, "update").await?;
        Self::decode(response, "update").await
    }

    /// Delete the rows matching `query`
    pub async fn delete(&self, table: &str, query: &Query) -> WardenResult<()> {
        Self::require_filter(table, query, "delete")?;
        let request = self.table_request(Method::DELETE, table, query).await;
        self.send(request, "delete").await?;
        Ok(())
    }

    fn require_filter(table: &str, query: &Query, operation: &str) -> WardenResult<()> {
        if query.has_filters() {
            return Ok(());
        }
        Err(WardenError::Validation {
            message: format!("Refusing unfiltered {} on {}", operation, table),
            field: None,
            context: ErrorContext::new("remote_client").with_operation(operation),
        })
    }

    fn service_key(&self, operation: &str) -> WardenResult<&str> {
        self.config.service_key.as_deref().ok_or_else(|| WardenError::Config {
            message: "Admin user operations need remote.service_key".to_string(),
            source: None,
            context: ErrorContext::new("remote_client")
                .with_operation(operation)
                .with_suggestion("Set WARDEN__REMOTE__SERVICE_KEY"),
        })
    }

    /// Create an auth identity with elevated credentials
    pub async fn admin_create_user(&self, email: &str, password: &str, metadata: Value) -> WardenResult<AuthUser> {
        let key = self.service_key("admin_create_user")?;
        let request = self
            .http
            .post(self.config.endpoint("auth/v1/admin/users"))
            .bearer_auth(key)
            .json(&json!({
                "email": email,
                "password": password,
                "email_confirm": true,
                "user_metadata": metadata,
            }));

        let response = self.send(request, "admin_create_user").await?;
        let user: AuthUser = Self::decode(response, "admin_create_user").await?;
        info!(user_id = %user.id, "Created remote identity");
        Ok(user)
    }

    /// Change the signed-in identity's email or password
    pub async fn update_current_user(&self, changes: Value) -> WardenResult<AuthUser> {
        let token = match self.session.read().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => {
                return Err(WardenError::Authentication {
                    message: "No remote session".to_string(),
                    context: ErrorContext::new("remote_client").with_operation("update_current_user"),
                })
            }
        };

        let request = self
            .http
            .put(self.config.endpoint("auth/v1/user"))
            .bearer_auth(token)
            .json(&changes);

        let response = self.send(request, "update_current_user").await?;
        Self::decode(response, "update_current_user").await
    }

    /// Change another identity's email or password with elevated credentials
    pub async fn admin_update_user(&self, user_id: &str, changes: Value) -> WardenResult<AuthUser> {
        let key = self.service_key("admin_update_user")?;
        let request = self
            .http
            .put(self.config.endpoint(&format!("auth/v1/admin/users/{}", user_id)))
            .bearer_auth(key)
            .json(&changes);

        let response = self.send(request, "admin_update_user").await?;
        Self::decode(response, "admin_update_user").await
    }

    /// Delete an auth identity with elevated credentials
    pub async fn admin_delete_user(&self, user_id: &str) -> WardenResult<()> {
        let key = self.service_key("admin_delete_user")?;
        let request = self
            .http
            .delete(self.config.endpoint(&format!("auth/v1/admin/users/{}", user_id)))
            .bearer_auth(key);

        self.send(request, "admin_delete_user").await?;
        info!(user_id = %user_id, "Deleted remote identity");
        Ok(())
    }
}
