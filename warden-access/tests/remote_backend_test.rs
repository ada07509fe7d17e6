//! Access manager over the remote backend, against an in-process stand-in
//! for the hosted identity service

use axum::extract::{Json, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use warden_access::{
    AccessError, AccessManager, BackendKind, BackendSet, IdentityBackend, LocalBackend,
    RemoteBackend,
};
use warden_core::{AccountRequestInput, NewUser, Role};
use warden_remote::{RemoteClient, RemoteClientConfig};
use warden_store::{ClientStorage, MemoryClientStorage, MemoryDocumentStore, REMOTE_SESSION_KEY};

const SERVICE_KEY: &str = "service-key";
const CREATED_AT: &str = "2024-01-01T00:00:00Z";

struct Identity {
    id: String,
    email: String,
    password: String,
}

/// State of the stand-in service
#[derive(Default)]
struct Service {
    identities: Vec<Identity>,
    tables: HashMap<String, Vec<Value>>,
    deleted_identities: Vec<String>,
    logouts: usize,
    fail_profile_insert: bool,
    next_id: usize,
}

type Shared = Arc<Mutex<Service>>;

impl Service {
    fn seeded() -> Self {
        let mut service = Service::default();

        for (id, name) in [("org-sys", "System"), ("org-acme", "Acme"), ("org-globex", "Globex")] {
            service.rows("organizations").push(json!({
                "id": id,
                "name": name,
                "created_at": CREATED_AT,
            }));
        }

        service.add_account("user-admin", "admin", "admin-pass", Role::Admin, "org-sys", true);
        service.add_account("user-olga", "olga", "olga-pass", Role::OrgAdmin, "org-acme", true);
        service.add_account("user-ivy", "ivy", "ivy-pass", Role::Viewer, "org-acme", false);
        service.add_account("user-ed", "ed", "ed-pass", Role::Editor, "org-globex", true);
        service
    }

    fn rows(&mut self, table: &str) -> &mut Vec<Value> {
        self.tables.entry(table.to_string()).or_default()
    }

    fn add_account(
        &mut self,
        id: &str,
        username: &str,
        password: &str,
        role: Role,
        organization_id: &str,
        is_active: bool,
    ) {
        let email = format!("{}@example.com", username);
        self.identities.push(Identity {
            id: id.to_string(),
            email: email.clone(),
            password: password.to_string(),
        });
        self.rows("profiles").push(json!({
            "id": id,
            "username": username,
            "email": email,
            "role": role,
            "organization_id": organization_id,
            "created_at": CREATED_AT,
            "is_active": is_active,
        }));
    }

    fn identity(&self, id: &str) -> Option<&Identity> {
        self.identities.iter().find(|identity| identity.id == id)
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

fn is_service(headers: &HeaderMap) -> bool {
    bearer(headers) == Some(SERVICE_KEY)
}

/// Equality filters only; `select`, `order` and `limit` are handled separately
fn row_matches(row: &Value, params: &HashMap<String, String>) -> bool {
    params
        .iter()
        .filter(|(column, _)| !matches!(column.as_str(), "select" | "order" | "limit"))
        .all(|(column, filter)| {
            let expected = filter.strip_prefix("eq.").unwrap_or(filter);
            match &row[column.as_str()] {
                Value::String(value) => value == expected,
                Value::Null => false,
                other => other.to_string() == expected,
            }
        })
}

async fn token(State(service): State<Shared>, Json(body): Json<Value>) -> Response {
    let service = service.lock().unwrap();
    let identity = service
        .identities
        .iter()
        .find(|i| body["email"] == i.email.as_str() && body["password"] == i.password.as_str());

    match identity {
        Some(identity) => Json(json!({
            "access_token": format!("token-{}", identity.id),
            "token_type": "bearer",
            "expires_in": 3600,
            "user": { "id": identity.id, "email": identity.email }
        }))
        .into_response(),
        None => (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" }))).into_response(),
    }
}

async fn current_user(State(service): State<Shared>, headers: HeaderMap) -> Response {
    let service = service.lock().unwrap();
    let identity = bearer(&headers)
        .and_then(|token| token.strip_prefix("token-"))
        .and_then(|id| service.identity(id));

    match identity {
        Some(identity) => Json(json!({ "id": identity.id, "email": identity.email })).into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn logout(State(service): State<Shared>) -> StatusCode {
    service.lock().unwrap().logouts += 1;
    StatusCode::NO_CONTENT
}

async fn admin_create_user(
    State(service): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !is_service(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let mut service = service.lock().unwrap();
    service.next_id += 1;
    let identity = Identity {
        id: format!("user-new-{}", service.next_id),
        email: body["email"].as_str().unwrap_or_default().to_string(),
        password: body["password"].as_str().unwrap_or_default().to_string(),
    };
    let reply = json!({ "id": identity.id, "email": identity.email });
    service.identities.push(identity);
    Json(reply).into_response()
}

async fn admin_update_user(
    State(service): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if !is_service(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let mut service = service.lock().unwrap();
    let Some(identity) = service.identities.iter_mut().find(|i| i.id == id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Some(password) = body["password"].as_str() {
        identity.password = password.to_string();
    }
    Json(json!({ "id": identity.id, "email": identity.email })).into_response()
}

async fn admin_delete_user(
    State(service): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !is_service(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let mut service = service.lock().unwrap();
    service.identities.retain(|identity| identity.id != id);
    service.deleted_identities.push(id);
    StatusCode::OK.into_response()
}

async fn select_rows(
    State(service): State<Shared>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut service = service.lock().unwrap();
    let organizations = service.rows("organizations").clone();
    let embed = params
        .get("select")
        .is_some_and(|columns| columns.contains("organizations("));
    let limit = params
        .get("limit")
        .and_then(|limit| limit.parse().ok())
        .unwrap_or(usize::MAX);

    let rows: Vec<Value> = service
        .rows(&table)
        .iter()
        .filter(|row| row_matches(row, &params))
        .take(limit)
        .cloned()
        .map(|mut row| {
            if embed {
                let organization = organizations
                    .iter()
                    .find(|o| o["id"] == row["organization_id"])
                    .cloned()
                    .unwrap_or(Value::Null);
                row["organizations"] = organization;
            }
            row
        })
        .collect();

    Json(rows).into_response()
}

async fn insert_row(
    State(service): State<Shared>,
    Path(table): Path<String>,
    Json(mut row): Json<Value>,
) -> Response {
    let mut service = service.lock().unwrap();
    if table == "profiles" && service.fail_profile_insert {
        return (StatusCode::CONFLICT, "duplicate key value violates unique constraint").into_response();
    }

    service.next_id += 1;
    let id = format!("row-{}", service.next_id);
    if let Some(fields) = row.as_object_mut() {
        fields.entry("id").or_insert(json!(id));
        fields.entry("created_at").or_insert(json!(CREATED_AT));
    }
    service.rows(&table).push(row.clone());
    (StatusCode::CREATED, Json(json!([row]))).into_response()
}

async fn update_rows(
    State(service): State<Shared>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(changes): Json<Map<String, Value>>,
) -> Response {
    let mut service = service.lock().unwrap();
    let mut updated = Vec::new();

    for row in service.rows(&table).iter_mut() {
        if !row_matches(row, &params) {
            continue;
        }
        if let Some(fields) = row.as_object_mut() {
            for (column, value) in &changes {
                fields.insert(column.clone(), value.clone());
            }
        }
        updated.push(row.clone());
    }

    Json(updated).into_response()
}

async fn delete_rows(
    State(service): State<Shared>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> StatusCode {
    let mut service = service.lock().unwrap();
    service.rows(&table).retain(|row| !row_matches(row, &params));
    StatusCode::NO_CONTENT
}

async fn stub_service(service: Shared) -> String {
    let app = Router::new()
        .route("/auth/v1/health", get(|| async { StatusCode::OK }))
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/user", get(current_user))
        .route("/auth/v1/logout", post(logout))
        .route("/auth/v1/admin/users", post(admin_create_user))
        .route(
            "/auth/v1/admin/users/{id}",
            put(admin_update_user).delete(admin_delete_user),
        )
        .route(
            "/rest/v1/{table}",
            get(select_rows)
                .post(insert_row)
                .patch(update_rows)
                .delete(delete_rows),
        )
        .with_state(service);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

struct RemoteApp {
    manager: AccessManager,
    backend: Arc<RemoteBackend>,
    storage: MemoryClientStorage,
    service: Shared,
    url: String,
    with_service_key: bool,
}

impl RemoteApp {
    /// Another manager over the same service and client storage
    fn restart(&self) -> AccessManager {
        remote_manager(&self.url, self.with_service_key, &self.storage).0
    }

    async fn login(&self, username: &str) {
        self.manager
            .login(&format!("{}@example.com", username), &format!("{}-pass", username), false)
            .await
            .unwrap();
    }

    fn profile_count(&self) -> usize {
        self.service.lock().unwrap().rows("profiles").len()
    }
}

fn remote_manager(
    url: &str,
    with_service_key: bool,
    storage: &MemoryClientStorage,
) -> (AccessManager, Arc<RemoteBackend>) {
    let mut config = RemoteClientConfig::new(url, "anon-key");
    if with_service_key {
        config = config.with_service_key(SERVICE_KEY);
    }

    let client = Arc::new(RemoteClient::new(config).unwrap());
    let backend = Arc::new(RemoteBackend::new(client, Arc::new(storage.clone())));
    let remote: Arc<dyn IdentityBackend> = backend.clone();
    let local: Arc<dyn IdentityBackend> = Arc::new(LocalBackend::new(
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(storage.clone()),
    ));

    let manager = AccessManager::new(
        BackendSet {
            remote: Some(remote),
            local,
        },
        Arc::new(storage.clone()),
    );
    (manager, backend)
}

async fn spawn_remote(with_service_key: bool) -> RemoteApp {
    let service: Shared = Arc::new(Mutex::new(Service::seeded()));
    let url = stub_service(service.clone()).await;
    let storage = MemoryClientStorage::new();
    let (manager, backend) = remote_manager(&url, with_service_key, &storage);

    assert_eq!(manager.initialize().await.unwrap(), BackendKind::Remote);
    assert!(!manager.used_fallback());

    RemoteApp {
        manager,
        backend,
        storage,
        service,
        url,
        with_service_key,
    }
}

#[tokio::test]
async fn test_inactive_profile_is_signed_out() {
    let app = spawn_remote(true).await;

    let result = app.manager.login("ivy@example.com", "ivy-pass", false).await;
    assert!(matches!(result, Err(AccessError::PermissionDenied { .. })));
    assert!(!app.manager.is_authenticated());
    assert!(app.storage.get(REMOTE_SESSION_KEY).await.unwrap().is_none());
    assert_eq!(app.service.lock().unwrap().logouts, 1);

    let result = app.manager.login("ivy@example.com", "wrong", false).await;
    assert!(matches!(result, Err(AccessError::InvalidCredentials)));
}

#[tokio::test]
async fn test_session_restored_from_stored_token() {
    let app = spawn_remote(true).await;
    app.login("olga").await;
    assert!(app.storage.get(REMOTE_SESSION_KEY).await.unwrap().is_some());

    let reopened = app.restart();
    assert_eq!(reopened.initialize().await.unwrap(), BackendKind::Remote);
    let user = reopened.current_user().unwrap();
    assert_eq!(user.id, "user-olga");
    assert_eq!(user.role, Role::OrgAdmin);
}

#[tokio::test]
async fn test_org_admin_sees_only_own_organization() {
    let app = spawn_remote(true).await;
    app.login("olga").await;

    let users = app.manager.list_users(None).await.unwrap();
    let mut names: Vec<&str> = users.iter().map(|p| p.user.username.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, ["ivy", "olga"]);
    assert!(users
        .iter()
        .all(|p| p.organization.as_ref().map(|o| o.name.as_str()) == Some("Acme")));

    assert!(app.manager.list_users(Some("org-globex")).await.unwrap().is_empty());

    let organizations = app.manager.list_organizations().await.unwrap();
    assert_eq!(organizations.len(), 1);
    assert_eq!(organizations[0].id, "org-acme");

    let denied = app.manager.get_user("user-ed").await;
    assert!(matches!(denied, Err(AccessError::PermissionDenied { .. })));
}

#[tokio::test]
async fn test_approval_provisions_identity_once() {
    let app = spawn_remote(true).await;

    let request = app
        .manager
        .request_account(AccountRequestInput {
            username: "newbie".to_string(),
            email: "newbie@example.com".to_string(),
            requested_role: Role::Viewer,
            organization_id: Some("org-acme".to_string()),
            message: None,
        })
        .await
        .unwrap();

    app.login("admin").await;
    let approval = app.manager.approve_account_request(&request.id).await.unwrap();
    assert_eq!(approval.temporary_password.len(), 16);
    assert_eq!(approval.user.organization_id.as_deref(), Some("org-acme"));
    assert_eq!(approval.request.approved_by.as_deref(), Some("user-admin"));
    let profiles = app.profile_count();

    // The manager sees the approved status and refuses
    let again = app.manager.approve_account_request(&request.id).await;
    assert!(matches!(again, Err(AccessError::Conflict { .. })));

    // A stale pending copy is refused by the conditional update itself
    let stale = app
        .backend
        .resolve_account_request(&request.rejected("user-admin", None))
        .await;
    assert!(matches!(stale, Err(AccessError::Conflict { .. })));
    assert_eq!(app.profile_count(), profiles);

    app.manager.logout().await.unwrap();
    app.manager
        .login("newbie@example.com", &approval.temporary_password, false)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_profile_insert_removes_identity() {
    let app = spawn_remote(true).await;
    app.login("admin").await;
    app.service.lock().unwrap().fail_profile_insert = true;

    let result = app
        .manager
        .create_user(NewUser {
            username: "orphan".to_string(),
            email: "orphan@example.com".to_string(),
            password: "orphan-pass".to_string(),
            role: Role::Editor,
            organization_id: Some("org-acme".to_string()),
            is_active: true,
        })
        .await;
    assert!(matches!(result, Err(AccessError::Conflict { .. })));

    let service = app.service.lock().unwrap();
    assert!(!service.identities.iter().any(|i| i.email == "orphan@example.com"));
    assert_eq!(service.deleted_identities.len(), 1);
}

#[tokio::test]
async fn test_delete_without_service_key_keeps_identity() {
    let app = spawn_remote(false).await;
    app.login("admin").await;

    app.manager.delete_user("user-ed").await.unwrap();

    let denied = app.manager.get_user("user-ed").await;
    assert!(matches!(denied, Err(AccessError::NotFound { .. })));
    let service = app.service.lock().unwrap();
    assert!(service.identity("user-ed").is_some());
    assert!(service.deleted_identities.is_empty());
}
