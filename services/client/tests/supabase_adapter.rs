//! Integration tests for the hosted-backend adapter.
//!
//! Each test spins up an Axum server on a random port that mimics the auth
//! and profile-table endpoints, then drives `SupabaseAdapter` over real HTTP.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use uuid::Uuid;

use client_lib::adapters::supabase::AUTH_SESSION_KEY;
use client_lib::adapters::{SqliteStorage, SupabaseAdapter};
use elder_ally_core::domain::{AccountId, Credentials, Profile, Registration, RoleDetails};
use elder_ally_core::flows::{FlowError, ProfileUpdateFlow, RegistrationFlow, SignInFlow};
use elder_ally_core::ports::{LocalStorage, PortError, RemoteProfileService};
use elder_ally_core::session::SessionStore;

const ANON_KEY: &str = "anon-key";
const USER_TOKEN: &str = "user-token";
const REFRESH_TOKEN: &str = "refresh-1";
const REFRESHED_TOKEN: &str = "user-token-2";

//=========================================================================================
// Fake backend
//=========================================================================================

struct Backend {
    account_id: Uuid,
    rows: Mutex<Vec<Value>>,
    /// `Authorization` header of every table read and insert, in order.
    table_auth: Mutex<Vec<String>>,
    /// `Authorization` header of every PATCH, in order.
    patch_auth: Mutex<Vec<String>>,
    /// `grant_type` of every token request, in order.
    grants: Mutex<Vec<String>>,
    /// Lifetime of issued access tokens.
    expires_in: AtomicI64,
}

fn auth_header(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn session_body(backend: &Backend, access_token: &str) -> Json<Value> {
    Json(json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": backend.expires_in.load(Ordering::SeqCst),
        "refresh_token": REFRESH_TOKEN,
        "user": { "id": backend.account_id, "email": "jane@x.com" }
    }))
}

fn invalid_grant(description: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "invalid_grant", "error_description": description })),
    )
        .into_response()
}

async fn signup(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    if body["email"] == "taken@x.com" {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "code": 422, "msg": "User already registered" })),
        )
            .into_response();
    }
    session_body(&backend, USER_TOKEN).into_response()
}

async fn token(
    State(backend): State<Arc<Backend>>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    let grant = query.get("grant_type").cloned().unwrap_or_default();
    backend.grants.lock().unwrap().push(grant.clone());
    match grant.as_str() {
        "password" if body["password"] == "secret1" => {
            session_body(&backend, USER_TOKEN).into_response()
        }
        "refresh_token" if body["refresh_token"] == REFRESH_TOKEN => {
            session_body(&backend, REFRESHED_TOKEN).into_response()
        }
        "refresh_token" => invalid_grant("Invalid Refresh Token"),
        _ => invalid_grant("Invalid login credentials"),
    }
}

async fn logout() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn insert_row(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(row): Json<Value>,
) -> Response {
    backend.table_auth.lock().unwrap().push(auth_header(&headers));
    if row["email"] == "broken@x.com" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "insert failed" })),
        )
            .into_response();
    }
    backend.rows.lock().unwrap().push(row);
    StatusCode::CREATED.into_response()
}

fn requested_id(query: &HashMap<String, String>) -> Option<String> {
    query
        .get("id")
        .and_then(|v| v.strip_prefix("eq."))
        .map(str::to_string)
}

async fn select_rows(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Vec<Value>> {
    backend.table_auth.lock().unwrap().push(auth_header(&headers));
    let id = requested_id(&query);
    let rows = backend
        .rows
        .lock()
        .unwrap()
        .iter()
        .filter(|row| id.is_none() || row["id"].as_str() == id.as_deref())
        .map(|row| {
            let mut row = row.clone();
            row["created_at"] = json!("2025-07-31T12:00:00.123456+00:00");
            row
        })
        .collect();
    Json(rows)
}

/// Row-level security: anonymous callers see no rows to update.
async fn update_row(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(row): Json<Value>,
) -> Json<Vec<Value>> {
    let auth = auth_header(&headers);
    backend.patch_auth.lock().unwrap().push(auth.clone());
    if auth == format!("Bearer {ANON_KEY}") {
        return Json(Vec::new());
    }

    let id = requested_id(&query);
    let mut rows = backend.rows.lock().unwrap();
    match rows
        .iter_mut()
        .find(|existing| existing["id"].as_str() == id.as_deref())
    {
        Some(existing) => {
            *existing = row.clone();
            Json(vec![row])
        }
        None => Json(Vec::new()),
    }
}

/// Start the fake backend on a random port, return (base url, backend).
async fn start_backend() -> (String, Arc<Backend>) {
    let backend = Arc::new(Backend {
        account_id: Uuid::new_v4(),
        rows: Mutex::new(Vec::new()),
        table_auth: Mutex::new(Vec::new()),
        patch_auth: Mutex::new(Vec::new()),
        grants: Mutex::new(Vec::new()),
        expires_in: AtomicI64::new(3600),
    });
    let app = Router::new()
        .route("/auth/v1/signup", post(signup))
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/logout", post(logout))
        .route(
            "/rest/v1/user_profiles",
            get(select_rows).post(insert_row).patch(update_row),
        )
        .with_state(backend.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://127.0.0.1:{port}"), backend)
}

fn adapter(base_url: &str) -> SupabaseAdapter {
    SupabaseAdapter::new(
        base_url,
        SecretString::from(ANON_KEY),
        "user_profiles",
        Duration::from_secs(5),
    )
    .unwrap()
}

/// An adapter that keeps its auth session in `storage`.
fn persistent_adapter(base_url: &str, storage: Arc<SqliteStorage>) -> SupabaseAdapter {
    adapter(base_url).with_token_store(storage)
}

fn jane(id: AccountId) -> Profile {
    Profile {
        id,
        email: "jane@x.com".to_string(),
        first_name: "Jane".to_string(),
        last_name: "Doe".to_string(),
        phone: "555-0001".to_string(),
        details: RoleDetails::Patient {
            emergency_contact_name: "John Doe".to_string(),
            emergency_contact_phone: "555-0002".to_string(),
        },
        created_at: None,
    }
}

//=========================================================================================
// Tests
//=========================================================================================

#[tokio::test]
async fn sign_up_then_insert_uses_the_user_token() {
    let (url, backend) = start_backend().await;
    let remote = adapter(&url);

    // Before any sign-in, table calls fall back to the anon key.
    remote.ping().await.unwrap();

    let id = remote
        .create_account(&Credentials::new("jane@x.com", "secret1"))
        .await
        .unwrap();
    assert_eq!(id, AccountId(backend.account_id));

    remote.create_profile(&jane(id)).await.unwrap();

    let auth = backend.table_auth.lock().unwrap().clone();
    assert_eq!(
        auth,
        vec![format!("Bearer {ANON_KEY}"), format!("Bearer {USER_TOKEN}")]
    );

    let row = backend.rows.lock().unwrap()[0].clone();
    assert_eq!(row["user_type"], "user");
    assert_eq!(row["emergency_contact"], "John Doe");
    assert_eq!(row["first_name"], "Jane");
}

#[tokio::test]
async fn fetch_reads_back_the_row() {
    let (url, backend) = start_backend().await;
    let remote = adapter(&url);
    let id = AccountId(backend.account_id);
    remote.create_profile(&jane(id)).await.unwrap();

    let fetched = remote.fetch_profile(id).await.unwrap().unwrap();

    assert_eq!(fetched.id, id);
    assert_eq!(fetched.details, jane(id).details);
    assert!(fetched.created_at.is_some());
}

#[tokio::test]
async fn fetch_unknown_id_is_none() {
    let (url, _backend) = start_backend().await;
    let remote = adapter(&url);

    let fetched = remote
        .fetch_profile(AccountId(Uuid::new_v4()))
        .await
        .unwrap();

    assert_eq!(fetched, None);
}

#[tokio::test]
async fn duplicate_email_is_rejected_with_backend_message() {
    let (url, _backend) = start_backend().await;
    let remote = adapter(&url);

    let err = remote
        .create_account(&Credentials::new("taken@x.com", "secret1"))
        .await
        .unwrap_err();

    assert_eq!(err, PortError::Rejected("User already registered".to_string()));
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let (url, _backend) = start_backend().await;
    let remote = adapter(&url);

    let err = remote
        .authenticate(&Credentials::new("jane@x.com", "nope"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        PortError::Unauthorized("Invalid login credentials".to_string())
    );
}

#[tokio::test]
async fn update_replaces_the_row() {
    let (url, backend) = start_backend().await;
    let remote = adapter(&url);
    let id = remote
        .authenticate(&Credentials::new("jane@x.com", "secret1"))
        .await
        .unwrap();
    remote.create_profile(&jane(id)).await.unwrap();

    let mut edited = jane(id);
    edited.phone = "555-9999".to_string();
    remote.update_profile(&edited).await.unwrap();

    let fetched = remote.fetch_profile(id).await.unwrap().unwrap();
    assert_eq!(fetched.phone, "555-9999");
    assert_eq!(
        *backend.patch_auth.lock().unwrap(),
        vec![format!("Bearer {USER_TOKEN}")]
    );
}

#[tokio::test]
async fn update_of_missing_row_is_not_found() {
    let (url, _backend) = start_backend().await;
    let remote = adapter(&url);
    remote
        .authenticate(&Credentials::new("jane@x.com", "secret1"))
        .await
        .unwrap();

    let err = remote
        .update_profile(&jane(AccountId(Uuid::new_v4())))
        .await
        .unwrap_err();

    assert!(matches!(err, PortError::NotFound(_)));
}

#[tokio::test]
async fn sign_out_drops_the_user_token() {
    let (url, backend) = start_backend().await;
    let remote = adapter(&url);
    remote
        .authenticate(&Credentials::new("jane@x.com", "secret1"))
        .await
        .unwrap();

    remote.sign_out().await.unwrap();
    remote.ping().await.unwrap();

    let auth = backend.table_auth.lock().unwrap().clone();
    assert_eq!(auth, vec![format!("Bearer {ANON_KEY}")]);
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let remote = adapter(&format!("http://127.0.0.1:{port}"));

    let err = remote.ping().await.unwrap_err();

    assert!(matches!(err, PortError::Network(_)));
}

#[tokio::test]
async fn registration_flow_over_http() {
    let (url, backend) = start_backend().await;
    let remote: Arc<dyn RemoteProfileService> = Arc::new(adapter(&url));
    let flow = RegistrationFlow::new(remote.clone());

    let registration = Registration {
        first_name: "Jane".to_string(),
        last_name: "Doe".to_string(),
        email: "jane@x.com".to_string(),
        phone: "555-0001".to_string(),
        password: "secret1".to_string(),
        details: RoleDetails::Patient {
            emergency_contact_name: "John Doe".to_string(),
            emergency_contact_phone: "555-0002".to_string(),
        },
    };
    let registered = flow.register(registration).await.unwrap();
    assert_eq!(registered.profile().id, AccountId(backend.account_id));

    let signed_in = SignInFlow::new(remote)
        .sign_in(Credentials::new("jane@x.com", "secret1"))
        .await
        .unwrap();
    assert_eq!(signed_in.profile().email, "jane@x.com");
    assert_eq!(signed_in.profile().details, registered.profile().details);
}

#[tokio::test]
async fn failed_insert_is_a_profile_creation_failure() {
    let (url, backend) = start_backend().await;
    let remote: Arc<dyn RemoteProfileService> = Arc::new(adapter(&url));
    let flow = RegistrationFlow::new(remote);

    let registration = Registration {
        first_name: "Bo".to_string(),
        last_name: "Ken".to_string(),
        email: "broken@x.com".to_string(),
        phone: "555-0003".to_string(),
        password: "secret1".to_string(),
        details: RoleDetails::Provider {
            clinic_name: "Oak Street Clinic".to_string(),
            license_number: None,
        },
    };
    let err = flow.register(registration).await.unwrap_err();

    assert!(matches!(
        err,
        FlowError::ProfileCreationFailed { account_id, .. } if account_id == AccountId(backend.account_id)
    ));
}

#[tokio::test]
async fn anonymous_update_matching_no_rows_is_not_found() {
    let (url, backend) = start_backend().await;
    let remote = adapter(&url);
    let id = AccountId(backend.account_id);
    remote.create_profile(&jane(id)).await.unwrap();

    let mut edited = jane(id);
    edited.phone = "555-9999".to_string();
    let err = remote.update_profile(&edited).await.unwrap_err();

    assert!(matches!(err, PortError::NotFound(_)));
    let fetched = remote.fetch_profile(id).await.unwrap().unwrap();
    assert_eq!(fetched.phone, "555-0001");
}

#[tokio::test]
async fn relaunch_keeps_updating_as_the_signed_in_user() {
    let (url, backend) = start_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite://{}?mode=rwc", dir.path().join("client.db").display());

    // First launch: sign in, create the row, remember the session.
    {
        let storage = Arc::new(SqliteStorage::connect(&db_url).await.unwrap());
        let remote = persistent_adapter(&url, storage.clone());
        let id = remote
            .authenticate(&Credentials::new("jane@x.com", "secret1"))
            .await
            .unwrap();
        remote.create_profile(&jane(id)).await.unwrap();
        SessionStore::new(storage.clone())
            .save(&jane(id))
            .await
            .unwrap();
        storage.close().await;
    }

    // Second launch: nothing but the saved state.
    let storage = Arc::new(SqliteStorage::connect(&db_url).await.unwrap());
    let session = Arc::new(SessionStore::new(storage.clone()));
    let restored = session.load().await.unwrap();
    let remote: Arc<dyn RemoteProfileService> =
        Arc::new(persistent_adapter(&url, storage.clone()));
    let flow = ProfileUpdateFlow::new(remote.clone(), session.clone());

    let edited = Profile {
        phone: "555-9999".to_string(),
        ..restored
    };
    flow.update(edited).await.unwrap();

    assert_eq!(
        *backend.patch_auth.lock().unwrap(),
        vec![format!("Bearer {USER_TOKEN}")]
    );
    let fetched = remote
        .fetch_profile(AccountId(backend.account_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.phone, "555-9999");
    assert_eq!(backend.grants.lock().unwrap().clone(), vec!["password"]);
}

#[tokio::test]
async fn restored_update_without_a_token_fails_and_keeps_the_session() {
    let (url, backend) = start_backend().await;
    let storage = Arc::new(SqliteStorage::connect("sqlite::memory:").await.unwrap());
    let id = AccountId(backend.account_id);
    adapter(&url).create_profile(&jane(id)).await.unwrap();
    let session = Arc::new(SessionStore::new(storage.clone()));
    session.save(&jane(id)).await.unwrap();

    // No auth session was ever stored, so the call goes out anonymously.
    let remote: Arc<dyn RemoteProfileService> = Arc::new(persistent_adapter(&url, storage));
    let flow = ProfileUpdateFlow::new(remote, session.clone());
    let edited = Profile {
        phone: "555-9999".to_string(),
        ..jane(id)
    };
    let err = flow.update(edited).await.unwrap_err();

    assert!(matches!(
        err,
        FlowError::ProfileUpdateFailed(PortError::NotFound(_))
    ));
    assert_eq!(session.current().map(|p| p.phone), Some("555-0001".to_string()));
}

#[tokio::test]
async fn expired_token_is_refreshed_before_use() {
    let (url, backend) = start_backend().await;
    backend.expires_in.store(0, Ordering::SeqCst);
    let storage = Arc::new(SqliteStorage::connect("sqlite::memory:").await.unwrap());
    let remote = persistent_adapter(&url, storage.clone());
    let id = remote
        .authenticate(&Credentials::new("jane@x.com", "secret1"))
        .await
        .unwrap();
    backend.expires_in.store(3600, Ordering::SeqCst);

    remote.create_profile(&jane(id)).await.unwrap();
    remote.update_profile(&jane(id)).await.unwrap();

    assert_eq!(
        backend.grants.lock().unwrap().clone(),
        vec!["password", "refresh_token"]
    );
    assert_eq!(
        backend.table_auth.lock().unwrap().clone(),
        vec![format!("Bearer {REFRESHED_TOKEN}")]
    );
    assert_eq!(
        *backend.patch_auth.lock().unwrap(),
        vec![format!("Bearer {REFRESHED_TOKEN}")]
    );
    let stored = storage.get(AUTH_SESSION_KEY).await.unwrap().unwrap();
    assert!(stored.contains(REFRESHED_TOKEN));
}

#[tokio::test]
async fn rejected_refresh_signs_the_adapter_out() {
    let (url, backend) = start_backend().await;
    let storage = Arc::new(SqliteStorage::connect("sqlite::memory:").await.unwrap());
    storage
        .put(
            AUTH_SESSION_KEY,
            r#"{"access_token":"stale","refresh_token":"revoked","expires_at":0}"#,
        )
        .await
        .unwrap();
    let remote = persistent_adapter(&url, storage.clone());

    let err = remote.ping().await.unwrap_err();
    assert_eq!(
        err,
        PortError::Unauthorized("Invalid Refresh Token".to_string())
    );
    assert_eq!(storage.get(AUTH_SESSION_KEY).await.unwrap(), None);

    // Later calls fall back to the anonymous key.
    remote.ping().await.unwrap();
    assert_eq!(
        backend.table_auth.lock().unwrap().clone(),
        vec![format!("Bearer {ANON_KEY}")]
    );
}

#[tokio::test]
async fn sign_out_forgets_the_persisted_session() {
    let (url, backend) = start_backend().await;
    let storage = Arc::new(SqliteStorage::connect("sqlite::memory:").await.unwrap());
    let remote = persistent_adapter(&url, storage.clone());
    remote
        .authenticate(&Credentials::new("jane@x.com", "secret1"))
        .await
        .unwrap();
    assert!(storage.get(AUTH_SESSION_KEY).await.unwrap().is_some());

    remote.sign_out().await.unwrap();

    assert_eq!(storage.get(AUTH_SESSION_KEY).await.unwrap(), None);
    persistent_adapter(&url, storage).ping().await.unwrap();
    assert_eq!(
        backend.table_auth.lock().unwrap().clone(),
        vec![format!("Bearer {ANON_KEY}")]
    );
}
