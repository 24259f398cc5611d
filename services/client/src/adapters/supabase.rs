//! services/client/src/adapters/supabase.rs
//!
//! This module contains the adapter for the hosted auth + profile backend.
//! It implements the `RemoteProfileService` port from the `core` crate over
//! the backend's REST API (GoTrue for auth, PostgREST for the profile table).
//!
//! The user's auth session can be kept in a [`LocalStorage`] so that a
//! relaunch restored from a saved profile keeps calling the backend as that
//! user. Access tokens close to expiry are refreshed before use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use elder_ally_core::domain::{AccountId, Credentials, Profile, RoleDetails};
use elder_ally_core::ports::{LocalStorage, PortError, PortResult, RemoteProfileService};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;

/// Storage key holding the persisted auth session.
pub const AUTH_SESSION_KEY: &str = "auth_session";

/// `user_type` value the profile table uses for patients.
const PATIENT_USER_TYPE: &str = "user";
const PROVIDER_USER_TYPE: &str = "provider";

/// Tokens expiring within this many seconds are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 60;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `RemoteProfileService` port over HTTPS.
pub struct SupabaseAdapter {
    client: Client,
    base_url: String,
    anon_key: SecretString,
    table: String,
    tokens: Mutex<TokenState>,
    token_store: Option<Arc<dyn LocalStorage>>,
}

#[derive(Default)]
struct TokenState {
    /// Whether the persisted session has been read yet.
    restored: bool,
    session: Option<AuthSession>,
}

/// Tokens issued to the signed-in user.
struct AuthSession {
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    /// Unix seconds.
    expires_at: Option<i64>,
}

impl AuthSession {
    fn from_response(response: &AuthResponse) -> Option<Self> {
        let access_token = response.access_token.clone()?;
        let expires_at = response
            .expires_at
            .or_else(|| response.expires_in.map(|secs| Utc::now().timestamp() + secs));
        Some(Self {
            access_token: SecretString::from(access_token),
            refresh_token: response.refresh_token.clone().map(SecretString::from),
            expires_at,
        })
    }

    fn needs_refresh(&self, now: i64) -> bool {
        self.refresh_token.is_some()
            && self
                .expires_at
                .is_some_and(|at| at - REFRESH_MARGIN_SECS <= now)
    }
}

/// On-disk form of an [`AuthSession`].
#[derive(Serialize, Deserialize)]
struct StoredAuthSession {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

impl From<&AuthSession> for StoredAuthSession {
    fn from(session: &AuthSession) -> Self {
        Self {
            access_token: session.access_token.expose_secret().to_string(),
            refresh_token: session
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
            expires_at: session.expires_at,
        }
    }
}

impl From<StoredAuthSession> for AuthSession {
    fn from(stored: StoredAuthSession) -> Self {
        Self {
            access_token: SecretString::from(stored.access_token),
            refresh_token: stored.refresh_token.map(SecretString::from),
            expires_at: stored.expires_at,
        }
    }
}

impl SupabaseAdapter {
    /// Creates a new `SupabaseAdapter` that keeps its auth session in memory only.
    pub fn new(
        base_url: &str,
        anon_key: SecretString,
        table: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
            table: table.into(),
            tokens: Mutex::new(TokenState::default()),
            token_store: None,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        Self::new(
            config.supabase_url.as_str(),
            config.supabase_anon_key.clone(),
            config.profiles_table.clone(),
            config.request_timeout,
        )
    }

    /// Persists the auth session under [`AUTH_SESSION_KEY`] in `storage` and
    /// restores it from there on first use.
    pub fn with_token_store(mut self, storage: Arc<dyn LocalStorage>) -> Self {
        self.token_store = Some(storage);
        self
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    /// Attaches the project key plus the user's token, falling back to the
    /// anonymous key before anyone has signed in.
    async fn authorized(&self, request: RequestBuilder) -> PortResult<RequestBuilder> {
        let bearer = self.bearer().await?;
        Ok(request
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(bearer.expose_secret()))
    }

    async fn bearer(&self) -> PortResult<SecretString> {
        let mut state = self.tokens.lock().await;
        if !state.restored {
            state.restored = true;
            state.session = self.read_stored_session().await;
        }

        let refresh_token = match &state.session {
            Some(session) if session.needs_refresh(Utc::now().timestamp()) => {
                session.refresh_token.clone()
            }
            _ => None,
        };
        if let Some(refresh_token) = refresh_token {
            match self.refresh(&refresh_token).await {
                Ok(session) => {
                    self.write_stored_session(&session).await;
                    state.session = Some(session);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to refresh the auth session");
                    if matches!(e, PortError::Unauthorized(_)) {
                        state.session = None;
                        self.remove_stored_session().await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(state
            .session
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone()))
    }

    async fn refresh(&self, refresh_token: &SecretString) -> PortResult<AuthSession> {
        let body = serde_json::json!({ "refresh_token": refresh_token.expose_secret() });
        let response = self
            .post_auth("token?grant_type=refresh_token", &body)
            .await
            .map_err(rejected_as_unauthorized)?;
        let session = AuthSession::from_response(&response).ok_or_else(|| {
            PortError::Unexpected("refresh response did not include an access token".to_string())
        })?;
        info!("Auth session refreshed");
        Ok(session)
    }

    async fn post_auth(&self, path: &str, body: &serde_json::Value) -> PortResult<AuthResponse> {
        let response = self
            .client
            .post(self.auth_url(path))
            .header("apikey", self.anon_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(transport)?;

        check(response).await?.json().await.map_err(decode)
    }

    async fn send_auth(&self, path: &str, credentials: &Credentials) -> PortResult<AccountId> {
        let body = serde_json::json!({
            "email": credentials.email,
            "password": credentials.password,
        });
        let response = self.post_auth(path, &body).await?;
        let id = response.account_id().ok_or_else(|| {
            PortError::Unexpected("auth response did not include a user id".to_string())
        })?;
        self.remember(&response).await;
        Ok(AccountId(id))
    }

    /// Sign-up awaiting email confirmation carries no token; the previous
    /// session is kept in that case.
    async fn remember(&self, response: &AuthResponse) {
        let Some(session) = AuthSession::from_response(response) else {
            return;
        };
        self.write_stored_session(&session).await;
        let mut state = self.tokens.lock().await;
        state.restored = true;
        state.session = Some(session);
    }

    async fn forget(&self) {
        {
            let mut state = self.tokens.lock().await;
            state.restored = true;
            state.session = None;
        }
        self.remove_stored_session().await;
    }

    async fn read_stored_session(&self) -> Option<AuthSession> {
        let storage = self.token_store.as_ref()?;
        let raw = match storage.get(AUTH_SESSION_KEY).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted auth session");
                return None;
            }
        };
        match serde_json::from_str::<StoredAuthSession>(&raw) {
            Ok(stored) => {
                debug!("Restored persisted auth session");
                Some(stored.into())
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable auth session");
                None
            }
        }
    }

    async fn write_stored_session(&self, session: &AuthSession) {
        let Some(storage) = &self.token_store else {
            return;
        };
        let result = match serde_json::to_string(&StoredAuthSession::from(session)) {
            Ok(raw) => storage.put(AUTH_SESSION_KEY, &raw).await,
            Err(e) => Err(PortError::Unexpected(e.to_string())),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist the auth session");
        }
    }

    async fn remove_stored_session(&self) {
        let Some(storage) = &self.token_store else {
            return;
        };
        if let Err(e) = storage.remove(AUTH_SESSION_KEY).await {
            warn!(error = %e, "Failed to remove the persisted auth session");
        }
    }
}

//=========================================================================================
// Wire Types
//=========================================================================================

/// Sign-up returns either a full session or, when email confirmation is
/// required, the bare user object.
#[derive(Deserialize)]
struct AuthResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: Option<AuthUser>,
    id: Option<Uuid>,
}

#[derive(Deserialize)]
struct AuthUser {
    id: Uuid,
}

impl AuthResponse {
    fn account_id(&self) -> Option<Uuid> {
        self.user.as_ref().map(|u| u.id).or(self.id)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ProfileRow {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    phone: String,
    user_type: String,
    #[serde(default)]
    emergency_contact: Option<String>,
    #[serde(default)]
    emergency_phone: Option<String>,
    #[serde(default)]
    clinic_name: Option<String>,
    #[serde(default)]
    license_number: Option<String>,
    #[serde(default, skip_serializing)]
    created_at: Option<DateTime<Utc>>,
}

impl ProfileRow {
    fn from_domain(profile: &Profile) -> Self {
        let mut row = Self {
            id: profile.id.as_uuid(),
            email: profile.email.clone(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            phone: profile.phone.clone(),
            user_type: String::new(),
            emergency_contact: None,
            emergency_phone: None,
            clinic_name: None,
            license_number: None,
            created_at: None,
        };
        match &profile.details {
            RoleDetails::Patient {
                emergency_contact_name,
                emergency_contact_phone,
            } => {
                row.user_type = PATIENT_USER_TYPE.to_string();
                row.emergency_contact = Some(emergency_contact_name.clone());
                row.emergency_phone = Some(emergency_contact_phone.clone());
            }
            RoleDetails::Provider {
                clinic_name,
                license_number,
            } => {
                row.user_type = PROVIDER_USER_TYPE.to_string();
                row.clinic_name = Some(clinic_name.clone());
                row.license_number = license_number.clone();
            }
        }
        row
    }

    fn into_domain(self) -> PortResult<Profile> {
        let id = self.id;
        let invalid = |what: &str| PortError::Unexpected(format!("profile {id} is missing {what}"));
        let details = match self.user_type.as_str() {
            PATIENT_USER_TYPE | "patient" => RoleDetails::Patient {
                emergency_contact_name: self
                    .emergency_contact
                    .clone()
                    .ok_or_else(|| invalid("emergency_contact"))?,
                emergency_contact_phone: self
                    .emergency_phone
                    .clone()
                    .ok_or_else(|| invalid("emergency_phone"))?,
            },
            PROVIDER_USER_TYPE => RoleDetails::Provider {
                clinic_name: self
                    .clinic_name
                    .clone()
                    .ok_or_else(|| invalid("clinic_name"))?,
                license_number: self.license_number.clone(),
            },
            other => {
                return Err(PortError::Unexpected(format!(
                    "profile {id} has unknown user_type '{other}'"
                )))
            }
        };

        Ok(Profile {
            id: AccountId(id),
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            phone: self.phone,
            details,
            created_at: self.created_at,
        })
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

fn transport(e: reqwest::Error) -> PortError {
    PortError::Network(e.to_string())
}

/// The auth service answers a bad password or refresh token with 400.
fn rejected_as_unauthorized(e: PortError) -> PortError {
    match e {
        PortError::Rejected(message) => PortError::Unauthorized(message),
        other => other,
    }
}

fn decode(e: reqwest::Error) -> PortError {
    PortError::Unexpected(format!("unreadable response: {e}"))
}

/// Pulls the human-readable message out of an auth or PostgREST error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| value.get(key)?.as_str().map(str::to_string))
}

async fn check(response: Response) -> PortResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| status.to_string());
    debug!(%status, %message, "Backend returned an error");

    Err(match status {
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            PortError::Rejected(message)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unauthorized(message),
        StatusCode::NOT_FOUND => PortError::NotFound(message),
        _ => PortError::Unexpected(format!("{status}: {message}")),
    })
}

//=========================================================================================
// `RemoteProfileService` Trait Implementation
//=========================================================================================

#[async_trait]
impl RemoteProfileService for SupabaseAdapter {
    async fn create_account(&self, credentials: &Credentials) -> PortResult<AccountId> {
        let id = self.send_auth("signup", credentials).await?;
        info!(account_id = %id, "Auth user created");
        Ok(id)
    }

    async fn authenticate(&self, credentials: &Credentials) -> PortResult<AccountId> {
        // A bad password comes back as 400 invalid_grant.
        self.send_auth("token?grant_type=password", credentials)
            .await
            .map_err(rejected_as_unauthorized)
    }

    async fn sign_out(&self) -> PortResult<()> {
        let result = match self.authorized(self.client.post(self.auth_url("logout"))).await {
            Ok(request) => match request.send().await {
                Ok(response) => check(response).await.map(|_| ()),
                Err(e) => Err(transport(e)),
            },
            Err(e) => Err(e),
        };
        self.forget().await;
        result
    }

    async fn create_profile(&self, profile: &Profile) -> PortResult<()> {
        let row = ProfileRow::from_domain(profile);
        let request = self
            .authorized(self.client.post(self.table_url()))
            .await?
            .header("Prefer", "return=minimal")
            .json(&row);

        check(request.send().await.map_err(transport)?).await?;
        info!(account_id = %profile.id, "Profile inserted");
        Ok(())
    }

    async fn fetch_profile(&self, id: AccountId) -> PortResult<Option<Profile>> {
        let request = self
            .authorized(self.client.get(self.table_url()))
            .await?
            .query(&[("id", format!("eq.{id}")), ("select", "*".to_string())]);

        let rows: Vec<ProfileRow> = check(request.send().await.map_err(transport)?)
            .await?
            .json()
            .await
            .map_err(decode)?;
        debug!(account_id = %id, found = rows.len(), "Fetched profile rows");

        rows.into_iter().next().map(ProfileRow::into_domain).transpose()
    }

    async fn update_profile(&self, profile: &Profile) -> PortResult<()> {
        let row = ProfileRow::from_domain(profile);
        let request = self
            .authorized(self.client.patch(self.table_url()))
            .await?
            .query(&[("id", format!("eq.{}", profile.id))])
            .header("Prefer", "return=representation")
            .json(&row);

        let updated: Vec<serde_json::Value> = check(request.send().await.map_err(transport)?)
            .await?
            .json()
            .await
            .map_err(decode)?;
        // PostgREST answers 200 with no rows when the filter, or row-level
        // security for the caller, matches nothing.
        if updated.is_empty() {
            return Err(PortError::NotFound(format!(
                "no profile {} the current user may update",
                profile.id
            )));
        }
        Ok(())
    }

    async fn ping(&self) -> PortResult<()> {
        let request = self
            .authorized(self.client.get(self.table_url()))
            .await?
            .query(&[("select", "id"), ("limit", "1")]);

        check(request.send().await.map_err(transport)?).await?;
        Ok(())
    }
}
