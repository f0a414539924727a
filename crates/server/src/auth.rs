use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use embargo_common::UserConfig;
use embargo_rules::UserContext;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::state::SharedState;

pub const SESSION_COOKIE: &str = "sessionid";

/// Hex-encoded SHA-256 digest of a password.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

struct UserRecord {
    password_sha256: String,
    context: UserContext,
}

/// Accounts known to the service, loaded from configuration.
pub struct UserDirectory {
    users: HashMap<String, UserRecord>,
}

impl UserDirectory {
    pub fn from_config(users: &[UserConfig]) -> Self {
        let users = users
            .iter()
            .map(|u| {
                let record = UserRecord {
                    password_sha256: u.password_sha256.to_ascii_lowercase(),
                    context: UserContext {
                        username: u.username.clone(),
                        is_staff: u.is_staff,
                        profile_country: u.country.clone(),
                    },
                };
                (u.username.clone(), record)
            })
            .collect();
        Self { users }
    }

    pub fn get(&self, username: &str) -> Option<UserContext> {
        self.users.get(username).map(|r| r.context.clone())
    }

    pub fn authenticate(&self, username: &str, password: &str) -> Option<UserContext> {
        let record = self.users.get(username)?;
        (record.password_sha256 == hash_password(password)).then(|| record.context.clone())
    }
}

/// Sessions older than this are dropped, matching the cookie `Max-Age`.
pub const SESSION_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

struct Session {
    username: String,
    created: Instant,
}

/// Live login sessions, keyed by the opaque cookie value.
///
/// Expired sessions are removed when they are looked up, and swept
/// whenever a new session is created.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_ttl(SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Start a session for `username` and return its id.
    pub fn create(&self, username: &str) -> String {
        self.purge_expired();
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.sessions.insert(
            id.clone(),
            Session {
                username: username.to_string(),
                created: Instant::now(),
            },
        );
        id
    }

    pub fn username(&self, id: &str) -> Option<String> {
        let expired = self
            .sessions
            .remove_if(id, |_, session| session.created.elapsed() >= self.ttl);
        if expired.is_some() {
            debug!("dropped expired session");
            return None;
        }
        self.sessions.get(id).map(|session| session.username.clone())
    }

    pub fn remove(&self, id: &str) -> Option<String> {
        self.sessions.remove(id).map(|(_, session)| session.username)
    }

    fn purge_expired(&self) {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.created.elapsed() < self.ttl);
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            debug!(purged, "purged expired sessions");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Value of the session cookie, if the request carries one.
pub fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
}

/// Resolve the session cookie to a user and attach it to the request.
pub async fn session_layer(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Response {
    let user = session_id(req.headers())
        .and_then(|id| state.sessions.username(id))
        .and_then(|username| state.users.get(&username));
    if let Some(user) = user {
        req.extensions_mut().insert(user);
    }
    next.run(req).await
}

/// The logged-in user, if any.
pub struct CurrentUser(pub Option<UserContext>);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentUser(parts.extensions.get::<UserContext>().cloned()))
    }
}

/// A logged-in staff user. Rejects with 401 or 403 otherwise.
pub struct StaffUser(pub UserContext);

impl<S> FromRequestParts<S> for StaffUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<UserContext>() {
            Some(user) if user.is_staff => Ok(StaffUser(user.clone())),
            Some(_) => Err((
                StatusCode::FORBIDDEN,
                Json(json!({ "status": "error", "message": "staff access required" })),
            )),
            None => Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "status": "error", "message": "login required" })),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// POST /login
pub async fn login(
    State(state): State<SharedState>,
    Json(body): Json<LoginRequest>,
) -> Response {
    let Some(user) = state.users.authenticate(&body.username, &body.password) else {
        warn!(username = %body.username, "failed login");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "error", "message": "invalid username or password" })),
        )
            .into_response();
    };

    let id = state.sessions.create(&user.username);
    info!(username = %user.username, "user logged in");

    let cookie = format!(
        "{SESSION_COOKIE}={id}; Path=/; HttpOnly; Max-Age={}",
        SESSION_TTL.as_secs()
    );
    (
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(json!({ "status": "ok", "username": user.username })),
    )
        .into_response()
}

/// POST /logout
pub async fn logout(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if let Some(username) = session_id(&headers).and_then(|id| state.sessions.remove(id)) {
        info!(username = %username, "user logged out");
    }
    (
        StatusCode::OK,
        [(SET_COOKIE, format!("{SESSION_COOKIE}=; Path=/; Max-Age=0"))],
        Json(json!({ "status": "ok" })),
    )
        .into_response()
}
