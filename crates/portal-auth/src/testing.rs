//! In-process identity service for tests
//!
//! `MockIdentityService` serves the four auth routes from an axum router
//! bound to `127.0.0.1:0`. Accounts, issued tokens and failure switches live
//! behind one lock so tests can reconfigure the service between calls.
//! The server task is aborted when the mock is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::claims;
use crate::gateway::AuthGateway;
use crate::store::TokenStore;

pub const DEFAULT_USERNAME: &str = "ada";
pub const DEFAULT_PASSWORD: &str = "correct-horse";
pub const DEFAULT_ROLE: &str = "student";

struct Account {
    password: String,
    role: String,
    user: Value,
    portal_token: Option<String>,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    /// access token -> username
    access: HashMap<String, String>,
    /// refresh token -> username
    refresh: HashMap<String, String>,
    issued: u64,
    access_ttl: Option<i64>,
    fail_logout: bool,
    login_delay: Option<Duration>,
    profile_delay: Option<Duration>,
    refresh_delay: Option<Duration>,
    login_override: Option<(StatusCode, Value)>,
    profile_failure: Option<StatusCode>,
    refresh_failure: Option<StatusCode>,
}

impl Inner {
    fn issue(&mut self, username: &str) -> (String, String) {
        self.issued += 1;
        let n = self.issued;
        let access = match self.access_ttl {
            Some(ttl) => {
                let exp = (claims::now_secs() as i64).saturating_add(ttl).max(0) as u64;
                claims::unsigned_jwt(&format!("{username}-{n}"), exp)
            }
            None => format!("at_{n}"),
        };
        let refresh = format!("rt_{n}");
        self.access.insert(access.clone(), username.to_owned());
        self.refresh.insert(refresh.clone(), username.to_owned());
        (access, refresh)
    }
}

#[derive(Default)]
struct MockState {
    inner: Mutex<Inner>,
    login_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    profile_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

/// Running mock of the identity service.
pub struct MockIdentityService {
    base_url: String,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockIdentityService {
    /// Start the service with the default student account
    /// (`ada` / `correct-horse`).
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/api/auth/login", post(login))
            .route("/api/auth/logout", post(logout))
            .route("/api/auth/profile", get(profile))
            .route("/api/auth/refresh", post(refresh))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock identity service");
        let addr = listener.local_addr().expect("mock identity service address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("mock identity service");
        });

        let mock = Self {
            base_url: format!("http://{addr}"),
            state,
            handle,
        };
        mock.add_account(
            DEFAULT_USERNAME,
            DEFAULT_PASSWORD,
            DEFAULT_ROLE,
            json!({
                "id": 1,
                "first_name": "Ada",
                "last_name": "Lovelace",
                "email": "ada@example.edu",
            }),
        )
        .await;
        mock
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Gateway pointed at this service with a plain client.
    pub fn gateway(&self, store: TokenStore) -> AuthGateway {
        AuthGateway::new(reqwest::Client::new(), &self.base_url, store)
            .expect("mock base url is valid")
    }

    pub async fn add_account(&self, username: &str, password: &str, role: &str, user: Value) {
        self.state.inner.lock().await.accounts.insert(
            username.to_owned(),
            Account {
                password: password.to_owned(),
                role: role.to_owned(),
                user,
                portal_token: None,
            },
        );
    }

    /// Issue `portal_token` alongside the pair on this account's logins.
    pub async fn set_portal_token(&self, username: &str, token: Option<&str>) {
        if let Some(account) = self.state.inner.lock().await.accounts.get_mut(username) {
            account.portal_token = token.map(str::to_owned);
        }
    }

    /// Replace the profile record the service returns for `username`.
    pub async fn update_user(&self, username: &str, user: Value) {
        if let Some(account) = self.state.inner.lock().await.accounts.get_mut(username) {
            account.user = user;
        }
    }

    /// Issue JWT access tokens expiring `ttl` seconds after issue. `None`
    /// issues opaque `at_<n>` tokens.
    pub async fn set_access_ttl(&self, ttl: Option<i64>) {
        self.state.inner.lock().await.access_ttl = ttl;
    }

    pub async fn fail_logout(&self, fail: bool) {
        self.state.inner.lock().await.fail_logout = fail;
    }

    pub async fn set_login_delay(&self, delay: Option<Duration>) {
        self.state.inner.lock().await.login_delay = delay;
    }

    pub async fn set_profile_delay(&self, delay: Option<Duration>) {
        self.state.inner.lock().await.profile_delay = delay;
    }

    /// Hold refresh requests this long before looking at the token.
    pub async fn set_refresh_delay(&self, delay: Option<Duration>) {
        self.state.inner.lock().await.refresh_delay = delay;
    }

    /// Answer every login with this status and body instead of checking
    /// credentials.
    pub async fn override_login(&self, response: Option<(u16, Value)>) {
        self.state.inner.lock().await.login_override = response
            .map(|(status, body)| (status_code(status), body));
    }

    pub async fn fail_profile(&self, status: Option<u16>) {
        self.state.inner.lock().await.profile_failure = status.map(status_code);
    }

    pub async fn fail_refresh(&self, status: Option<u16>) {
        self.state.inner.lock().await.refresh_failure = status.map(status_code);
    }

    /// Forget every issued access token; profile calls then return 401.
    pub async fn expire_access_tokens(&self) {
        self.state.inner.lock().await.access.clear();
    }

    /// Forget every issued refresh token; refresh calls then return 401.
    pub async fn revoke_refresh_tokens(&self) {
        self.state.inner.lock().await.refresh.clear();
    }

    pub async fn is_access_token_valid(&self, token: &str) -> bool {
        self.state.inner.lock().await.access.contains_key(token)
    }

    pub fn login_calls(&self) -> usize {
        self.state.login_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.state.logout_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.state.profile_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }
}

impl Drop for MockIdentityService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A base URL nothing listens on, for transport failure tests.
pub async fn unreachable_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind throwaway listener");
    let addr = listener.local_addr().expect("throwaway listener address");
    drop(listener);
    format!("http://{addr}")
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_owned)
}

fn failure(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "message": message }))).into_response()
}

async fn login(State(state): State<Arc<MockState>>, body: String) -> Response {
    state.login_calls.fetch_add(1, Ordering::SeqCst);

    let delay = state.inner.lock().await.login_delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let mut inner = state.inner.lock().await;
    if let Some((status, body)) = &inner.login_override {
        return (*status, Json(body.clone())).into_response();
    }

    let submitted: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let username = submitted["username"].as_str().unwrap_or_default().to_owned();
    let password = submitted["password"].as_str().unwrap_or_default();

    let (role, user, portal_token) = match inner.accounts.get(&username) {
        Some(account) if account.password == password => (
            account.role.clone(),
            account.user.clone(),
            account.portal_token.clone(),
        ),
        _ => return failure(StatusCode::UNAUTHORIZED, "Login failed"),
    };

    let (access, refresh) = inner.issue(&username);
    let mut data = json!({
        "access_token": access,
        "refresh_token": refresh,
        "user": user,
        "role": role,
    });
    if let Some(portal_token) = portal_token {
        data["portal_token"] = Value::String(portal_token);
    }
    (StatusCode::OK, Json(json!({ "success": true, "data": data }))).into_response()
}

async fn logout(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);

    let mut inner = state.inner.lock().await;
    if inner.fail_logout {
        return failure(StatusCode::INTERNAL_SERVER_ERROR, "logout unavailable");
    }
    match bearer(&headers) {
        Some(token) if inner.access.remove(&token).is_some() => {
            (StatusCode::OK, Json(json!({ "success": true }))).into_response()
        }
        _ => failure(StatusCode::UNAUTHORIZED, "Unauthorized"),
    }
}

async fn profile(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.profile_calls.fetch_add(1, Ordering::SeqCst);

    let delay = state.inner.lock().await.profile_delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let inner = state.inner.lock().await;
    if let Some(status) = inner.profile_failure {
        return failure(status, "profile unavailable");
    }
    let user = bearer(&headers)
        .and_then(|token| inner.access.get(&token).cloned())
        .and_then(|username| inner.accounts.get(&username).map(|a| a.user.clone()));
    match user {
        Some(user) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": { "user": user } })),
        )
            .into_response(),
        None => failure(StatusCode::UNAUTHORIZED, "Unauthorized"),
    }
}

async fn refresh(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);

    let delay = state.inner.lock().await.refresh_delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let mut inner = state.inner.lock().await;
    if let Some(status) = inner.refresh_failure {
        return failure(status, "refresh unavailable");
    }
    let username = bearer(&headers).and_then(|token| inner.refresh.remove(&token));
    match username {
        Some(username) => {
            let (access, refresh) = inner.issue(&username);
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "data": { "access_token": access, "refresh_token": refresh },
                })),
            )
                .into_response()
        }
        None => failure(StatusCode::UNAUTHORIZED, "Invalid refresh token"),
    }
}
