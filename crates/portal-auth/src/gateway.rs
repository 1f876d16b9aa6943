//! Identity service gateway
//!
//! The only component that talks to the remote identity service. Every call
//! comes back as a typed `Result`; transport errors, bad statuses and odd
//! payloads are all mapped onto [`Error`] here so nothing above this layer
//! has to look at HTTP.
//!
//! Responses share one envelope: `{success, data, message}`. A 2xx without
//! `success: true` is still a failure.

use std::time::Duration;

use common::{IdentityConfig, Secret};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::claims;
use crate::endpoints::{DEFAULT_LOGIN_FAILURE, Endpoints};
use crate::error::{Error, Result};
use crate::store::{StorageKey, TokenStore, WriteOutcome};
use crate::types::{Role, Session, TokenPair, User};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

impl Envelope {
    fn message(&self) -> Option<String> {
        self.message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_owned)
    }

    fn data<T: serde::de::DeserializeOwned>(self, what: &str) -> Result<T> {
        serde_json::from_value(self.data.unwrap_or(Value::Null))
            .map_err(|e| Error::MalformedResponse(format!("invalid {what} data: {e}")))
    }
}

#[derive(Deserialize)]
struct LoginData {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    portal_token: Option<String>,
}

impl LoginData {
    fn into_session(self) -> Result<Session> {
        if !claims::is_well_formed(&self.access_token) {
            return Err(Error::MalformedResponse(
                "login returned an unusable access token".into(),
            ));
        }
        let user = self
            .user
            .ok_or_else(|| Error::MalformedResponse("login response has no user".into()))?;
        let role = self
            .role
            .ok_or_else(|| Error::MalformedResponse("login response has no role".into()))?;
        let role: Role = role
            .parse()
            .map_err(|_| Error::MalformedResponse(format!("login returned unknown role {role:?}")))?;

        Ok(Session {
            access_token: Secret::new(self.access_token),
            refresh_token: optional_token(self.refresh_token),
            portal_token: optional_token(self.portal_token),
            user,
            role,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProfileData {
    Wrapped { user: User },
    Bare(User),
}

#[derive(Deserialize)]
struct RefreshData {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn optional_token(token: Option<String>) -> Option<Secret<String>> {
    token
        .filter(|t| claims::is_well_formed(t))
        .map(Secret::new)
}

/// Read the body and parse the envelope if there is one. Error statuses
/// often carry no JSON, so a parse failure is not an error at this point.
async fn read_envelope(
    response: reqwest::Response,
    what: &str,
) -> Result<(StatusCode, Option<Envelope>)> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Network(format!("reading {what} response: {e}")))?;
    let envelope = serde_json::from_str::<Envelope>(&body).ok();
    Ok((status, envelope))
}

/// Client for the identity service, bound to one tab's token store.
#[derive(Debug, Clone)]
pub struct AuthGateway {
    client: reqwest::Client,
    endpoints: Endpoints,
    store: TokenStore,
}

impl AuthGateway {
    pub fn new(client: reqwest::Client, base_url: &str, store: TokenStore) -> Result<Self> {
        Ok(Self {
            client,
            endpoints: Endpoints::new(base_url)?,
            store,
        })
    }

    /// Build the HTTP client from the `[identity]` section.
    pub fn from_config(config: &IdentityConfig, store: TokenStore) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("building http client: {e}")))?;
        Self::new(client, &config.base_url, store)
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn stored(&self, key: StorageKey) -> Option<Secret<String>> {
        self.store
            .get(key)
            .await
            .filter(|t| claims::is_well_formed(t))
            .map(Secret::new)
    }

    /// Submit credentials. On success the whole session is written to the
    /// token store before returning. Never retries.
    ///
    /// If this future is dropped after the response arrived, the session may
    /// already be in storage (and announced to other tabs) without the caller
    /// having seen it; the next hydration picks it up.
    ///
    /// Any 4xx, or a 2xx without the success marker, is
    /// `InvalidCredentials` carrying the server's message (or
    /// "Login failed"). The store is untouched on every failure.
    pub async fn login<C>(&self, credentials: &C) -> Result<Session>
    where
        C: Serialize + ?Sized,
    {
        let response = self
            .client
            .post(self.endpoints.login.clone())
            .json(credentials)
            .send()
            .await
            .map_err(|e| Error::Network(format!("login request failed: {e}")))?;

        let (status, envelope) = read_envelope(response, "login").await?;
        let message = envelope
            .as_ref()
            .and_then(Envelope::message)
            .unwrap_or_else(|| DEFAULT_LOGIN_FAILURE.to_owned());

        if status.is_client_error() {
            info!(%status, "login rejected by identity service");
            return Err(Error::InvalidCredentials(message));
        }
        if !status.is_success() {
            warn!(%status, "login failed on the identity service");
            return Err(Error::Rejected(format!("login returned {status}")));
        }

        let envelope = envelope
            .ok_or_else(|| Error::MalformedResponse("login response is not JSON".into()))?;
        if !envelope.success {
            info!("login response lacks success marker");
            return Err(Error::InvalidCredentials(message));
        }

        let session = envelope.data::<LoginData>("login")?.into_session()?;

        if let Err(e) = self.store.write_session(&session).await {
            warn!(error = %e, "failed to persist session, continuing with in-memory copy");
        }
        info!(user_id = %session.user.id, role = %session.role, "login succeeded");
        Ok(session)
    }

    /// Clear every owned key, then tell the identity service.
    ///
    /// Storage is cleared first so the local sign-out happens even if this
    /// future is dropped mid-request. The remote call is best effort and is
    /// skipped when nothing was stored.
    pub async fn logout(&self) {
        let token = self.stored(StorageKey::AccessToken).await;

        if let Err(e) = self.store.clear_all().await {
            warn!(error = %e, "failed to persist cleared session");
        }

        let Some(token) = token else {
            debug!("no stored access token, skipping remote logout");
            return;
        };

        match self
            .client
            .post(self.endpoints.logout.clone())
            .bearer_auth(token.expose_str())
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                info!("remote logout succeeded");
            }
            Ok(response) => {
                warn!(status = %response.status(), "remote logout failed, local session already cleared");
            }
            Err(e) => {
                warn!(error = %e, "remote logout request failed, local session already cleared");
            }
        }
    }

    /// Fetch the current user with the stored access token.
    ///
    /// A 401 is `ExpiredToken`; the caller decides whether that matters.
    pub async fn fetch_profile(&self) -> Result<User> {
        let token = self
            .stored(StorageKey::AccessToken)
            .await
            .ok_or_else(|| Error::NotAuthenticated("no stored access token".into()))?;

        let response = self
            .client
            .get(self.endpoints.profile.clone())
            .bearer_auth(token.expose_str())
            .send()
            .await
            .map_err(|e| Error::Network(format!("profile request failed: {e}")))?;

        let (status, envelope) = read_envelope(response, "profile").await?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::ExpiredToken(format!("profile returned {status}")));
        }
        if !status.is_success() {
            return Err(Error::Rejected(format!("profile returned {status}")));
        }

        let envelope = envelope
            .ok_or_else(|| Error::MalformedResponse("profile response is not JSON".into()))?;
        if !envelope.success {
            let message = envelope
                .message()
                .unwrap_or_else(|| "profile request unsuccessful".into());
            return Err(Error::Rejected(message));
        }

        let user = match envelope.data::<ProfileData>("profile")? {
            ProfileData::Wrapped { user } | ProfileData::Bare(user) => user,
        };
        debug!(user_id = %user.id, "fetched profile");
        Ok(user)
    }

    /// `fetch_profile` with failures logged and flattened to `None`.
    pub async fn refresh_profile(&self) -> Option<User> {
        match self.fetch_profile().await {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "profile refresh failed");
                None
            }
        }
    }

    /// Exchange the stored refresh token for a new pair and store it.
    ///
    /// Stored tokens are only replaced on success, and only if the stored
    /// session is still the one the request started from. A 401/403 means
    /// the refresh token itself was rejected and maps to
    /// `InvalidCredentials`, unless another tab rotated it in the meantime.
    /// Both races come back as `Superseded`.
    pub async fn exchange_refresh_token(&self) -> Result<TokenPair> {
        let snapshot = self.store.snapshot().await;
        let sent_access = snapshot
            .access_token
            .filter(|t| claims::is_well_formed(t))
            .ok_or_else(|| Error::NotAuthenticated("no stored access token".into()))?;
        let refresh = snapshot
            .refresh_token
            .filter(|t| claims::is_well_formed(t))
            .map(Secret::new)
            .ok_or_else(|| Error::NotAuthenticated("no stored refresh token".into()))?;

        let response = self
            .client
            .post(self.endpoints.refresh.clone())
            .bearer_auth(refresh.expose_str())
            .send()
            .await
            .map_err(|e| Error::Network(format!("token refresh request failed: {e}")))?;

        let (status, envelope) = read_envelope(response, "token refresh").await?;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let stored = self.store.get(StorageKey::RefreshToken).await;
            if stored.as_deref() != Some(refresh.expose_str()) {
                info!(%status, "refresh token rotated elsewhere while in flight");
                return Err(Error::Superseded(format!(
                    "refresh token replaced before rejection ({status})"
                )));
            }
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status})"
            )));
        }
        if !status.is_success() {
            return Err(Error::Rejected(format!("token refresh returned {status}")));
        }

        let envelope = envelope.ok_or_else(|| {
            Error::MalformedResponse("token refresh response is not JSON".into())
        })?;
        if !envelope.success {
            let message = envelope
                .message()
                .unwrap_or_else(|| "token refresh unsuccessful".into());
            return Err(Error::Rejected(message));
        }

        let data = envelope.data::<RefreshData>("token refresh")?;
        if !claims::is_well_formed(&data.access_token) {
            return Err(Error::MalformedResponse(
                "token refresh returned an unusable access token".into(),
            ));
        }
        let pair = TokenPair {
            access_token: Secret::new(data.access_token),
            refresh_token: optional_token(data.refresh_token),
        };

        let written = self
            .store
            .write_tokens(
                &sent_access,
                pair.access_token.expose_str(),
                pair.refresh_token.as_ref().map(Secret::expose_str),
            )
            .await;
        match written {
            Ok(WriteOutcome::Applied) => {}
            Ok(WriteOutcome::Superseded) => {
                info!("session changed while refreshing, discarding new tokens");
                return Err(Error::Superseded(
                    "stored session replaced during token refresh".into(),
                ));
            }
            Err(e) => {
                warn!(error = %e, "failed to persist refreshed tokens, continuing with in-memory copy");
            }
        }
        info!(rotated = pair.refresh_token.is_some(), "access token refreshed");
        Ok(pair)
    }

    /// `exchange_refresh_token` reduced to success or failure.
    pub async fn refresh_token(&self) -> bool {
        match self.exchange_refresh_token().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ProfileStorage;
    use crate::testing::{self, DEFAULT_PASSWORD, DEFAULT_USERNAME, MockIdentityService};
    use crate::types::{Credentials, UserId};
    use serde_json::json;

    fn tab() -> TokenStore {
        ProfileStorage::in_memory().open_tab("portal")
    }

    async fn logged_in(mock: &MockIdentityService) -> (AuthGateway, Session) {
        let gateway = mock.gateway(tab());
        let session = gateway
            .login(&Credentials::new(DEFAULT_USERNAME, DEFAULT_PASSWORD))
            .await
            .unwrap();
        (gateway, session)
    }

    #[tokio::test]
    async fn login_returns_session_and_writes_store() {
        let mock = MockIdentityService::start().await;
        let (gateway, session) = logged_in(&mock).await;

        assert_eq!(session.role, Role::Student);
        assert_eq!(session.user.id, UserId::Number(1));
        assert_eq!(session.user.first_name.as_deref(), Some("Ada"));

        let snapshot = gateway.store().snapshot().await;
        assert_eq!(
            snapshot.access_token.as_deref(),
            Some(session.access_token.expose_str())
        );
        assert_eq!(snapshot.role.as_deref(), Some("student"));
        let stored_user: User = serde_json::from_str(snapshot.user.as_deref().unwrap()).unwrap();
        assert_eq!(stored_user, session.user);
        assert_eq!(mock.login_calls(), 1);
    }

    #[tokio::test]
    async fn login_accepts_any_serializable_body() {
        let mock = MockIdentityService::start().await;
        let gateway = mock.gateway(tab());
        let body = json!({ "username": DEFAULT_USERNAME, "password": DEFAULT_PASSWORD });
        assert!(gateway.login(&body).await.is_ok());
    }

    #[tokio::test]
    async fn login_stores_portal_token_when_issued() {
        let mock = MockIdentityService::start().await;
        mock.set_portal_token(DEFAULT_USERNAME, Some("pt_ada")).await;
        let (gateway, session) = logged_in(&mock).await;

        assert_eq!(
            session.portal_token.as_ref().map(Secret::expose_str),
            Some("pt_ada")
        );
        assert_eq!(
            gateway.store().get(StorageKey::PortalToken).await.as_deref(),
            Some("pt_ada")
        );
    }

    #[tokio::test]
    async fn bad_credentials_fail_with_server_message_and_leave_store_alone() {
        let mock = MockIdentityService::start().await;
        let gateway = mock.gateway(tab());
        gateway.store().set(StorageKey::PortalToken, "pt_keep").await.unwrap();
        let before = gateway.store().snapshot().await;

        let err = gateway
            .login(&json!({ "user": "x", "pass": "bad" }))
            .await
            .unwrap_err();

        match err {
            Error::InvalidCredentials(msg) => assert_eq!(msg, "Login failed"),
            other => panic!("expected InvalidCredentials, got {other:?}"),
        }
        assert_eq!(gateway.store().snapshot().await, before);
    }

    #[tokio::test]
    async fn client_error_without_message_uses_default() {
        let mock = MockIdentityService::start().await;
        mock.override_login(Some((400, json!({})))).await;
        let gateway = mock.gateway(tab());

        let err = gateway
            .login(&Credentials::new("x", "bad"))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), DEFAULT_LOGIN_FAILURE);
    }

    #[tokio::test]
    async fn ok_status_without_success_marker_is_a_failure() {
        let mock = MockIdentityService::start().await;
        mock.override_login(Some((
            200,
            json!({ "success": false, "message": "Account locked" }),
        )))
        .await;
        let gateway = mock.gateway(tab());

        let err = gateway
            .login(&Credentials::new(DEFAULT_USERNAME, DEFAULT_PASSWORD))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(ref m) if m == "Account locked"));
        assert!(gateway.store().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn server_error_is_rejected_not_invalid_credentials() {
        let mock = MockIdentityService::start().await;
        mock.override_login(Some((503, json!({ "message": "maintenance" }))))
            .await;
        let gateway = mock.gateway(tab());

        let err = gateway
            .login(&Credentials::new(DEFAULT_USERNAME, DEFAULT_PASSWORD))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn login_without_role_is_malformed_and_not_stored() {
        let mock = MockIdentityService::start().await;
        mock.override_login(Some((
            200,
            json!({
                "success": true,
                "data": { "access_token": "at_x", "user": { "id": 9 } },
            }),
        )))
        .await;
        let gateway = mock.gateway(tab());

        let err = gateway
            .login(&Credentials::new(DEFAULT_USERNAME, DEFAULT_PASSWORD))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)), "got {err:?}");
        assert!(gateway.store().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn login_with_unknown_role_is_malformed() {
        let mock = MockIdentityService::start().await;
        mock.add_account("root", "pw", "superuser", json!({ "id": 2 }))
            .await;
        let gateway = mock.gateway(tab());

        let err = gateway
            .login(&Credentials::new("root", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn unreachable_service_is_network_error() {
        let base = testing::unreachable_base_url().await;
        let gateway = AuthGateway::new(reqwest::Client::new(), &base, tab()).unwrap();

        let err = gateway
            .login(&Credentials::new(DEFAULT_USERNAME, DEFAULT_PASSWORD))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn from_config_applies_base_url() {
        let config = IdentityConfig {
            base_url: "https://portal.example.edu/careers".into(),
            timeout_secs: 5,
        };
        let gateway = AuthGateway::from_config(&config, tab()).unwrap();
        assert_eq!(
            gateway.endpoints().login.as_str(),
            "https://portal.example.edu/careers/api/auth/login"
        );
    }

    #[tokio::test]
    async fn logout_clears_store_and_revokes_remotely() {
        let mock = MockIdentityService::start().await;
        let (gateway, session) = logged_in(&mock).await;
        let token = session.access_token.expose_str().to_owned();
        assert!(mock.is_access_token_valid(&token).await);

        gateway.logout().await;

        assert!(gateway.store().snapshot().await.is_empty());
        assert!(!mock.is_access_token_valid(&token).await);
        assert_eq!(mock.logout_calls(), 1);
    }

    #[tokio::test]
    async fn logout_clears_store_even_when_remote_fails() {
        let mock = MockIdentityService::start().await;
        let (gateway, _) = logged_in(&mock).await;
        mock.fail_logout(true).await;

        gateway.logout().await;

        assert!(gateway.store().snapshot().await.is_empty());
        assert_eq!(mock.logout_calls(), 1);
    }

    #[tokio::test]
    async fn logout_without_session_skips_remote_call() {
        let mock = MockIdentityService::start().await;
        let gateway = mock.gateway(tab());

        gateway.logout().await;
        gateway.logout().await;

        assert_eq!(mock.logout_calls(), 0);
        assert!(gateway.store().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn logout_keeps_foreign_keys() {
        let mock = MockIdentityService::start().await;
        let (gateway, _) = logged_in(&mock).await;
        let storage = gateway.store().storage().clone();
        storage
            .set_raw(gateway.store().tab_id(), "theme", "dark")
            .await
            .unwrap();

        gateway.logout().await;

        assert_eq!(storage.get_raw("theme").await.as_deref(), Some("dark"));
    }

    #[tokio::test]
    async fn fetch_profile_returns_current_user() {
        let mock = MockIdentityService::start().await;
        let (gateway, _) = logged_in(&mock).await;
        mock.update_user(
            DEFAULT_USERNAME,
            json!({ "id": 1, "first_name": "Augusta", "last_name": "King" }),
        )
        .await;

        let user = gateway.fetch_profile().await.unwrap();
        assert_eq!(user.display_name(), "Augusta King");
        assert_eq!(gateway.refresh_profile().await, Some(user));
        assert_eq!(mock.profile_calls(), 2);
    }

    #[tokio::test]
    async fn expired_access_token_maps_to_expired_token() {
        let mock = MockIdentityService::start().await;
        let (gateway, _) = logged_in(&mock).await;
        mock.expire_access_tokens().await;

        let err = gateway.fetch_profile().await.unwrap_err();
        assert!(matches!(err, Error::ExpiredToken(_)), "got {err:?}");
        assert_eq!(gateway.refresh_profile().await, None);
        // Expiry is reported, not acted on.
        assert!(!gateway.store().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn profile_server_error_is_rejected() {
        let mock = MockIdentityService::start().await;
        let (gateway, _) = logged_in(&mock).await;
        mock.fail_profile(Some(502)).await;

        let err = gateway.fetch_profile().await.unwrap_err();
        assert!(matches!(err, Error::Rejected(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn fetch_profile_without_token_is_not_authenticated() {
        let mock = MockIdentityService::start().await;
        let gateway = mock.gateway(tab());

        let err = gateway.fetch_profile().await.unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated(_)), "got {err:?}");
        assert_eq!(mock.profile_calls(), 0);
    }

    #[tokio::test]
    async fn refresh_rotates_and_stores_pair() {
        let mock = MockIdentityService::start().await;
        let (gateway, session) = logged_in(&mock).await;
        let old_refresh = session.refresh_token.as_ref().unwrap().expose_str().to_owned();

        let pair = gateway.exchange_refresh_token().await.unwrap();

        assert_ne!(pair.access_token, session.access_token);
        let snapshot = gateway.store().snapshot().await;
        assert_eq!(
            snapshot.access_token.as_deref(),
            Some(pair.access_token.expose_str())
        );
        assert_ne!(snapshot.refresh_token.as_deref(), Some(old_refresh.as_str()));
        // user and role untouched
        assert_eq!(snapshot.role.as_deref(), Some("student"));
        assert!(snapshot.user.is_some());
    }

    #[tokio::test]
    async fn rejected_refresh_keeps_existing_tokens() {
        let mock = MockIdentityService::start().await;
        let (gateway, _) = logged_in(&mock).await;
        mock.revoke_refresh_tokens().await;
        let before = gateway.store().snapshot().await;

        let err = gateway.exchange_refresh_token().await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)), "got {err:?}");
        assert!(!gateway.refresh_token().await);
        assert_eq!(gateway.store().snapshot().await, before);
    }

    #[tokio::test]
    async fn refresh_server_error_is_rejected_and_keeps_tokens() {
        let mock = MockIdentityService::start().await;
        let (gateway, _) = logged_in(&mock).await;
        mock.fail_refresh(Some(500)).await;
        let before = gateway.store().snapshot().await;

        let err = gateway.exchange_refresh_token().await.unwrap_err();
        assert!(matches!(err, Error::Rejected(_)), "got {err:?}");
        assert_eq!(gateway.store().snapshot().await, before);
    }

    #[tokio::test]
    async fn rejection_after_rotation_elsewhere_is_superseded() {
        let mock = MockIdentityService::start().await;
        let (gateway, _) = logged_in(&mock).await;
        let other = mock.gateway(gateway.store().storage().open_tab("portal"));
        mock.set_refresh_delay(Some(Duration::from_millis(200))).await;

        let stale = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.exchange_refresh_token().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        mock.set_refresh_delay(None).await;
        let fresh = other.exchange_refresh_token().await.unwrap();

        let err = stale.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Superseded(_)), "got {err:?}");
        assert_eq!(
            gateway.store().get(StorageKey::AccessToken).await.as_deref(),
            Some(fresh.access_token.expose_str())
        );
    }

    #[tokio::test]
    async fn refreshed_pair_is_dropped_when_session_was_cleared() {
        let mock = MockIdentityService::start().await;
        let (gateway, _) = logged_in(&mock).await;
        let other = gateway.store().storage().open_tab("portal");
        mock.set_refresh_delay(Some(Duration::from_millis(100))).await;

        let refreshing = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.exchange_refresh_token().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        other.clear_all().await.unwrap();

        let err = refreshing.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Superseded(_)), "got {err:?}");
        assert!(gateway.store().snapshot().await.is_empty());
        assert_eq!(mock.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_is_not_authenticated() {
        let mock = MockIdentityService::start().await;
        let gateway = mock.gateway(tab());

        assert!(!gateway.refresh_token().await);
        assert_eq!(mock.refresh_calls(), 0);
    }
}
