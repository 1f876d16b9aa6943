//! Session manager: the per-tab session state machine
//!
//! Owns the canonical `SessionState` and publishes it over a `watch`
//! channel. Storage is the source of truth shared between tabs; the manager
//! reads it on hydration and writes it only through the gateway.
//!
//! Session-mutating operations take one operation lock so a logout cannot
//! interleave with a hydration or a token refresh. Every state replacement
//! bumps an epoch; slow results (profile refresh) are dropped if the epoch
//! moved while they were in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use common::{PortalConfig, SessionSettings};
use portal_auth::claims;
use portal_auth::{
    AuthGateway, Error, ProfileStorage, Role, Session, TokenStore, User, WriteOutcome,
};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::hydrate::{Hydration, classify};
use crate::metrics;
use crate::state::SessionState;

/// Tunables for the manager, usually taken from `[session]`.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Refresh the access token when its expiry is this close.
    pub refresh_leeway: Duration,
    pub refresh_profile_on_hydrate: bool,
    /// End the session when the identity service rejects the refresh token.
    pub logout_on_rejected_refresh: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&SessionSettings::default())
    }
}

impl From<&SessionSettings> for SessionOptions {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            refresh_leeway: Duration::from_secs(settings.refresh_leeway_secs),
            refresh_profile_on_hydrate: settings.refresh_profile_on_hydrate,
            logout_on_rejected_refresh: settings.logout_on_rejected_refresh,
        }
    }
}

/// Clears the in-flight login flag however the login future ends.
struct LoginFlight<'a>(&'a AtomicBool);

impl Drop for LoginFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SessionManager {
    gateway: AuthGateway,
    options: SessionOptions,
    state_tx: watch::Sender<SessionState>,
    op_lock: Mutex<()>,
    login_in_flight: AtomicBool,
    epoch: AtomicU64,
}

impl SessionManager {
    /// Create a manager in `Initializing`. Nothing is read until `hydrate`.
    pub fn new(gateway: AuthGateway, options: SessionOptions) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Initializing);
        Self {
            gateway,
            options,
            state_tx,
            op_lock: Mutex::new(()),
            login_in_flight: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }
    }

    /// Open a new tab on `storage` configured from a loaded `PortalConfig`.
    pub fn open(config: &PortalConfig, storage: &Arc<ProfileStorage>) -> Result<Self> {
        let store = storage.open_tab(&config.storage.namespace);
        let gateway = AuthGateway::from_config(&config.identity, store)?;
        Ok(Self::new(gateway, SessionOptions::from(&config.session)))
    }

    pub fn gateway(&self) -> &AuthGateway {
        &self.gateway
    }

    pub fn store(&self) -> &TokenStore {
        self.gateway.store()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state_tx.borrow().is_authenticated()
    }

    pub fn role(&self) -> Option<Role> {
        self.state_tx.borrow().role()
    }

    pub fn user(&self) -> Option<User> {
        self.state_tx.borrow().user().cloned()
    }

    /// Replace the state. Identical states are not re-announced and do not
    /// move the epoch.
    fn publish(&self, next: SessionState) {
        let label = next.label();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            self.epoch.fetch_add(1, Ordering::SeqCst);
            true
        });
        if changed {
            debug!(state = label, "session state changed");
        }
    }

    /// Build state from storage, then top it up from the identity service.
    ///
    /// Corrupted storage is cleared before settling on `Unauthenticated`.
    /// When a session was found, an expiring access token is refreshed and,
    /// if enabled, the profile is re-fetched and swapped in place.
    pub async fn hydrate(&self) -> SessionState {
        let state = {
            let _op = self.op_lock.lock().await;
            self.hydrate_locked().await
        };

        if state.is_authenticated() {
            self.ensure_fresh_token().await;
            if self.options.refresh_profile_on_hydrate {
                self.refresh_profile().await;
            }
        }
        self.state()
    }

    /// Re-read storage without calling the identity service. Used when
    /// another tab changed the owned keys.
    pub async fn rehydrate(&self) -> SessionState {
        let _op = self.op_lock.lock().await;
        self.hydrate_locked().await
    }

    async fn hydrate_locked(&self) -> SessionState {
        let snapshot = self.store().snapshot().await;
        let next = match classify(&snapshot) {
            Hydration::Empty => {
                metrics::record_hydration("empty");
                SessionState::Unauthenticated
            }
            Hydration::Session(session) => {
                metrics::record_hydration("session");
                SessionState::Authenticated(session)
            }
            Hydration::Corrupt(reason) => {
                warn!(%reason, "stored session is corrupted, clearing");
                if let Err(e) = self.store().clear_all().await {
                    warn!(error = %e, "failed to persist cleared session");
                }
                metrics::record_hydration("corrupt");
                SessionState::Unauthenticated
            }
        };
        info!(state = next.label(), "session hydrated");
        self.publish(next.clone());
        next
    }

    /// Submit credentials.
    ///
    /// A second call while one is in flight fails with `Busy`. On failure the
    /// state and storage are left exactly as they were.
    pub async fn login<C>(&self, credentials: &C) -> Result<Session>
    where
        C: Serialize + ?Sized,
    {
        if self.login_in_flight.swap(true, Ordering::SeqCst) {
            metrics::record_login("busy");
            return Err(SessionError::Busy);
        }
        let _flight = LoginFlight(&self.login_in_flight);
        let _op = self.op_lock.lock().await;

        match self.gateway.login(credentials).await {
            Ok(session) => {
                self.publish(SessionState::Authenticated(session.clone()));
                metrics::record_login("success");
                Ok(session)
            }
            Err(e) => {
                metrics::record_login(metrics::error_outcome(&e));
                Err(e.into())
            }
        }
    }

    /// Sign out. Always ends `Unauthenticated`; calling it again is harmless.
    pub async fn logout(&self) {
        let _op = self.op_lock.lock().await;
        self.publish(SessionState::Unauthenticated);
        self.gateway.logout().await;
        metrics::record_logout();
        info!("signed out");
    }

    /// Re-fetch the profile and replace `user` in place.
    ///
    /// The result is applied only if nothing replaced the session while the
    /// request was in flight and the access token is still the one in use.
    pub async fn refresh_profile(&self) -> Option<User> {
        let (epoch, token) = {
            let state = self.state_tx.borrow();
            match &*state {
                SessionState::Authenticated(session) => (
                    self.epoch.load(Ordering::SeqCst),
                    session.access_token.clone(),
                ),
                _ => return None,
            }
        };

        let user = self.gateway.refresh_profile().await?;

        let _op = self.op_lock.lock().await;
        let current = self.epoch.load(Ordering::SeqCst) == epoch
            && self
                .state_tx
                .borrow()
                .session()
                .is_some_and(|session| session.access_token == token);
        if !current {
            debug!("session changed during profile refresh, discarding result");
            return None;
        }
        if self.state_tx.borrow().user() == Some(&user) {
            return Some(user);
        }

        match self.store().write_user(token.expose_str(), &user).await {
            Ok(WriteOutcome::Applied) => {}
            Ok(WriteOutcome::Superseded) => {
                debug!("stored session changed during profile refresh, re-reading storage");
                self.hydrate_locked().await;
                return None;
            }
            Err(e) => warn!(error = %e, "failed to persist refreshed profile"),
        }
        self.state_tx.send_modify(|state| {
            if let SessionState::Authenticated(session) = state {
                session.user = user.clone();
            }
        });
        self.epoch.fetch_add(1, Ordering::SeqCst);
        info!(user_id = %user.id, "profile refreshed");
        Some(user)
    }

    /// Exchange the refresh token for a new pair. `false` on any failure.
    ///
    /// Transport and server failures keep the session. A rejected refresh
    /// token ends it when `logout_on_rejected_refresh` is set, unless
    /// storage already holds a newer session from another tab. When another
    /// tab got there first, storage is re-read and the result says whether
    /// a session survived.
    pub async fn refresh_token(&self) -> bool {
        let _op = self.op_lock.lock().await;
        self.refresh_token_locked().await
    }

    async fn refresh_token_locked(&self) -> bool {
        let Some(current_access) = self
            .state_tx
            .borrow()
            .session()
            .map(|session| session.access_token.clone())
        else {
            return false;
        };

        match self.gateway.exchange_refresh_token().await {
            Ok(pair) => {
                self.state_tx.send_if_modified(|state| {
                    let SessionState::Authenticated(session) = state else {
                        return false;
                    };
                    session.access_token = pair.access_token;
                    if let Some(refresh) = pair.refresh_token {
                        session.refresh_token = Some(refresh);
                    }
                    self.epoch.fetch_add(1, Ordering::SeqCst);
                    true
                });
                metrics::record_token_refresh("success");
                true
            }
            Err(Error::Superseded(reason)) => {
                info!(%reason, "another tab changed the session during refresh, re-reading storage");
                metrics::record_token_refresh("superseded");
                self.hydrate_locked().await.is_authenticated()
            }
            Err(Error::InvalidCredentials(reason)) if self.options.logout_on_rejected_refresh => {
                metrics::record_token_refresh("rejected");
                match self.store().clear_if_current(current_access.expose_str()).await {
                    Ok(WriteOutcome::Superseded) => {
                        info!(%reason, "refresh token rejected but storage holds a newer session");
                        return self.hydrate_locked().await.is_authenticated();
                    }
                    Ok(WriteOutcome::Applied) => {}
                    Err(e) => warn!(error = %e, "failed to persist cleared session"),
                }
                warn!(%reason, "refresh token rejected, ending session");
                self.publish(SessionState::Unauthenticated);
                false
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, keeping session");
                metrics::record_token_refresh(metrics::error_outcome(&e));
                false
            }
        }
    }

    /// Refresh the access token if its `exp` claim falls inside the leeway.
    ///
    /// Returns whether the session holds a token worth using afterwards.
    /// Opaque tokens have no known expiry and are assumed fresh.
    pub async fn ensure_fresh_token(&self) -> bool {
        let _op = self.op_lock.lock().await;
        let expiring = {
            let state = self.state_tx.borrow();
            match &*state {
                SessionState::Authenticated(session) => claims::is_expired(
                    session.access_token.expose_str(),
                    claims::now_secs(),
                    self.options.refresh_leeway.as_secs(),
                ),
                _ => return false,
            }
        };
        if !expiring {
            return true;
        }
        debug!("access token inside refresh leeway, refreshing");
        self.refresh_token_locked().await
    }
}
