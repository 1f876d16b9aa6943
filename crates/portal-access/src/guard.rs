//! Route guard
//!
//! The one integration point the UI wraps protected views in. It reads the
//! session state from a `watch` receiver, runs `decide`, and turns the
//! decision into something renderable. Whether an insufficient role
//! redirects or renders an inline denial is `GuardConfig::deny_mode`.

use std::fmt;

use common::{DenyMode, GuardConfig};
use portal_auth::Role;
use portal_session::{SessionManager, SessionState};
use tokio::sync::watch;
use tracing::debug;
use url::form_urlencoded;

use crate::policy::{AccessRequirement, Decision, decide};

/// Inline denial shown in place of the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDenied {
    pub actual: Option<Role>,
    pub required: Vec<Role>,
}

impl AccessDenied {
    pub fn message(&self) -> String {
        let actual = match self.actual {
            Some(role) => format!("your role is {role}"),
            None => "you are not signed in".to_owned(),
        };
        let required = match self.required.as_slice() {
            [] => "a role this portal does not grant".to_owned(),
            [only] => only.to_string(),
            [init @ .., last] => {
                let init: Vec<String> = init.iter().map(Role::to_string).collect();
                format!("{} or {last}", init.join(", "))
            }
        };
        format!("Access denied: {actual}, but this page requires {required}.")
    }
}

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// What the UI should do for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Pending,
    Render,
    Redirect(String),
    Denied(AccessDenied),
}

/// A guarded view: the view itself only when access was allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<V> {
    Pending,
    Redirect(String),
    Denied(AccessDenied),
    View(V),
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    state: watch::Receiver<SessionState>,
    config: GuardConfig,
}

impl RouteGuard {
    pub fn new(manager: &SessionManager, config: GuardConfig) -> Self {
        Self::from_receiver(manager.subscribe(), config)
    }

    pub fn from_receiver(state: watch::Receiver<SessionState>, config: GuardConfig) -> Self {
        Self { state, config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Current session state as this guard sees it.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn decide(&self, requirement: &AccessRequirement, location: &str) -> Decision {
        decide(&self.state.borrow(), requirement, location)
    }

    pub fn evaluate(&self, requirement: &AccessRequirement, location: &str) -> GuardOutcome {
        self.outcome(self.decide(requirement, location), location)
    }

    /// Run `view` only if the page may render.
    pub fn render<V, F>(&self, requirement: &AccessRequirement, location: &str, view: F) -> Guarded<V>
    where
        F: FnOnce(&SessionState) -> V,
    {
        let state = self.state();
        match self.outcome(decide(&state, requirement, location), location) {
            GuardOutcome::Pending => Guarded::Pending,
            GuardOutcome::Redirect(to) => Guarded::Redirect(to),
            GuardOutcome::Denied(denied) => Guarded::Denied(denied),
            GuardOutcome::Render => Guarded::View(view(&state)),
        }
    }

    /// Wait until hydration has finished, then evaluate.
    pub async fn settled(&self, requirement: &AccessRequirement, location: &str) -> GuardOutcome {
        let mut state = self.state.clone();
        if state.wait_for(SessionState::is_settled).await.is_err() {
            debug!("session manager dropped before settling");
        }
        self.evaluate(requirement, location)
    }

    /// Wait for the next session transition. `false` once the manager is gone.
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }

    fn outcome(&self, decision: Decision, location: &str) -> GuardOutcome {
        match decision {
            Decision::Pending => GuardOutcome::Pending,
            Decision::Allow => GuardOutcome::Render,
            Decision::DenyLogin { return_to } => {
                let to = self.login_redirect(&return_to);
                debug!(location, redirect = %to, "not signed in, redirecting to login");
                GuardOutcome::Redirect(to)
            }
            Decision::DenyUnauthorized { actual, required } => match self.config.deny_mode {
                DenyMode::Redirect => {
                    debug!(location, ?actual, ?required, "role not permitted, redirecting");
                    GuardOutcome::Redirect(self.config.unauthorized_path.clone())
                }
                DenyMode::Inline => GuardOutcome::Denied(AccessDenied { actual, required }),
            },
        }
    }

    /// `<login_path>?<return_param>=<location>`, with the location encoded.
    pub fn login_redirect(&self, location: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair(&self.config.return_param, location)
            .finish();
        let separator = if self.config.login_path.contains('?') { '&' } else { '?' };
        format!("{}{separator}{query}", self.config.login_path)
    }

    /// Where to go after a successful login, read from the login page's
    /// query string. Only same-site paths are accepted; anything else, or a
    /// missing parameter, gives `fallback`.
    pub fn post_login_destination(&self, query: &str, fallback: &str) -> String {
        let query = query.strip_prefix('?').unwrap_or(query);
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key.as_ref() == self.config.return_param)
            .map(|(_, value)| value.into_owned())
            .filter(|dest| is_same_site_path(dest))
            .unwrap_or_else(|| fallback.to_owned())
    }
}

/// `/path` yes; `//host`, `/\host`, `https://..` and relative paths no.
fn is_same_site_path(dest: &str) -> bool {
    dest.starts_with('/')
        && !dest.starts_with("//")
        && !dest.starts_with("/\\")
        && !dest.chars().any(char::is_control)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Secret;
    use portal_auth::{Session, User, UserId};
    use std::time::Duration;

    fn signed_in(role: Role) -> SessionState {
        SessionState::Authenticated(Session {
            access_token: Secret::from("at_1"),
            refresh_token: None,
            portal_token: None,
            user: User::new(UserId::Number(1)),
            role,
        })
    }

    fn guard(state: SessionState, deny_mode: DenyMode) -> (watch::Sender<SessionState>, RouteGuard) {
        let (tx, rx) = watch::channel(state);
        let config = GuardConfig {
            deny_mode,
            ..GuardConfig::default()
        };
        (tx, RouteGuard::from_receiver(rx, config))
    }

    #[test]
    fn pending_while_initializing() {
        let (_tx, guard) = guard(SessionState::Initializing, DenyMode::Redirect);
        assert_eq!(
            guard.evaluate(&AccessRequirement::authenticated(), "/home"),
            GuardOutcome::Pending
        );
    }

    #[test]
    fn unauthenticated_redirects_to_login_with_encoded_location() {
        let (_tx, guard) = guard(SessionState::Unauthenticated, DenyMode::Redirect);
        assert_eq!(
            guard.evaluate(&AccessRequirement::authenticated(), "/events/42?tab=rsvp"),
            GuardOutcome::Redirect("/login?redirect=%2Fevents%2F42%3Ftab%3Drsvp".into())
        );
    }

    #[test]
    fn login_path_with_query_gets_ampersand() {
        let (tx, rx) = watch::channel(SessionState::Unauthenticated);
        let guard = RouteGuard::from_receiver(
            rx,
            GuardConfig {
                login_path: "/auth?mode=signin".into(),
                return_param: "next".into(),
                ..GuardConfig::default()
            },
        );
        assert_eq!(guard.login_redirect("/a"), "/auth?mode=signin&next=%2Fa");
        drop(tx);
    }

    #[test]
    fn wrong_role_redirects_in_redirect_mode() {
        let (_tx, guard) = guard(signed_in(Role::Student), DenyMode::Redirect);
        assert_eq!(
            guard.evaluate(&AccessRequirement::role(Role::Admin), "/admin"),
            GuardOutcome::Redirect("/unauthorized".into())
        );
    }

    #[test]
    fn wrong_role_is_inline_in_inline_mode() {
        let (_tx, guard) = guard(signed_in(Role::Company), DenyMode::Inline);
        let outcome = guard.evaluate(
            &AccessRequirement::any_of([Role::Admin, Role::Staff]),
            "/reports",
        );
        let GuardOutcome::Denied(denied) = outcome else {
            panic!("expected inline denial, got {outcome:?}");
        };
        assert_eq!(denied.actual, Some(Role::Company));
        assert_eq!(
            denied.message(),
            "Access denied: your role is company, but this page requires admin or staff."
        );
    }

    #[test]
    fn denial_message_lists_roles() {
        let denied = AccessDenied {
            actual: None,
            required: vec![Role::Admin, Role::Staff, Role::Company],
        };
        assert_eq!(
            denied.to_string(),
            "Access denied: you are not signed in, but this page requires admin, staff or company."
        );
    }

    #[test]
    fn render_runs_view_only_when_allowed() {
        let (tx, guard) = guard(SessionState::Unauthenticated, DenyMode::Inline);
        let requirement = AccessRequirement::role(Role::Staff);

        let mut calls = 0;
        let blocked = guard.render(&requirement, "/staff", |_| {
            calls += 1;
        });
        assert!(matches!(blocked, Guarded::Redirect(_)));
        assert_eq!(calls, 0);

        tx.send_replace(signed_in(Role::Staff));
        let shown = guard.render(&requirement, "/staff", |state| {
            state.role().map(|r| r.to_string())
        });
        assert_eq!(shown, Guarded::View(Some("staff".into())));
    }

    #[test]
    fn public_page_renders_without_session() {
        let (_tx, guard) = guard(SessionState::Unauthenticated, DenyMode::Redirect);
        assert_eq!(
            guard.render(&AccessRequirement::public(), "/", |_| "home"),
            Guarded::View("home")
        );
    }

    #[test]
    fn post_login_destination_accepts_same_site_paths_only() {
        let (_tx, guard) = guard(SessionState::Unauthenticated, DenyMode::Redirect);
        let dest = |query: &str| guard.post_login_destination(query, "/dashboard");

        assert_eq!(dest("?redirect=%2Fevents%2F42%3Ftab%3Drsvp"), "/events/42?tab=rsvp");
        assert_eq!(dest("redirect=/profile"), "/profile");
        assert_eq!(dest(""), "/dashboard");
        assert_eq!(dest("?other=/x"), "/dashboard");
        assert_eq!(dest("?redirect=https%3A%2F%2Fevil.test"), "/dashboard");
        assert_eq!(dest("?redirect=%2F%2Fevil.test"), "/dashboard");
        assert_eq!(dest("?redirect=%2F%5Cevil.test"), "/dashboard");
        assert_eq!(dest("?redirect=relative"), "/dashboard");
    }

    #[test]
    fn login_redirect_round_trips_through_post_login_destination() {
        let (_tx, guard) = guard(SessionState::Unauthenticated, DenyMode::Redirect);
        let location = "/interviews?date=2024-05-01&slot=a b";
        let redirect = guard.login_redirect(location);
        let query = redirect.split_once('?').map(|(_, q)| q).unwrap();
        assert_eq!(guard.post_login_destination(query, "/"), location);
    }

    #[tokio::test]
    async fn settled_waits_out_initializing() {
        let (tx, guard) = guard(SessionState::Initializing, DenyMode::Redirect);

        let waiter = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .settled(&AccessRequirement::authenticated(), "/home")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tx.send_replace(signed_in(Role::Student));
        assert_eq!(waiter.await.unwrap(), GuardOutcome::Render);
    }

    #[tokio::test]
    async fn changed_tracks_transitions() {
        let (tx, mut guard) = guard(SessionState::Unauthenticated, DenyMode::Redirect);

        tx.send_replace(signed_in(Role::Admin));
        assert!(guard.changed().await);
        assert_eq!(guard.state().role(), Some(Role::Admin));

        drop(tx);
        assert!(!guard.changed().await);
    }
}
