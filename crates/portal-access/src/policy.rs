//! Access decisions
//!
//! `decide` is a pure function of the session state, the page's requirement
//! and the requested location. Checks run in a fixed order and the first
//! match wins. Roles compare by exact equality: an admin does not satisfy a
//! student-only page.

use portal_auth::Role;
use portal_session::SessionState;

/// What a page needs before it may render. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRequirement {
    pub require_auth: bool,
    pub required_role: Option<Role>,
    /// Any one of these roles is enough. An empty set admits nobody.
    pub required_roles: Option<Vec<Role>>,
}

impl AccessRequirement {
    /// Reachable without a session.
    pub fn public() -> Self {
        Self::default()
    }

    pub fn authenticated() -> Self {
        Self {
            require_auth: true,
            ..Self::default()
        }
    }

    pub fn role(role: Role) -> Self {
        Self {
            require_auth: true,
            required_role: Some(role),
            required_roles: None,
        }
    }

    pub fn any_of(roles: impl IntoIterator<Item = Role>) -> Self {
        let mut required = Vec::new();
        for role in roles {
            if !required.contains(&role) {
                required.push(role);
            }
        }
        Self {
            require_auth: true,
            required_role: None,
            required_roles: Some(required),
        }
    }

    /// Every role named by either field, for denial messages.
    pub fn named_roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self.required_role.into_iter().collect();
        for role in self.required_roles.iter().flatten() {
            if !roles.contains(role) {
                roles.push(*role);
            }
        }
        roles
    }
}

/// Outcome of an access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Hydration has not finished; show the loading state.
    Pending,
    Allow,
    /// Not signed in; send to login and come back to `return_to` afterwards.
    DenyLogin { return_to: String },
    /// Signed in (or not required to be) but the role does not match.
    DenyUnauthorized {
        actual: Option<Role>,
        required: Vec<Role>,
    },
}

pub fn decide(state: &SessionState, requirement: &AccessRequirement, location: &str) -> Decision {
    if !state.is_settled() {
        return Decision::Pending;
    }

    if requirement.require_auth && !state.is_authenticated() {
        return Decision::DenyLogin {
            return_to: location.to_owned(),
        };
    }

    let actual = state.role();
    let denied = || Decision::DenyUnauthorized {
        actual,
        required: requirement.named_roles(),
    };

    if let Some(required) = requirement.required_role
        && actual != Some(required)
    {
        return denied();
    }

    if let Some(allowed) = &requirement.required_roles
        && !actual.is_some_and(|role| allowed.contains(&role))
    {
        return denied();
    }

    Decision::Allow
}
