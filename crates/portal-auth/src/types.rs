//! Session data model
//!
//! `Session` is the unit that gets written, read and cleared as a whole:
//! token, user and role always travel together. Token fields are wrapped in
//! `Secret` so a `{:?}` of a session never prints them.

use std::fmt;
use std::str::FromStr;

use common::Secret;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::Error;

/// Capability tag gating page access. No hierarchy: each role is only
/// equal to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Student,
    Company,
    Staff,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Student, Role::Company, Role::Staff];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Student => "student",
            Role::Company => "company",
            Role::Staff => "staff",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact match against the stored lowercase form.
impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| Error::CorruptedSession(format!("unknown role: {s:?}")))
    }
}

/// User identifiers arrive as numbers from some endpoints and strings from others.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(n) => write!(f, "{n}"),
            UserId::Text(s) => f.write_str(s),
        }
    }
}

/// Profile record returned by the identity service.
///
/// Fields the core does not interpret are kept in `extra` so a refreshed
/// profile round-trips through storage unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl User {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            first_name: None,
            last_name: None,
            email: None,
            extra: serde_json::Map::new(),
        }
    }

    /// "First Last", falling back to the email, then the id.
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !name.is_empty() {
            return name;
        }
        self.email.clone().unwrap_or_else(|| self.id.to_string())
    }
}

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    /// Secondary token for the partner portal, when the service issues one.
    pub portal_token: Option<Secret<String>>,
    pub user: User,
    pub role: Role,
}

/// Result of a successful refresh-token exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPair {
    pub access_token: Secret<String>,
    /// `None` when the service keeps the existing refresh token valid.
    pub refresh_token: Option<Secret<String>>,
}

/// Username/password form submission.
///
/// Serialized as `{"username": .., "password": ..}`; `Debug` never shows the
/// password. Any other `Serialize` body can be passed to `login` instead.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Secret<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Secret::new(password.into()),
        }
    }
}

impl Serialize for Credentials {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Credentials", 2)?;
        state.serialize_field("username", &self.username)?;
        state.serialize_field("password", self.password.expose_str())?;
        state.end()
    }
}
