//! Classification of stored session data
//!
//! Pure: takes the raw slots and decides what they amount to. The manager
//! does the clearing and publishing. Anything short of a complete, parsable
//! token + user + role triple is corruption, including a triple missing only
//! its role.

use common::Secret;
use portal_auth::claims;
use portal_auth::{Role, Session, StoredSnapshot, User};

/// What the stored slots amount to.
#[derive(Debug, Clone, PartialEq)]
pub enum Hydration {
    /// Nothing stored at all.
    Empty,
    Session(Session),
    /// Something is stored but it is not a usable session.
    Corrupt(String),
}

pub fn classify(snapshot: &StoredSnapshot) -> Hydration {
    if snapshot.is_empty() {
        return Hydration::Empty;
    }
    match session_from(snapshot) {
        Ok(session) => Hydration::Session(session),
        Err(reason) => Hydration::Corrupt(reason),
    }
}

fn session_from(snapshot: &StoredSnapshot) -> Result<Session, String> {
    let missing: Vec<&str> = [
        ("access_token", snapshot.access_token.is_none()),
        ("user", snapshot.user.is_none()),
        ("role", snapshot.role.is_none()),
    ]
    .into_iter()
    .filter_map(|(slot, absent)| absent.then_some(slot))
    .collect();
    if !missing.is_empty() {
        return Err(format!("partial session, missing {}", missing.join(", ")));
    }

    let (Some(access_token), Some(user), Some(role)) =
        (&snapshot.access_token, &snapshot.user, &snapshot.role)
    else {
        return Err("partial session".into());
    };

    if !claims::is_well_formed(access_token) {
        return Err("stored access token is malformed".into());
    }
    let user: User =
        serde_json::from_str(user).map_err(|e| format!("stored user is unparsable: {e}"))?;
    let role: Role = role.parse().map_err(|e: portal_auth::Error| e.to_string())?;

    // Optional tokens that are unusable are dropped rather than failing the
    // whole session.
    let optional = |token: &Option<String>| {
        token
            .as_deref()
            .filter(|t| claims::is_well_formed(t))
            .map(Secret::from)
    };

    Ok(Session {
        access_token: Secret::from(access_token.as_str()),
        refresh_token: optional(&snapshot.refresh_token),
        portal_token: optional(&snapshot.portal_token),
        user,
        role,
    })
}
