//! Access token inspection
//!
//! Tokens are opaque to the core except for two checks: a syntax check used
//! during hydration, and reading the `exp` claim when the token happens to
//! be a JWT. An opaque token has unknown expiry and is never reported as
//! expired; the identity service's 401 is the authority in that case.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

/// Values browsers leave behind when `undefined`/`null` got stringified.
const PLACEHOLDER_VALUES: &[&str] = &["undefined", "null"];

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<f64>,
}

/// Whether a stored token is usable as a bearer credential at all.
pub fn is_well_formed(token: &str) -> bool {
    !token.is_empty()
        && !PLACEHOLDER_VALUES.contains(&token)
        && token.chars().all(|c| c.is_ascii_graphic())
}

/// Expiry of a JWT-shaped token as unix seconds, or `None` when the token is
/// opaque or carries no `exp`.
pub fn expires_at(token: &str) -> Option<u64> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;
    claim
        .exp
        .filter(|exp| exp.is_finite() && *exp >= 0.0)
        .map(|exp| exp as u64)
}

/// True when the token's `exp` is at or before `now + leeway`.
pub fn is_expired(token: &str, now_secs: u64, leeway_secs: u64) -> bool {
    expires_at(token).is_some_and(|exp| exp <= now_secs.saturating_add(leeway_secs))
}

/// Current unix time in seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Build an unsigned JWT-shaped token with the given `exp` (tests and mocks).
#[cfg(any(test, feature = "test-support"))]
pub fn unsigned_jwt(subject: &str, exp: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({ "sub": subject, "exp": exp })
            .to_string()
            .as_bytes(),
    );
    format!("{header}.{payload}.sig")
}
