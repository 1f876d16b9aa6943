//! Session counters
//!
//! Recorded through the `metrics` facade; the embedding application decides
//! whether a recorder is installed. Without one every call is a no-op.
//!
//! - `session_logins_total` (counter): label `outcome`
//! - `session_logouts_total` (counter)
//! - `session_hydrations_total` (counter): label `outcome`
//! - `session_token_refreshes_total` (counter): label `outcome`

use portal_auth::Error;

pub fn record_login(outcome: &'static str) {
    metrics::counter!("session_logins_total", "outcome" => outcome).increment(1);
}

pub fn record_logout() {
    metrics::counter!("session_logouts_total").increment(1);
}

pub fn record_hydration(outcome: &'static str) {
    metrics::counter!("session_hydrations_total", "outcome" => outcome).increment(1);
}

pub fn record_token_refresh(outcome: &'static str) {
    metrics::counter!("session_token_refreshes_total", "outcome" => outcome).increment(1);
}

/// Outcome label for a failed gateway call.
pub fn error_outcome(error: &Error) -> &'static str {
    match error {
        Error::Network(_) => "network",
        Error::InvalidCredentials(_) => "invalid_credentials",
        Error::ExpiredToken(_) => "expired_token",
        Error::Rejected(_) => "rejected",
        Error::MalformedResponse(_) => "malformed_response",
        Error::NotAuthenticated(_) => "not_authenticated",
        Error::Superseded(_) => "superseded",
        Error::CorruptedSession(_) | Error::Storage(_) | Error::Config(_) => "error",
    }
}
