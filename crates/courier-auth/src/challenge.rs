//! XOAUTH2 server challenge handling.
//!
//! When an XOAUTH2 attempt fails, servers answer with a `334` continuation
//! whose text is a base64 encoded JSON document:
//! `{"status":"401", "schemes":"bearer", "scope":"..."}`.
//!
//! A `400` status means the token was rejected and a fresh one may work. Any
//! other status is treated as permanent.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::error::Result;

/// Status value that signals a retriable token rejection.
const BAD_RESPONSE: &str = "400";

/// `OAuth2` error document sent in an XOAUTH2 challenge.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthError {
    /// HTTP-like status code.
    pub status: Option<String>,
    /// Authentication schemes supported.
    #[serde(default)]
    pub schemes: Option<String>,
    /// `OAuth2` scope required.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Decodes and parses an XOAUTH2 challenge.
///
/// # Errors
///
/// Returns an error if the challenge is not base64 encoded JSON.
pub fn parse_challenge(challenge: &str) -> Result<OAuthError> {
    let decoded = STANDARD.decode(challenge.trim())?;
    Ok(serde_json::from_slice(&decoded)?)
}

/// Decides whether an XOAUTH2 attempt should be repeated with a new token.
///
/// Challenges that cannot be decoded, or that carry no status, are treated as
/// retriable. `host` is only used for log context.
#[must_use]
pub fn should_retry(challenge: &str, host: &str) -> bool {
    match parse_challenge(challenge) {
        Ok(OAuthError {
            status: Some(status),
            ..
        }) => status == BAD_RESPONSE,
        Ok(_) => {
            tracing::warn!(host, "XOAUTH2 challenge without status");
            true
        }
        Err(e) => {
            tracing::warn!(?e, host, "Unable to parse XOAUTH2 challenge");
            true
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn encode(json: &str) -> String {
        STANDARD.encode(json)
    }

    #[test]
    fn test_parse_challenge() {
        let challenge =
            encode(r#"{"status":"401","schemes":"bearer","scope":"https://mail.google.com/"}"#);
        let error = parse_challenge(&challenge).unwrap();

        assert_eq!(error.status.as_deref(), Some("401"));
        assert_eq!(error.schemes.as_deref(), Some("bearer"));
        assert_eq!(error.scope.as_deref(), Some("https://mail.google.com/"));
    }

    #[test]
    fn test_status_400_is_retriable() {
        let challenge = encode(r#"{"status":"400","schemes":"Bearer"}"#);
        assert!(should_retry(&challenge, "smtp.gmail.com"));
    }

    #[test]
    fn test_status_401_is_permanent() {
        let challenge = encode(r#"{"status":"401","schemes":"bearer"}"#);
        assert!(!should_retry(&challenge, "smtp.gmail.com"));
    }

    #[test]
    fn test_missing_status_is_retriable() {
        let challenge = encode(r#"{"schemes":"bearer","scope":"https://mail.google.com/"}"#);
        assert!(should_retry(&challenge, "smtp.gmail.com"));
    }

    #[test]
    fn test_invalid_json_is_retriable() {
        let challenge = encode("{\"status\":");
        assert!(should_retry(&challenge, "smtp.gmail.com"));
    }

    #[test]
    fn test_invalid_base64_is_retriable() {
        assert!(should_retry("%%%", "smtp.gmail.com"));
    }
}
