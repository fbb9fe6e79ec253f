//! `OAuth2` token types and the provider interface.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default time allowed for a provider to hand out a token.
pub const OAUTH2_TIMEOUT: Duration = Duration::from_secs(30);

/// `OAuth2` access token with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Access token string.
    pub access_token: String,
    /// Expiration time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Creates a new token without expiration information.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
        }
    }

    /// Sets the expiration time.
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Checks if the token is expired (with 60 second buffer).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|exp| Utc::now() + chrono::Duration::seconds(60) >= exp)
    }
}

/// Source of `OAuth2` bearer tokens.
///
/// Implementations typically cache a token and refresh it on demand. After a
/// server rejects a token the transport calls [`invalidate_token`] so the
/// next [`token`] call returns a fresh one.
///
/// [`invalidate_token`]: TokenProvider::invalidate_token
/// [`token`]: TokenProvider::token
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a token, waiting at most `timeout` for it.
    ///
    /// # Errors
    ///
    /// Returns an error if no token can be obtained.
    async fn token(&self, timeout: Duration) -> Result<Token>;

    /// Discards the currently cached token.
    fn invalidate_token(&self);
}
