//! Error types for SASL and `OAuth2` operations.

use std::time::Duration;

/// Result type alias for authentication helpers.
pub type Result<T> = std::result::Result<T, Error>;

/// Authentication error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server challenge was not valid base64.
    #[error("Invalid base64 data: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The token provider could not supply a token.
    #[error("OAuth2 token unavailable: {0}")]
    TokenUnavailable(String),

    /// The token provider did not answer in time.
    #[error("Timed out after {0:?} waiting for an OAuth2 token")]
    Timeout(Duration),

    /// A SASL exchange could not be completed.
    #[error("SASL error: {0}")]
    Sasl(String),
}

impl Error {
    /// Creates a token-unavailable error.
    #[must_use]
    pub fn token_unavailable(reason: impl Into<String>) -> Self {
        Self::TokenUnavailable(reason.into())
    }
}
