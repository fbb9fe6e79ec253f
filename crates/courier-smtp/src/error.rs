//! Error types for SMTP operations.

use std::io;
use std::time::Duration;

use crate::types::{EnhancedStatusCode, Reply, ReplyCode};

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Server response violates the SMTP grammar.
    #[error("Parser error: {0}")]
    Parse(String),

    /// Server returned a 4xx or 5xx reply.
    #[error("Negative SMTP reply: {code} {text}")]
    NegativeReply {
        /// Reply code (e.g., 550).
        code: ReplyCode,
        /// Reply text with all lines joined.
        text: String,
        /// Enhanced status code, if the server provided one.
        enhanced_status_code: Option<EnhancedStatusCode>,
    },

    /// Server rejected the credentials (535).
    #[error("{mechanism} failed: {server_message}")]
    AuthenticationFailed {
        /// Mechanism that was attempted.
        mechanism: &'static str,
        /// Text the server sent with the rejection.
        server_message: String,
    },

    /// TLS/certificate setup is not usable with this server.
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// No authentication mechanism matches the configuration.
    #[error("Authentication mechanism unavailable: {0}")]
    MechanismUnavailable(String),

    /// Protocol error (unexpected but well-formed exchange).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Message exceeds the size limit advertised by the server.
    #[error("Message too large for server: {size} bytes exceeds {limit}")]
    MessageTooLarge {
        /// Serialized message size.
        size: u64,
        /// Server limit from the `SIZE` keyword.
        limit: u64,
    },

    /// `OAuth2` token provider failure.
    #[error("OAuth2 error: {0}")]
    OAuth(#[from] courier_auth::Error),

    /// Invalid state for operation.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),

    /// Sending a message failed.
    #[error("Unable to send message: {source}")]
    Send {
        /// True if every byte of the message was written before the failure,
        /// meaning the server may have accepted it.
        entire_message_sent: bool,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Creates a negative reply error from a server reply.
    #[must_use]
    pub fn negative_reply(reply: &Reply) -> Self {
        Self::NegativeReply {
            code: reply.code,
            text: reply.joined_text(),
            enhanced_status_code: reply.enhanced_status_code,
        }
    }

    /// Returns the SMTP reply code behind this error, if any.
    #[must_use]
    pub fn reply_code(&self) -> Option<ReplyCode> {
        match self {
            Self::NegativeReply { code, .. } => Some(*code),
            Self::AuthenticationFailed { .. } => Some(ReplyCode::AUTH_FAILED),
            Self::Send { source, .. } => source.reply_code(),
            _ => None,
        }
    }

    /// Returns true if retrying the same operation cannot succeed.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::MessageTooLarge { .. } | Self::AuthenticationFailed { .. } => true,
            Self::Send { source, .. } => source.is_permanent(),
            _ => self.reply_code().is_some_and(ReplyCode::is_permanent),
        }
    }

    /// Returns true if this is a transient server error (4xx).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.reply_code().is_some_and(ReplyCode::is_transient)
    }

    /// Returns true if the message may have reached the server.
    #[must_use]
    pub const fn entire_message_sent(&self) -> bool {
        matches!(
            self,
            Self::Send {
                entire_message_sent: true,
                ..
            }
        )
    }

    /// Returns true if the user should review TLS or certificate settings.
    #[must_use]
    pub const fn is_certificate_error(&self) -> bool {
        matches!(
            self,
            Self::Certificate(_) | Self::Tls(rustls::Error::InvalidCertificate(_))
        )
    }
}
