//! SMTP authentication.
//!
//! [`select_mechanism`] maps the configured [`AuthType`] and the advertised
//! `AUTH` mechanisms to the mechanism to run; [`authenticate`] runs it.

mod password;
mod xoauth2;

use std::time::Duration;

use courier_auth::TokenProvider;

use crate::connection::Session;
use crate::error::{Error, Result};
use crate::settings::AuthType;
use crate::types::{AuthMechanism, Extensions, ReplyCode};

/// Everything a mechanism needs besides the session.
pub struct AuthContext<'a> {
    /// Username to authenticate as.
    pub username: &'a str,
    /// Password for password-based mechanisms.
    pub password: &'a str,
    /// Source of `XOAUTH2` tokens.
    pub token_provider: Option<&'a dyn TokenProvider>,
    /// Time allowed for fetching a token.
    pub token_timeout: Duration,
    /// Server hostname, for log context.
    pub host: &'a str,
}

/// Picks the mechanism for `auth_type`.
///
/// `secure` means the connection is encrypted, either by implicit TLS or a
/// completed STARTTLS upgrade. Without encryption, automatic selection only
/// accepts CRAM-MD5 so no password is sent in the clear.
///
/// Returns `None` for [`AuthType::None`].
///
/// # Errors
///
/// Returns [`Error::MechanismUnavailable`] if the server does not offer a
/// suitable mechanism, or [`Error::Certificate`] if EXTERNAL is configured and
/// not offered.
pub fn select_mechanism(
    auth_type: AuthType,
    secure: bool,
    extensions: &Extensions,
    has_token_provider: bool,
) -> Result<Option<AuthMechanism>> {
    let offered = |mechanism| extensions.supports_auth(mechanism);

    let mechanism = match auth_type {
        AuthType::None => return Ok(None),
        AuthType::Plain | AuthType::Login => {
            // Servers offering both are asked for PLAIN, it takes one round trip
            if offered(AuthMechanism::Plain) {
                AuthMechanism::Plain
            } else if offered(AuthMechanism::Login) {
                AuthMechanism::Login
            } else {
                return Err(Error::MechanismUnavailable(
                    "Authentication methods SASL PLAIN and LOGIN are unavailable.".into(),
                ));
            }
        }
        AuthType::CramMd5 => {
            if !offered(AuthMechanism::CramMd5) {
                return Err(Error::MechanismUnavailable(
                    "Authentication method CRAM-MD5 is unavailable.".into(),
                ));
            }
            AuthMechanism::CramMd5
        }
        AuthType::XOAuth2 => {
            if !offered(AuthMechanism::XOAuth2) || !has_token_provider {
                return Err(Error::MechanismUnavailable(
                    "Authentication method XOAUTH2 is unavailable.".into(),
                ));
            }
            AuthMechanism::XOAuth2
        }
        AuthType::External => {
            if !offered(AuthMechanism::External) {
                return Err(Error::Certificate(
                    "Server does not offer the EXTERNAL authentication mechanism".into(),
                ));
            }
            AuthMechanism::External
        }
        AuthType::Automatic => {
            let candidates: &[AuthMechanism] = if secure {
                &[
                    AuthMechanism::Plain,
                    AuthMechanism::Login,
                    AuthMechanism::CramMd5,
                ]
            } else {
                &[AuthMechanism::CramMd5]
            };

            match candidates.iter().copied().find(|m| offered(*m)) {
                Some(mechanism) => mechanism,
                None if secure => {
                    return Err(Error::MechanismUnavailable(
                        "No supported authentication methods available.".into(),
                    ));
                }
                None => {
                    return Err(Error::MechanismUnavailable(
                        "Update your outgoing server authentication setting. \
                         AUTOMATIC authentication is unavailable."
                            .into(),
                    ));
                }
            }
        }
    };

    Ok(Some(mechanism))
}

/// Runs the SASL exchange for `mechanism`.
///
/// # Errors
///
/// Returns [`Error::AuthenticationFailed`] when the server rejects the
/// credentials with 535. Other negative replies are returned unchanged.
pub async fn authenticate(
    session: &mut Session,
    mechanism: AuthMechanism,
    context: &AuthContext<'_>,
) -> Result<()> {
    tracing::debug!(%mechanism, "Authenticating");
    match mechanism {
        AuthMechanism::Plain => password::plain(session, context).await,
        AuthMechanism::Login => password::login(session, context).await,
        AuthMechanism::CramMd5 => password::cram_md5(session, context).await,
        AuthMechanism::External => password::external(session, context).await,
        AuthMechanism::XOAuth2 => xoauth2::authenticate(session, context).await,
    }
}

/// Translates a 535 reply into an authentication failure.
fn authentication_failure(mechanism: AuthMechanism, error: Error) -> Error {
    match error {
        Error::NegativeReply { code, text, .. } if code == ReplyCode::AUTH_FAILED => {
            Error::AuthenticationFailed {
                mechanism: mechanism.as_str(),
                server_message: text,
            }
        }
        other => other,
    }
}
