//! Password and certificate based mechanisms.

use courier_auth::sasl;

use super::{AuthContext, authentication_failure};
use crate::command::Command;
use crate::connection::Session;
use crate::error::{Error, Result};
use crate::types::AuthMechanism;

/// `AUTH LOGIN`, username and password in two continuation lines.
pub(super) async fn login(session: &mut Session, context: &AuthContext<'_>) -> Result<()> {
    let exchange = async {
        session
            .execute(&Command::Auth {
                mechanism: AuthMechanism::Login,
                initial_response: None,
            })
            .await?;
        session
            .execute(&Command::SaslResponse(sasl::login_response(context.username)))
            .await?;
        session
            .execute(&Command::SaslResponse(sasl::login_response(context.password)))
            .await?;
        Ok::<_, Error>(())
    };

    exchange
        .await
        .map_err(|e| authentication_failure(AuthMechanism::Login, e))
}

/// `AUTH PLAIN` with the credentials as initial response.
pub(super) async fn plain(session: &mut Session, context: &AuthContext<'_>) -> Result<()> {
    session
        .execute(&Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some(sasl::plain_response(context.username, context.password)),
        })
        .await
        .map(drop)
        .map_err(|e| authentication_failure(AuthMechanism::Plain, e))
}

/// `AUTH CRAM-MD5`, answering the server's nonce with an HMAC-MD5 digest.
pub(super) async fn cram_md5(session: &mut Session, context: &AuthContext<'_>) -> Result<()> {
    let exchange = async {
        let reply = session
            .execute(&Command::Auth {
                mechanism: AuthMechanism::CramMd5,
                initial_response: None,
            })
            .await?;

        let [nonce] = reply.texts.as_slice() else {
            return Err(Error::Protocol("Unable to negotiate CRAM-MD5".into()));
        };
        let response = sasl::cram_md5_response(context.username, context.password, nonce)
            .map_err(|e| {
                tracing::debug!(error = %e, "Invalid CRAM-MD5 challenge");
                Error::Protocol("Unable to negotiate CRAM-MD5".into())
            })?;

        session.execute(&Command::SaslResponse(response)).await?;
        Ok(())
    };

    exchange
        .await
        .map_err(|e| authentication_failure(AuthMechanism::CramMd5, e))
}

/// `AUTH EXTERNAL`, relying on the TLS client certificate.
pub(super) async fn external(session: &mut Session, context: &AuthContext<'_>) -> Result<()> {
    session
        .execute(&Command::Auth {
            mechanism: AuthMechanism::External,
            initial_response: Some(sasl::external_response(context.username)),
        })
        .await
        .map(drop)
        .map_err(|e| authentication_failure(AuthMechanism::External, e))
}
