//! `XOAUTH2` with a single token refresh.

use courier_auth::{TokenProvider, challenge, sasl};

use super::{AuthContext, authentication_failure};
use crate::command::Command;
use crate::connection::Session;
use crate::error::{Error, Result};
use crate::types::{AuthMechanism, ReplyCode};

const MAX_ATTEMPTS: u32 = 2;

/// Authenticates with a bearer token, retrying once with a fresh token when
/// the server rejects the first one and its challenge allows a retry.
pub(super) async fn authenticate(session: &mut Session, context: &AuthContext<'_>) -> Result<()> {
    let Some(provider) = context.token_provider else {
        return Err(Error::MechanismUnavailable(
            "Authentication method XOAUTH2 is unavailable.".into(),
        ));
    };

    let mut attempt = 1;
    loop {
        match attempt_xoauth2(session, provider, context).await {
            Ok(()) => return Ok(()),
            Err(Attempt::Failed(error)) => return Err(error),
            Err(Attempt::Rejected {
                error,
                retry_with_new_token,
            }) => {
                provider.invalidate_token();
                if attempt >= MAX_ATTEMPTS || !retry_with_new_token {
                    return Err(authentication_failure(AuthMechanism::XOAuth2, error));
                }
            }
        }

        tracing::debug!(attempt, "XOAUTH2 token rejected, retrying with a new token");
        attempt += 1;
    }
}

enum Attempt {
    /// The server answered 535.
    Rejected {
        error: Error,
        retry_with_new_token: bool,
    },
    Failed(Error),
}

async fn attempt_xoauth2(
    session: &mut Session,
    provider: &dyn TokenProvider,
    context: &AuthContext<'_>,
) -> std::result::Result<(), Attempt> {
    let token = tokio::time::timeout(context.token_timeout, provider.token(context.token_timeout))
        .await
        .map_err(|_| Attempt::Failed(courier_auth::Error::Timeout(context.token_timeout).into()))?
        .map_err(|e| Attempt::Failed(e.into()))?;
    if token.is_expired() {
        tracing::debug!(host = context.host, "Token provider returned an expired token");
    }

    // Without a challenge the server simply accepts or rejects the token
    let mut retry_with_new_token = true;
    let result = async {
        let reply = session
            .execute(&Command::Auth {
                mechanism: AuthMechanism::XOAuth2,
                initial_response: Some(sasl::xoauth2_response(
                    context.username,
                    &token.access_token,
                )),
            })
            .await?;

        if reply.code == ReplyCode::AUTH_CONTINUE {
            retry_with_new_token = challenge::should_retry(&reply.joined_text(), context.host);
            // The challenge is answered with an empty line, the server then sends 535
            session.execute(&Command::Raw(String::new())).await?;
        }
        Ok::<_, Error>(())
    }
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(error) if error.reply_code() == Some(ReplyCode::AUTH_FAILED) => {
            Err(Attempt::Rejected {
                error,
                retry_with_new_token,
            })
        }
        Err(error) => Err(Attempt::Failed(error)),
    }
}
