//! SASL client responses.
//!
//! Implements the client side of:
//! - PLAIN (RFC 4616)
//! - LOGIN (draft-murchison-sasl-login)
//! - CRAM-MD5 (RFC 2195)
//! - EXTERNAL (RFC 4422, appendix A)
//! - XOAUTH2 (Google/Microsoft proprietary)
//!
//! Every function returns the base64 text that goes on the wire.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md5::Md5;

use crate::error::{Error, Result};

type HmacMd5 = Hmac<Md5>;

/// Generates the PLAIN initial response.
///
/// Format: `\0<username>\0<password>` (base64 encoded). The authorization
/// identity is left empty so the server derives it from the username.
///
/// # Example
///
/// ```
/// use courier_auth::sasl::plain_response;
///
/// assert_eq!(plain_response("user", "password"), "AHVzZXIAcGFzc3dvcmQ=");
/// ```
#[must_use]
pub fn plain_response(username: &str, password: &str) -> String {
    let auth_string = format!("\0{username}\0{password}");
    STANDARD.encode(auth_string.as_bytes())
}

/// Encodes a single LOGIN step (username or password).
#[must_use]
pub fn login_response(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// Generates the EXTERNAL initial response carrying the authorization identity.
#[must_use]
pub fn external_response(username: &str) -> String {
    STANDARD.encode(username.as_bytes())
}

/// Computes the CRAM-MD5 response to a base64 encoded server nonce.
///
/// The response is `base64("<username> <hex(HMAC-MD5(password, nonce))>")`.
///
/// # Errors
///
/// Returns an error if the nonce is not valid base64.
///
/// # Example
///
/// ```
/// use courier_auth::sasl::cram_md5_response;
///
/// // "<24609.1047914046@localhost>"
/// let nonce = "PDI0NjA5LjEwNDc5MTQwNDZAbG9jYWxob3N0Pg==";
/// let response = cram_md5_response("user", "password", nonce).unwrap();
/// assert_eq!(response, "dXNlciAyZDBlNTcwYzZlYWI0ZjY3ZDUyZmFkN2Q1NGExZDJhYQ==");
/// ```
pub fn cram_md5_response(username: &str, password: &str, b64_nonce: &str) -> Result<String> {
    let nonce = STANDARD.decode(b64_nonce.trim())?;

    let mut mac = HmacMd5::new_from_slice(password.as_bytes())
        .map_err(|e| Error::Sasl(format!("CRAM-MD5 key rejected: {e}")))?;
    mac.update(&nonce);
    let digest = hex::encode(mac.finalize().into_bytes());

    let plain = format!("{username} {digest}");
    Ok(STANDARD.encode(plain.as_bytes()))
}

/// Generates the XOAUTH2 initial response.
///
/// Format: `user=<user>\x01auth=Bearer <token>\x01\x01`
///
/// # Example
///
/// ```
/// use courier_auth::sasl::xoauth2_response;
///
/// let response = xoauth2_response("user", "oldToken");
/// assert_eq!(response, "dXNlcj11c2VyAWF1dGg9QmVhcmVyIG9sZFRva2VuAQE=");
/// ```
#[must_use]
pub fn xoauth2_response(user: &str, token: &str) -> String {
    let auth_string = format!("user={user}\x01auth=Bearer {token}\x01\x01");
    STANDARD.encode(auth_string.as_bytes())
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

    fn decode(response: &str) -> String {
        String::from_utf8(STANDARD.decode(response).unwrap()).unwrap()
    }

    #[test]
    fn test_plain_response_format() {
        let response = plain_response("test", "pass");
        assert_eq!(decode(&response), "\0test\0pass");
    }

    #[test]
    fn test_plain_response_special_chars() {
        let response = plain_response("user", "pass@word!");
        assert_eq!(decode(&response), "\0user\0pass@word!");
    }

    #[test]
    fn test_plain_response_utf8() {
        let response = plain_response("jürgen", "pässwörd");
        assert_eq!(decode(&response), "\0jürgen\0pässwörd");
    }

    #[test]
    fn test_login_response() {
        assert_eq!(login_response("user"), "dXNlcg==");
        assert_eq!(login_response("password"), "cGFzc3dvcmQ=");
    }

    #[test]
    fn test_external_response() {
        assert_eq!(external_response("user"), "dXNlcg==");
    }

    #[test]
    fn test_cram_md5_known_vector() {
        let nonce = STANDARD.encode("<24609.1047914046@localhost>");
        let response = cram_md5_response("user", "password", &nonce).unwrap();
        assert_eq!(
            decode(&response),
            "user 2d0e570c6eab4f67d52fad7d54a1d2aa"
        );
    }

    #[test]
    fn test_cram_md5_rfc2195_vector() {
        // RFC 2195, section 2
        let nonce = STANDARD.encode("<1896.697170952@postoffice.reston.mci.net>");
        let response = cram_md5_response("tim", "tanstaaftanstaaf", &nonce).unwrap();
        assert_eq!(decode(&response), "tim b913a602c7eda7a495b4e6e7334d3890");
    }

    #[test]
    fn test_cram_md5_invalid_nonce() {
        let result = cram_md5_response("user", "password", "not base64!");
        assert!(matches!(result, Err(Error::Base64(_))));
    }

    #[test]
    fn test_xoauth2_format() {
        let response = xoauth2_response("test@test.com", "abc");
        assert_eq!(decode(&response), "user=test@test.com\x01auth=Bearer abc\x01\x01");
    }

    #[test]
    fn test_responses_are_base64() {
        let response = xoauth2_response("user@example.com", "token");
        assert!(!response.contains("user@example.com"));
        assert!(STANDARD.decode(&response).is_ok());
    }
}
