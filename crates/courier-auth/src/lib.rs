//! # courier-auth
//!
//! SASL client responses and `OAuth2` token plumbing for mail submission.
//!
//! ## Features
//!
//! - **SASL mechanisms**: PLAIN, LOGIN, CRAM-MD5, EXTERNAL and XOAUTH2 client
//!   responses
//! - **XOAUTH2 challenges**: decides whether a rejected token is worth
//!   refreshing
//! - **Token providers**: the [`TokenProvider`] trait that transports use to
//!   fetch and invalidate bearer tokens
//!
//! ## Quick Start
//!
//! ```
//! use courier_auth::sasl::{plain_response, xoauth2_response};
//!
//! // Send: AUTH PLAIN {plain}
//! let plain = plain_response("user@example.com", "password");
//!
//! // Send: AUTH XOAUTH2 {xoauth2}
//! let xoauth2 = xoauth2_response("user@gmail.com", "ya29.a0...");
//! # let _ = (plain, xoauth2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod challenge;
mod error;
pub mod sasl;
pub mod token;

pub use error::{Error, Result};
pub use token::{OAUTH2_TIMEOUT, Token, TokenProvider};
