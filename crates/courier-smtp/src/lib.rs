//! # courier-smtp
//!
//! An SMTP submission transport implementing RFC 5321.
//!
//! ## Features
//!
//! - **Response parsing**: multiline replies, enhanced status codes
//!   (RFC 3463) and EHLO keywords, tolerant of common server quirks
//! - **TLS support**: Both implicit TLS (port 465) and STARTTLS
//! - **Authentication**: PLAIN, LOGIN, CRAM-MD5, XOAUTH2 and EXTERNAL, with
//!   automatic mechanism selection
//! - **Extensions**: 8BITMIME, SIZE, PIPELINING, ENHANCEDSTATUSCODES
//! - **Delivery outcome**: errors record whether the whole message reached
//!   the server
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use courier_smtp::{
//!     AuthType, ConnectionSecurity, OutgoingMessage, ServerSettings, SmtpTransport,
//!     TlsSocketFactory,
//! };
//!
//! #[tokio::main]
//! async fn main() -> courier_smtp::Result<()> {
//!     let settings = ServerSettings::new("smtp.example.com", ConnectionSecurity::StartTls)
//!         .with_auth(AuthType::Automatic, "user@example.com", Some("password".into()));
//!     let mut transport =
//!         SmtpTransport::new(settings, Arc::new(TlsSocketFactory::new()), None);
//!
//!     let mut message = OutgoingMessage::new("user@example.com", "Test", "Hello, World!")
//!         .to("recipient@example.com");
//!
//!     match transport.send_message(&mut message).await {
//!         Ok(()) => println!("sent"),
//!         Err(e) if e.entire_message_sent() => println!("server failed after DATA: {e}"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! Disconnected ─→ Connecting ─→ GreetingRead ─→ HelloNegotiated
//!                                                   │
//!                      ┌── STARTTLS ─→ TlsUpgrading ─→ HelloRenegotiated
//!                      ▼
//!               Authenticated ─→ MessageReady ─→ Closed
//! ```
//!
//! Any failure closes the connection.
//!
//! ## Modules
//!
//! - [`auth`]: SASL mechanism selection and exchanges
//! - [`command`]: SMTP command serialization
//! - [`connection`]: Sockets, TLS and the command/reply session
//! - [`data`]: Line-ending normalization, line wrapping and dot-stuffing
//! - [`parser`]: Response parser
//! - [`transport`]: The high level transport
//! - [`types`]: Core SMTP types (replies, extensions)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod command;
pub mod connection;
pub mod data;
mod error;
pub mod message;
pub mod parser;
pub mod settings;
pub mod transport;
pub mod types;

pub use connection::{Capabilities, Connection, SocketFactory, TlsSocketFactory};
pub use error::{Error, Result};
pub use message::{Message, OutgoingMessage, RecipientType};
pub use settings::{AuthType, ConnectionSecurity, ServerSettings, TransportConfig};
pub use transport::{SmtpTransport, State};
pub use types::{AuthMechanism, EnhancedStatusCode, Extensions, Reply, ReplyCode, StatusClass};
