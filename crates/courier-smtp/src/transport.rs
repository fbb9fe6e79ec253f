//! The SMTP transport: connect, negotiate, authenticate, send.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use courier_auth::TokenProvider;

use crate::auth::{self, AuthContext};
use crate::command::Command;
use crate::connection::{Capabilities, Connection, Session, SocketFactory};
use crate::error::{Error, Result};
use crate::message::{Message, RecipientType};
use crate::settings::{AuthType, ConnectionSecurity, ServerSettings, TransportConfig};
use crate::types::{Extensions, HelloResult, ReplyCode};

/// Where the transport is in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Never opened.
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Positive greeting received.
    GreetingRead,
    /// `EHLO` or `HELO` completed.
    HelloNegotiated,
    /// `STARTTLS` accepted, handshake in progress.
    TlsUpgrading,
    /// `EHLO` repeated over TLS.
    HelloRenegotiated,
    /// Ready for a mail transaction.
    Authenticated,
    /// Sender and recipients accepted.
    MessageReady,
    /// Closed, possibly after a failure.
    Closed,
}

/// SMTP client transport.
///
/// Every [`send_message`](Self::send_message) opens a fresh connection and
/// closes it afterwards.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use courier_smtp::{
///     AuthType, ConnectionSecurity, OutgoingMessage, ServerSettings, SmtpTransport,
///     TlsSocketFactory,
/// };
///
/// let settings = ServerSettings::new("smtp.example.com", ConnectionSecurity::StartTls)
///     .with_auth(AuthType::Automatic, "user@example.com", Some("password".into()));
/// let mut transport = SmtpTransport::new(settings, Arc::new(TlsSocketFactory::new()), None);
///
/// let mut message = OutgoingMessage::new("user@example.com", "Hello", "Hi there!")
///     .to("friend@example.com");
/// transport.send_message(&mut message).await?;
/// ```
pub struct SmtpTransport {
    settings: ServerSettings,
    config: TransportConfig,
    socket_factory: Arc<dyn SocketFactory>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    session: Option<Session>,
    state: State,
}

impl SmtpTransport {
    /// Creates a transport with the default configuration.
    #[must_use]
    pub fn new(
        settings: ServerSettings,
        socket_factory: Arc<dyn SocketFactory>,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> Self {
        Self {
            settings,
            config: TransportConfig::default(),
            socket_factory,
            token_provider,
            session: None,
            state: State::Disconnected,
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Returns the capabilities of the open connection.
    #[must_use]
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.session.as_ref().map(Session::capabilities)
    }

    /// Connects, negotiates and authenticates.
    ///
    /// On failure the connection is closed before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established, the server
    /// rejects the greeting, STARTTLS is required but unavailable, or
    /// authentication fails.
    pub async fn open(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::InvalidState("Transport is already open".into()));
        }

        match self.open_session().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    /// Sends `QUIT` without waiting for the reply and drops the connection.
    ///
    /// Safe to call in any state and more than once.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.quit().await;
        }
        self.state = State::Closed;
    }

    /// Opens a connection to verify the settings, then closes it.
    ///
    /// # Errors
    ///
    /// Returns whatever [`open`](Self::open) returns.
    pub async fn check_settings(&mut self) -> Result<()> {
        self.ensure_closed().await;

        let result = self.open().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, host = %self.settings.host, "Error while checking server settings");
        }

        self.close().await;
        result
    }

    /// Sends `message` to all its To, Cc and Bcc recipients.
    ///
    /// A message without recipients is silently skipped. The `Bcc` header is
    /// removed from `message` before it is sent.
    ///
    /// # Errors
    ///
    /// Errors from connecting and authenticating are returned unchanged,
    /// as is [`Error::MessageTooLarge`]. Failures during the mail
    /// transaction are wrapped in [`Error::Send`], which records whether
    /// the whole message had been written.
    pub async fn send_message(&mut self, message: &mut dyn Message) -> Result<()> {
        let addresses = collect_recipients(message);
        if addresses.is_empty() {
            tracing::debug!("Message has no recipients, not sending");
            return Ok(());
        }

        message.remove_header("Bcc");

        self.ensure_closed().await;
        self.open().await?;

        let result = self.transmit(message, &addresses).await;
        self.close().await;
        result
    }

    async fn ensure_closed(&mut self) {
        if self.session.is_some() {
            tracing::warn!("Transport was open when it was expected to be closed");
            self.close().await;
        }
    }

    async fn open_session(&mut self) -> Result<()> {
        self.state = State::Connecting;
        let stream = self.connect().await?;
        let session = self.session.insert(Session::new(stream, &self.config));

        let greeting = session.read_greeting().await?;
        if greeting.is_negative() {
            return Err(Error::negative_reply(&greeting));
        }
        self.state = State::GreetingRead;

        let hello_name = hello_name(session.local_addr()?);
        let mut extensions = hello(session, &hello_name).await?;
        session.set_capabilities(Capabilities::from_extensions(extensions.clone()));
        self.state = State::HelloNegotiated;

        let mut secure = self.settings.connection_security == ConnectionSecurity::SslTls;
        if self.settings.connection_security == ConnectionSecurity::StartTls {
            if !extensions.contains("STARTTLS") {
                return Err(Error::Certificate(
                    "STARTTLS is required but not offered by the server".into(),
                ));
            }
            session.execute(&Command::StartTls).await?;
            self.state = State::TlsUpgrading;

            let session = self.upgrade_to_tls().await?;
            // Required by RFC 3207 section 4.2
            extensions = hello(session, &hello_name).await?;
            session.set_capabilities(Capabilities::from_extensions(extensions.clone()));
            secure = true;
            self.state = State::HelloRenegotiated;
        }

        if self.should_authenticate() {
            self.authenticate(secure, &extensions).await?;
        }
        self.state = State::Authenticated;
        Ok(())
    }

    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let host = self.settings.host.as_str();
        let addresses = tokio::net::lookup_host((host, self.settings.port)).await?;

        let mut last_error = None;
        for addr in addresses {
            tracing::debug!(host, %addr, "Connecting");
            match self.connect_to(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::warn!(%addr, error = %e, "Could not connect");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("No address found for {host}"),
            ))
        }))
    }

    async fn connect_to(&self, addr: SocketAddr) -> Result<Box<dyn Connection>> {
        let stream = self
            .socket_factory
            .connect(addr, self.config.connect_timeout)
            .await?;

        if self.settings.connection_security == ConnectionSecurity::SslTls {
            self.socket_factory
                .create_socket(
                    stream,
                    &self.settings.host,
                    self.settings.port,
                    self.settings.client_certificate_alias.as_deref(),
                )
                .await
        } else {
            Ok(stream)
        }
    }

    /// Replaces the plain session with one over TLS.
    async fn upgrade_to_tls(&mut self) -> Result<&mut Session> {
        let plain = self
            .session
            .take()
            .ok_or_else(|| Error::InvalidState("No connection to upgrade".into()))?;

        let stream = self
            .socket_factory
            .create_socket(
                plain.into_stream(),
                &self.settings.host,
                self.settings.port,
                self.settings.client_certificate_alias.as_deref(),
            )
            .await?;

        Ok(self.session.insert(Session::new(stream, &self.config)))
    }

    fn should_authenticate(&self) -> bool {
        let has_username = self.settings.username.as_deref().is_some_and(|u| !u.is_empty());
        let has_password = self.settings.password.as_deref().is_some_and(|p| !p.is_empty());

        has_username
            && (has_password
                || matches!(self.settings.auth_type, AuthType::External | AuthType::XOAuth2))
    }

    async fn authenticate(&mut self, secure: bool, extensions: &Extensions) -> Result<()> {
        let Some(mechanism) = auth::select_mechanism(
            self.settings.auth_type,
            secure,
            extensions,
            self.token_provider.is_some(),
        )?
        else {
            return Ok(());
        };

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::InvalidState("Not connected".into()))?;
        let context = AuthContext {
            username: self.settings.username.as_deref().unwrap_or_default(),
            password: self.settings.password.as_deref().unwrap_or_default(),
            token_provider: self.token_provider.as_deref(),
            token_timeout: self.config.token_timeout,
            host: &self.settings.host,
        };
        auth::authenticate(session, mechanism, &context).await
    }

    async fn transmit(&mut self, message: &dyn Message, addresses: &[String]) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::InvalidState("Not connected".into()))?;

        let capabilities = session.capabilities().clone();
        if let Some(limit) = capabilities.max_message_size {
            if message.has_attachments() {
                let size = message.calculate_size();
                if size > limit {
                    return Err(Error::MessageTooLarge { size, limit });
                }
            }
        }

        let mut entire_message_sent = false;
        let mut result = send_envelope(session, &capabilities, message.from_address(), addresses).await;
        if result.is_ok() {
            self.state = State::MessageReady;
            result = send_data(
                session,
                message,
                self.config.data_timeout,
                &mut entire_message_sent,
            )
            .await;
        }

        result.map_err(|source| Error::Send {
            entire_message_sent,
            source: Box::new(source),
        })
    }
}

impl fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("settings", &self.settings)
            .field("config", &self.config)
            .field("has_token_provider", &self.token_provider.is_some())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Sends `EHLO`, falling back to `HELO` when the server rejects it.
///
/// A rejected `HELO` is tolerated; the server then gets no extensions.
async fn hello(session: &mut Session, hello_name: &str) -> Result<Extensions> {
    match session.ehlo(hello_name).await? {
        HelloResult::Hello { keywords, .. } => Ok(keywords),
        HelloResult::Error(_) => {
            tracing::debug!("Server doesn't support the EHLO command. Trying HELO...");
            let helo = Command::Helo {
                hostname: hello_name.to_string(),
            };
            match session.execute(&helo).await {
                Ok(_) => {}
                Err(Error::NegativeReply { .. }) => {
                    tracing::warn!("Server doesn't support the HELO command. Continuing anyway.");
                }
                Err(e) => return Err(e),
            }
            Ok(Extensions::new())
        }
    }
}

async fn send_envelope(
    session: &mut Session,
    capabilities: &Capabilities,
    from: &str,
    addresses: &[String],
) -> Result<()> {
    if !capabilities.eight_bit_mime {
        tracing::debug!("Server does not support 8-bit transfer encoding");
    }

    let mut commands = Vec::with_capacity(addresses.len() + 1);
    commands.push(Command::MailFrom {
        from: from.to_string(),
        eight_bit_mime: capabilities.eight_bit_mime,
    });
    commands.extend(
        addresses
            .iter()
            .map(|address| Command::RcptTo { to: address.clone() }),
    );

    if capabilities.pipelining {
        return session.execute_pipelined(&commands).await;
    }
    for command in &commands {
        session.execute(command).await?;
    }
    Ok(())
}

async fn send_data(
    session: &mut Session,
    message: &dyn Message,
    data_timeout: Duration,
    entire_message_sent: &mut bool,
) -> Result<()> {
    let reply = session.execute(&Command::Data).await?;
    if reply.code != ReplyCode::START_DATA {
        return Err(Error::Protocol(format!(
            "Unexpected reply to DATA: {} {}",
            reply.code,
            reply.joined_text()
        )));
    }

    // Large messages can take a while to be accepted
    session.set_read_timeout(data_timeout);

    session.write_message(message).await?;
    *entire_message_sent = true;

    session.execute(&Command::Raw(".".to_string())).await?;
    Ok(())
}

/// To, Cc and Bcc addresses without duplicates, in that order.
fn collect_recipients(message: &dyn Message) -> Vec<String> {
    let mut seen = HashSet::new();
    [RecipientType::To, RecipientType::Cc, RecipientType::Bcc]
        .into_iter()
        .flat_map(|recipient_type| message.recipients(recipient_type))
        .filter(|address| seen.insert(address.clone()))
        .collect()
}

/// Address literal reported in `EHLO`.
///
/// The loopback address of the socket's family is used so the client's real
/// address is not disclosed.
fn hello_name(local_addr: SocketAddr) -> String {
    if local_addr.is_ipv6() {
        "[IPv6:::1]".to_string()
    } else {
        "[127.0.0.1]".to_string()
    }
}
