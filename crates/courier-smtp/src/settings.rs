//! Server settings and transport configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionSecurity {
    /// No encryption (port 25). **Not recommended for production.**
    None,
    /// TLS from the start (port 465).
    SslTls,
    /// Start with plaintext, upgrade with STARTTLS (port 587). **Recommended.**
    #[default]
    StartTls,
}

impl ConnectionSecurity {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 25,
            Self::SslTls => 465,
            Self::StartTls => 587,
        }
    }
}

/// Configured authentication type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// Never authenticate.
    None,
    /// PLAIN, falling back to LOGIN.
    Plain,
    /// LOGIN, although PLAIN is preferred when offered.
    Login,
    /// CRAM-MD5 only.
    CramMd5,
    /// `XOAUTH2` with a token provider.
    #[serde(rename = "xoauth2")]
    XOAuth2,
    /// EXTERNAL with a TLS client certificate.
    External,
    /// Best mechanism the server offers.
    #[default]
    Automatic,
}

/// Outgoing server settings.
///
/// Immutable input to a transport. The password is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub connection_security: ConnectionSecurity,
    /// Authentication type.
    pub auth_type: AuthType,
    /// Username, if authentication is wanted.
    pub username: Option<String>,
    /// Password for password-based mechanisms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Alias of the TLS client certificate to present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_alias: Option<String>,
}

impl ServerSettings {
    /// Creates settings for `host` using the default port of `security` and
    /// no authentication.
    #[must_use]
    pub fn new(host: impl Into<String>, security: ConnectionSecurity) -> Self {
        Self {
            host: host.into(),
            port: security.default_port(),
            connection_security: security,
            auth_type: AuthType::None,
            username: None,
            password: None,
            client_certificate_alias: None,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the authentication type and credentials.
    #[must_use]
    pub fn with_auth(
        mut self,
        auth_type: AuthType,
        username: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        self.auth_type = auth_type;
        self.username = Some(username.into());
        self.password = password;
        self
    }

    /// Sets the client certificate alias.
    #[must_use]
    pub fn with_client_certificate_alias(mut self, alias: impl Into<String>) -> Self {
        self.client_certificate_alias = Some(alias.into());
        self
    }
}

impl fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connection_security", &self.connection_security)
            .field("auth_type", &self.auth_type)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[omitted]"))
            .field("client_certificate_alias", &self.client_certificate_alias)
            .finish()
    }
}

/// Timeouts and logging switches of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Timeout for reading a reply.
    pub read_timeout: Duration,
    /// Timeout for the reply after the message data.
    pub data_timeout: Duration,
    /// Timeout for fetching an `OAuth2` token.
    pub token_timeout: Duration,
    /// Log every protocol line at trace level.
    pub log_protocol: bool,
    /// Include credentials in protocol logs.
    pub log_sensitive: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            data_timeout: Duration::from_secs(5 * 60),
            token_timeout: courier_auth::OAUTH2_TIMEOUT,
            log_protocol: false,
            log_sensitive: false,
        }
    }
}

impl TransportConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }
}

/// Builder for transport configuration.
#[derive(Debug, Clone, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the reply timeout.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Sets the timeout for the reply after the message data.
    #[must_use]
    pub const fn data_timeout(mut self, timeout: Duration) -> Self {
        self.config.data_timeout = timeout;
        self
    }

    /// Sets the `OAuth2` token timeout.
    #[must_use]
    pub const fn token_timeout(mut self, timeout: Duration) -> Self {
        self.config.token_timeout = timeout;
        self
    }

    /// Enables protocol logging.
    #[must_use]
    pub const fn log_protocol(mut self, enabled: bool) -> Self {
        self.config.log_protocol = enabled;
        self
    }

    /// Enables logging of credentials. Only useful while debugging.
    #[must_use]
    pub const fn log_sensitive(mut self, enabled: bool) -> Self {
        self.config.log_sensitive = enabled;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> TransportConfig {
        self.config
    }
}
