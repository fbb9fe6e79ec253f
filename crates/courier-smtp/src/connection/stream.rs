//! Byte streams and the factory that opens them.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore},
};

use crate::error::{Error, Result};

/// A bidirectional byte stream to an SMTP server.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {
    /// Returns the local address of the underlying socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is not connected.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Connection for TcpStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Self::local_addr(self)
    }
}

impl<S: Connection> Connection for tokio_rustls::client::TlsStream<S> {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.get_ref().0.local_addr()
    }
}

impl<S: Connection + ?Sized> Connection for Box<S> {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}

/// Opens sockets and wraps them in TLS.
///
/// The transport calls [`connect`](Self::connect) for every resolved address
/// and [`create_socket`](Self::create_socket) for implicit TLS and STARTTLS.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    /// Opens a plain TCP connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] or an I/O error.
    async fn connect(&self, addr: SocketAddr, timeout: Duration) -> Result<Box<dyn Connection>> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout(timeout))??;
        Ok(Box::new(stream))
    }

    /// Wraps `stream` in TLS for `host`, presenting the client certificate
    /// registered under `client_certificate_alias`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails or the alias is unknown.
    async fn create_socket(
        &self,
        stream: Box<dyn Connection>,
        host: &str,
        port: u16,
        client_certificate_alias: Option<&str>,
    ) -> Result<Box<dyn Connection>>;
}

struct ClientCertificate {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

/// rustls-backed socket factory trusting the webpki root certificates.
pub struct TlsSocketFactory {
    roots: Arc<RootCertStore>,
    client_certificates: HashMap<String, ClientCertificate>,
}

impl TlsSocketFactory {
    /// Creates a factory with the webpki root certificates and no client
    /// certificates.
    #[must_use]
    pub fn new() -> Self {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        Self::with_roots(roots)
    }

    /// Creates a factory trusting only `roots`.
    #[must_use]
    pub fn with_roots(roots: RootCertStore) -> Self {
        Self {
            roots: Arc::new(roots),
            client_certificates: HashMap::new(),
        }
    }

    /// Registers a client certificate chain and key under `alias`.
    pub fn add_client_certificate(
        &mut self,
        alias: impl Into<String>,
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) {
        self.client_certificates
            .insert(alias.into(), ClientCertificate { chain, key });
    }

    /// Registers a client certificate from PEM data under `alias`.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM data holds no certificate or no key.
    pub fn add_client_certificate_pem(
        &mut self,
        alias: impl Into<String>,
        mut certificate_pem: &[u8],
        mut key_pem: &[u8],
    ) -> Result<()> {
        let alias = alias.into();
        let chain = rustls_pemfile::certs(&mut certificate_pem).collect::<io::Result<Vec<_>>>()?;
        if chain.is_empty() {
            return Err(Error::Certificate(format!(
                "No certificate found for client certificate alias {alias}"
            )));
        }
        let key = rustls_pemfile::private_key(&mut key_pem)?.ok_or_else(|| {
            Error::Certificate(format!("No private key found for client certificate alias {alias}"))
        })?;

        self.add_client_certificate(alias, chain, key);
        Ok(())
    }

    fn client_config(&self, client_certificate_alias: Option<&str>) -> Result<ClientConfig> {
        let builder = ClientConfig::builder().with_root_certificates(Arc::clone(&self.roots));

        let Some(alias) = client_certificate_alias else {
            return Ok(builder.with_no_client_auth());
        };
        let certificate = self.client_certificates.get(alias).ok_or_else(|| {
            Error::Certificate(format!("Unknown client certificate alias: {alias}"))
        })?;

        Ok(builder.with_client_auth_cert(certificate.chain.clone(), certificate.key.clone_key())?)
    }
}

impl Default for TlsSocketFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TlsSocketFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSocketFactory")
            .field("roots", &self.roots.len())
            .field("client_certificates", &self.client_certificates.keys())
            .finish()
    }
}

#[async_trait]
impl SocketFactory for TlsSocketFactory {
    async fn create_socket(
        &self,
        stream: Box<dyn Connection>,
        host: &str,
        port: u16,
        client_certificate_alias: Option<&str>,
    ) -> Result<Box<dyn Connection>> {
        let config = self.client_config(client_certificate_alias)?;
        let server_name = ServerName::try_from(host.to_string())?;

        tracing::debug!(host, port, "Starting TLS handshake");
        let stream = TlsConnector::from(Arc::new(config))
            .connect(server_name, stream)
            .await
            .map_err(handshake_error)?;
        Ok(Box::new(stream))
    }
}

/// Surfaces certificate rejections separately from other handshake failures.
fn handshake_error(error: io::Error) -> Error {
    let rejected = error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|inner| matches!(inner, rustls::Error::InvalidCertificate(_)));

    if rejected {
        Error::Certificate(error.to_string())
    } else {
        Error::Io(error)
    }
}
