//! End-to-end transport tests against a scripted server.

#![allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use courier_auth::{Token, TokenProvider};
use courier_smtp::{
    AuthType, Connection, ConnectionSecurity, Error, Message, OutgoingMessage, RecipientType,
    ReplyCode, ServerSettings, SmtpTransport, SocketFactory, State, TransportConfig,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

// ----------------------------------------------------------------------------
// Scripted server
// ----------------------------------------------------------------------------

#[derive(Debug)]
enum Step {
    /// A line the client must send, without CRLF.
    Expect(String),
    /// Bytes the server sends.
    Output(Vec<u8>),
    /// The server never answers.
    Stall,
}

#[derive(Default)]
struct Script {
    steps: VecDeque<Step>,
    partial_line: Vec<u8>,
    received: Vec<String>,
    errors: Vec<String>,
    shutdown: bool,
}

#[derive(Clone, Default)]
struct MockServer {
    script: Arc<Mutex<Script>>,
}

impl MockServer {
    fn new() -> Self {
        Self::default()
    }

    fn output(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");
        self.script.lock().unwrap().steps.push_back(Step::Output(bytes));
    }

    fn expect(&self, line: &str) {
        self.script
            .lock()
            .unwrap()
            .steps
            .push_back(Step::Expect(line.to_string()));
    }

    fn stall(&self) {
        self.script.lock().unwrap().steps.push_back(Step::Stall);
    }

    fn expect_quit(&self) {
        self.expect("QUIT");
    }

    /// Greeting and a successful EHLO advertising `keywords`.
    fn greet(&self, keywords: &[&str]) {
        self.output("220 localhost Simple Mail Transfer Service Ready");
        self.ehlo(keywords);
    }

    fn ehlo(&self, keywords: &[&str]) {
        self.expect("EHLO [127.0.0.1]");
        if keywords.is_empty() {
            self.output("250 localhost Hello client.localdomain");
            return;
        }
        self.output("250-localhost Hello client.localdomain");
        for (i, keyword) in keywords.iter().enumerate() {
            let separator = if i + 1 == keywords.len() { ' ' } else { '-' };
            self.output(&format!("250{separator}{keyword}"));
        }
    }

    fn accept_data(&self, lines: &[&str]) {
        self.expect("DATA");
        self.output("354 End data with <CR><LF>.<CR><LF>");
        for line in lines {
            self.expect(line);
        }
        self.expect(".");
        self.output("250 OK: queued as 12345");
    }

    fn received(&self) -> Vec<String> {
        self.script.lock().unwrap().received.clone()
    }

    /// Asserts the whole script ran and the connection was shut down.
    fn verify(&self) {
        let script = self.script.lock().unwrap();
        assert!(script.errors.is_empty(), "unexpected client input: {:?}", script.errors);
        assert!(script.steps.is_empty(), "script not finished: {:?}", script.steps);
        assert!(script.shutdown, "connection was not shut down");
    }

    fn stream(&self) -> MockStream {
        MockStream {
            script: Arc::clone(&self.script),
        }
    }
}

struct MockStream {
    script: Arc<Mutex<Script>>,
}

impl AsyncRead for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut script = self.script.lock().unwrap();
        match script.steps.front_mut() {
            Some(Step::Output(bytes)) => {
                let n = bytes.len().min(buf.remaining());
                buf.put_slice(&bytes[..n]);
                bytes.drain(..n);
                if bytes.is_empty() {
                    script.steps.pop_front();
                }
                Poll::Ready(Ok(()))
            }
            Some(Step::Stall) => Poll::Pending,
            // Client reads while the server expects input: end of stream
            _ => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut script = self.script.lock().unwrap();
        script.partial_line.extend_from_slice(buf);

        while let Some(end) = script.partial_line.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = script.partial_line.drain(..end + 2).collect();
            let line = String::from_utf8_lossy(&line[..end]).into_owned();
            script.received.push(line.clone());

            match script.steps.pop_front() {
                Some(Step::Expect(expected)) if expected == line => {}
                other => script
                    .errors
                    .push(format!("expected {other:?}, got {line:?}")),
            }
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.script.lock().unwrap().shutdown = true;
        Poll::Ready(Ok(()))
    }
}

impl Connection for MockStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 50000)))
    }
}

/// Hands out streams to the scripted server; TLS is a no-op.
struct MockSocketFactory {
    server: MockServer,
    connects: AtomicUsize,
    upgrades: AtomicUsize,
}

impl MockSocketFactory {
    fn new(server: &MockServer) -> Arc<Self> {
        Arc::new(Self {
            server: server.clone(),
            connects: AtomicUsize::new(0),
            upgrades: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SocketFactory for MockSocketFactory {
    async fn connect(
        &self,
        _addr: SocketAddr,
        _timeout: Duration,
    ) -> courier_smtp::Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.server.stream()))
    }

    async fn create_socket(
        &self,
        stream: Box<dyn Connection>,
        host: &str,
        _port: u16,
        _client_certificate_alias: Option<&str>,
    ) -> courier_smtp::Result<Box<dyn Connection>> {
        assert_eq!(host, "127.0.0.1");
        self.upgrades.fetch_add(1, Ordering::SeqCst);
        Ok(stream)
    }
}

/// Returns `oldToken` until invalidated, then `newToken`.
struct MockTokenProvider {
    tokens: Vec<&'static str>,
    current: AtomicUsize,
    invalidations: AtomicUsize,
}

impl MockTokenProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            tokens: vec!["oldToken", "newToken"],
            current: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
        })
    }

    fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for MockTokenProvider {
    async fn token(&self, _timeout: Duration) -> courier_auth::Result<Token> {
        let index = self.current.load(Ordering::SeqCst);
        self.tokens
            .get(index)
            .map(|token| Token::new(*token))
            .ok_or_else(|| courier_auth::Error::token_unavailable("no more tokens"))
    }

    fn invalidate_token(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.current.fetch_add(1, Ordering::SeqCst);
    }
}

/// A message the transport size-checks before sending.
struct MessageWithAttachment(OutgoingMessage);

#[async_trait]
impl Message for MessageWithAttachment {
    fn from_address(&self) -> &str {
        self.0.from_address()
    }

    fn recipients(&self, recipient_type: RecipientType) -> Vec<String> {
        self.0.recipients(recipient_type)
    }

    fn remove_header(&mut self, name: &str) {
        self.0.remove_header(name);
    }

    fn has_attachments(&self) -> bool {
        true
    }

    fn calculate_size(&self) -> u64 {
        self.0.calculate_size()
    }

    async fn write_to(&self, out: &mut (dyn AsyncWrite + Send + Unpin)) -> io::Result<()> {
        self.0.write_to(out).await
    }
}

/// Collects formatted log output.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

const XOAUTH2_OLD_TOKEN: &str = "dXNlcj11c2VyAWF1dGg9QmVhcmVyIG9sZFRva2VuAQE=";
const XOAUTH2_NEW_TOKEN: &str = "dXNlcj11c2VyAWF1dGg9QmVhcmVyIG5ld1Rva2VuAQE=";

const MESSAGE_DATA: &[&str] = &[
    "From: user@localhost",
    "To: user2@localhost",
    "Subject: subject",
    "MIME-Version: 1.0",
    "Content-Type: text/plain; charset=utf-8",
    "Content-Transfer-Encoding: 8bit",
    "",
    "Message body",
];

fn settings(security: ConnectionSecurity) -> ServerSettings {
    ServerSettings::new("127.0.0.1", security)
}

fn password_settings(auth_type: AuthType) -> ServerSettings {
    settings(ConnectionSecurity::None).with_auth(auth_type, "user", Some("password".into()))
}

fn transport(server: &MockServer, settings: ServerSettings) -> SmtpTransport {
    SmtpTransport::new(settings, MockSocketFactory::new(server), None)
}

fn xoauth2_transport(server: &MockServer, provider: &Arc<MockTokenProvider>) -> SmtpTransport {
    let settings = settings(ConnectionSecurity::None).with_auth(AuthType::XOAuth2, "user", None);
    let provider: Arc<dyn TokenProvider> = provider.clone();
    SmtpTransport::new(settings, MockSocketFactory::new(server), Some(provider))
}

fn message() -> OutgoingMessage {
    OutgoingMessage::new("user@localhost", "subject", "Message body").to("user2@localhost")
}

fn challenge(json: &str) -> String {
    format!("334 {}", STANDARD.encode(json))
}

fn expect_plain_auth(server: &MockServer) {
    server.expect("AUTH PLAIN AHVzZXIAcGFzc3dvcmQ=");
    server.output("235 2.7.0 Authentication successful");
}

// ----------------------------------------------------------------------------
// Authentication
// ----------------------------------------------------------------------------

#[tokio::test]
async fn plain_auth_then_send() {
    let server = MockServer::new();
    server.greet(&["AUTH PLAIN LOGIN"]);
    expect_plain_auth(&server);
    server.expect("MAIL FROM:<user@localhost>");
    server.output("250 OK");
    server.expect("RCPT TO:<user2@localhost>");
    server.output("250 OK");
    server.accept_data(MESSAGE_DATA);
    server.expect_quit();

    let mut transport = transport(&server, password_settings(AuthType::Plain));
    transport.send_message(&mut message()).await.unwrap();

    server.verify();
    assert_eq!(transport.state(), State::Closed);
    assert_eq!(server.received().last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn login_when_plain_is_not_offered() {
    let server = MockServer::new();
    server.greet(&["AUTH LOGIN"]);
    server.expect("AUTH LOGIN");
    server.output("334 VXNlcm5hbWU6");
    server.expect("dXNlcg==");
    server.output("334 UGFzc3dvcmQ6");
    server.expect("cGFzc3dvcmQ=");
    server.output("235 2.7.0 Authentication successful");
    server.expect_quit();

    let mut transport = transport(&server, password_settings(AuthType::Plain));
    transport.check_settings().await.unwrap();

    server.verify();
}

#[tokio::test]
async fn plain_and_login_unavailable() {
    let server = MockServer::new();
    server.greet(&["AUTH CRAM-MD5"]);
    server.expect_quit();

    let mut transport = transport(&server, password_settings(AuthType::Login));
    let err = transport.check_settings().await.unwrap_err();

    assert!(matches!(err, Error::MechanismUnavailable(_)), "{err:?}");
    server.verify();
}

#[tokio::test]
async fn cram_md5() {
    let server = MockServer::new();
    server.greet(&["AUTH CRAM-MD5"]);
    server.expect("AUTH CRAM-MD5");
    server.output("334 PDI0NjA5LjEwNDc5MTQwNDZAbG9jYWxob3N0Pg==");
    server.expect("dXNlciAyZDBlNTcwYzZlYWI0ZjY3ZDUyZmFkN2Q1NGExZDJhYQ==");
    server.output("235 2.7.0 Authentication successful");
    server.expect_quit();

    let mut transport = transport(&server, password_settings(AuthType::CramMd5));
    transport.check_settings().await.unwrap();

    server.verify();
}

#[tokio::test]
async fn cram_md5_with_multiline_challenge() {
    let server = MockServer::new();
    server.greet(&["AUTH CRAM-MD5"]);
    server.expect("AUTH CRAM-MD5");
    server.output("334-PDI0NjA5LjEwNDc5MTQwNDZAbG9jYWxob3N0Pg==");
    server.output("334 PDI0NjA5LjEwNDc5MTQwNDZAbG9jYWxob3N0Pg==");
    server.expect_quit();

    let mut transport = transport(&server, password_settings(AuthType::CramMd5));
    let err = transport.check_settings().await.unwrap_err();

    assert!(
        matches!(&err, Error::Protocol(message) if message == "Unable to negotiate CRAM-MD5"),
        "{err:?}"
    );
    server.verify();
}

#[tokio::test]
async fn automatic_without_encryption_uses_cram_md5() {
    let server = MockServer::new();
    server.greet(&["AUTH PLAIN LOGIN CRAM-MD5"]);
    server.expect("AUTH CRAM-MD5");
    server.output("334 PDI0NjA5LjEwNDc5MTQwNDZAbG9jYWxob3N0Pg==");
    server.expect("dXNlciAyZDBlNTcwYzZlYWI0ZjY3ZDUyZmFkN2Q1NGExZDJhYQ==");
    server.output("235 2.7.0 Authentication successful");
    server.expect_quit();

    let mut transport = transport(&server, password_settings(AuthType::Automatic));
    transport.check_settings().await.unwrap();

    server.verify();
}

#[tokio::test]
async fn automatic_without_encryption_never_sends_password() {
    let server = MockServer::new();
    server.greet(&["AUTH PLAIN LOGIN"]);
    server.expect_quit();

    let mut transport = transport(&server, password_settings(AuthType::Automatic));
    let err = transport.check_settings().await.unwrap_err();

    assert!(matches!(err, Error::MechanismUnavailable(_)), "{err:?}");
    server.verify();
}

#[tokio::test]
async fn rejected_credentials() {
    let server = MockServer::new();
    server.greet(&["ENHANCEDSTATUSCODES", "AUTH PLAIN LOGIN"]);
    server.expect("AUTH PLAIN AHVzZXIAcGFzc3dvcmQ=");
    server.output("535 5.7.8 Authentication failed");
    server.expect_quit();

    let mut transport = transport(&server, password_settings(AuthType::Plain));
    let err = transport.check_settings().await.unwrap_err();

    match &err {
        Error::AuthenticationFailed {
            mechanism,
            server_message,
        } => {
            assert_eq!(*mechanism, "PLAIN");
            assert_eq!(server_message, "Authentication failed");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.reply_code(), Some(ReplyCode::AUTH_FAILED));
    assert!(err.is_permanent());
    server.verify();
}

#[tokio::test]
async fn external_not_offered() {
    let server = MockServer::new();
    server.greet(&["AUTH PLAIN LOGIN"]);
    server.expect_quit();

    let settings = settings(ConnectionSecurity::None).with_auth(AuthType::External, "user", None);
    let mut transport = transport(&server, settings);
    let err = transport.check_settings().await.unwrap_err();

    assert!(err.is_certificate_error(), "{err:?}");
    server.verify();
}

#[tokio::test]
async fn external() {
    let server = MockServer::new();
    server.greet(&["AUTH EXTERNAL"]);
    server.expect("AUTH EXTERNAL dXNlcg==");
    server.output("235 2.7.0 Authentication successful");
    server.expect_quit();

    let settings = settings(ConnectionSecurity::None).with_auth(AuthType::External, "user", None);
    let mut transport = transport(&server, settings);
    transport.check_settings().await.unwrap();

    server.verify();
}

#[tokio::test]
async fn no_credentials_skips_authentication() {
    let server = MockServer::new();
    server.greet(&["AUTH PLAIN LOGIN"]);
    server.expect_quit();

    let settings =
        settings(ConnectionSecurity::None).with_auth(AuthType::Plain, "user", None);
    let mut transport = transport(&server, settings);
    transport.check_settings().await.unwrap();

    server.verify();
}

// ----------------------------------------------------------------------------
// XOAUTH2
// ----------------------------------------------------------------------------

#[tokio::test]
async fn xoauth2() {
    let server = MockServer::new();
    server.greet(&["AUTH XOAUTH2"]);
    server.expect(&format!("AUTH XOAUTH2 {XOAUTH2_OLD_TOKEN}"));
    server.output("235 2.7.0 Accepted");
    server.expect_quit();

    let provider = MockTokenProvider::new();
    let mut transport = xoauth2_transport(&server, &provider);
    transport.check_settings().await.unwrap();

    server.verify();
    assert_eq!(provider.invalidations(), 0);
}

#[tokio::test]
async fn xoauth2_retries_after_bad_response_challenge() {
    let server = MockServer::new();
    server.greet(&["AUTH XOAUTH2"]);
    server.expect(&format!("AUTH XOAUTH2 {XOAUTH2_OLD_TOKEN}"));
    server.output(&challenge(
        r#"{"status":"400","schemes":"Bearer","scope":"https://mail.google.com/"}"#,
    ));
    server.expect("");
    server.output("535-5.7.1 Username and Password not accepted. Learn more at");
    server.output("535 5.7.1 http://support.google.com/mail/bin/answer.py?answer=14257");
    server.expect(&format!("AUTH XOAUTH2 {XOAUTH2_NEW_TOKEN}"));
    server.output("235 2.7.0 Accepted");
    server.expect_quit();

    let provider = MockTokenProvider::new();
    let mut transport = xoauth2_transport(&server, &provider);
    transport.check_settings().await.unwrap();

    server.verify();
    assert_eq!(provider.invalidations(), 1);
}

#[tokio::test]
async fn xoauth2_does_not_retry_after_unauthorized_challenge() {
    let server = MockServer::new();
    server.greet(&["AUTH XOAUTH2"]);
    server.expect(&format!("AUTH XOAUTH2 {XOAUTH2_OLD_TOKEN}"));
    server.output(&challenge(
        r#"{"status":"401","schemes":"bearer mac","scope":"https://mail.google.com/"}"#,
    ));
    server.expect("");
    server.output("535-5.7.1 Username and Password not accepted. Learn more at");
    server.output("535 5.7.1 http://support.google.com/mail/bin/answer.py?answer=14257");
    server.expect_quit();

    let provider = MockTokenProvider::new();
    let mut transport = xoauth2_transport(&server, &provider);
    let err = transport.check_settings().await.unwrap_err();

    assert!(
        matches!(err, Error::AuthenticationFailed { mechanism: "XOAUTH2", .. }),
        "{err:?}"
    );
    server.verify();
    assert_eq!(provider.invalidations(), 1);
}

#[tokio::test]
async fn xoauth2_retries_after_unparsable_challenge() {
    let server = MockServer::new();
    server.greet(&["AUTH XOAUTH2"]);
    server.expect(&format!("AUTH XOAUTH2 {XOAUTH2_OLD_TOKEN}"));
    server.output(&challenge("{invalid json"));
    server.expect("");
    server.output("535 5.7.1 Username and Password not accepted");
    server.expect(&format!("AUTH XOAUTH2 {XOAUTH2_NEW_TOKEN}"));
    server.output("235 2.7.0 Accepted");
    server.expect_quit();

    let provider = MockTokenProvider::new();
    let mut transport = xoauth2_transport(&server, &provider);
    transport.check_settings().await.unwrap();

    server.verify();
    assert_eq!(provider.invalidations(), 1);
}

#[tokio::test]
async fn xoauth2_retries_only_once() {
    let server = MockServer::new();
    server.greet(&["AUTH XOAUTH2"]);
    server.expect(&format!("AUTH XOAUTH2 {XOAUTH2_OLD_TOKEN}"));
    server.output("535 5.7.1 Username and Password not accepted");
    server.expect(&format!("AUTH XOAUTH2 {XOAUTH2_NEW_TOKEN}"));
    server.output("535 5.7.1 Username and Password not accepted");
    server.expect_quit();

    let provider = MockTokenProvider::new();
    let mut transport = xoauth2_transport(&server, &provider);
    let err = transport.check_settings().await.unwrap_err();

    assert!(matches!(err, Error::AuthenticationFailed { .. }), "{err:?}");
    server.verify();
    assert_eq!(provider.invalidations(), 2);
}

#[tokio::test]
async fn xoauth2_without_token_provider() {
    let server = MockServer::new();
    server.greet(&["AUTH XOAUTH2"]);
    server.expect_quit();

    let settings = settings(ConnectionSecurity::None).with_auth(AuthType::XOAuth2, "user", None);
    let mut transport = transport(&server, settings);
    let err = transport.check_settings().await.unwrap_err();

    assert!(matches!(err, Error::MechanismUnavailable(_)), "{err:?}");
    server.verify();
}

// ----------------------------------------------------------------------------
// Connection setup
// ----------------------------------------------------------------------------

#[tokio::test]
async fn negative_greeting() {
    let server = MockServer::new();
    server.output("421 localhost Service not available");
    server.expect_quit();

    let mut transport = transport(&server, password_settings(AuthType::Plain));
    let err = transport.check_settings().await.unwrap_err();

    assert_eq!(err.reply_code(), Some(ReplyCode::SERVICE_UNAVAILABLE));
    assert!(err.is_transient());
    server.verify();
}

#[tokio::test]
async fn falls_back_to_helo() {
    let server = MockServer::new();
    server.output("220 localhost Simple Mail Transfer Service Ready");
    server.expect("EHLO [127.0.0.1]");
    server.output("502 5.5.1 Unrecognized command.");
    server.expect("HELO [127.0.0.1]");
    server.output("250 localhost");
    server.expect_quit();

    let mut transport = transport(&server, settings(ConnectionSecurity::None));
    transport.check_settings().await.unwrap();

    server.verify();
}

#[tokio::test]
async fn rejected_helo_is_tolerated() {
    let server = MockServer::new();
    server.output("220 localhost Simple Mail Transfer Service Ready");
    server.expect("EHLO [127.0.0.1]");
    server.output("502 5.5.1 Unrecognized command.");
    server.expect("HELO [127.0.0.1]");
    server.output("502 5.5.1 Unrecognized command.");
    server.expect_quit();

    let mut transport = transport(&server, settings(ConnectionSecurity::None));
    transport.check_settings().await.unwrap();

    server.verify();
}

#[tokio::test]
async fn starttls_then_automatic_plain() {
    let server = MockServer::new();
    server.greet(&["STARTTLS"]);
    server.expect("STARTTLS");
    server.output("220 Ready to start TLS");
    server.ehlo(&["AUTH PLAIN LOGIN"]);
    expect_plain_auth(&server);
    server.expect_quit();

    let factory = MockSocketFactory::new(&server);
    let settings = settings(ConnectionSecurity::StartTls).with_auth(
        AuthType::Automatic,
        "user",
        Some("password".into()),
    );
    let mut transport = SmtpTransport::new(settings, factory.clone(), None);
    transport.check_settings().await.unwrap();

    server.verify();
    assert_eq!(factory.upgrades.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn starttls_not_offered() {
    let server = MockServer::new();
    server.greet(&["AUTH PLAIN LOGIN"]);
    server.expect_quit();

    let settings = settings(ConnectionSecurity::StartTls).with_auth(
        AuthType::Plain,
        "user",
        Some("password".into()),
    );
    let mut transport = transport(&server, settings);
    let err = transport.check_settings().await.unwrap_err();

    assert!(err.is_certificate_error(), "{err:?}");
    assert!(!server.received().iter().any(|line| line.starts_with("AUTH")));
    server.verify();
}

#[tokio::test]
async fn implicit_tls() {
    let server = MockServer::new();
    server.greet(&["AUTH PLAIN LOGIN"]);
    expect_plain_auth(&server);
    server.expect_quit();

    let factory = MockSocketFactory::new(&server);
    let settings = settings(ConnectionSecurity::SslTls).with_auth(
        AuthType::Automatic,
        "user",
        Some("password".into()),
    );
    let mut transport = SmtpTransport::new(settings, factory.clone(), None);
    transport.check_settings().await.unwrap();

    server.verify();
    assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
    assert_eq!(factory.upgrades.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn greeting_timeout() {
    let server = MockServer::new();
    server.stall();

    let config = TransportConfig::builder()
        .read_timeout(Duration::from_secs(5))
        .build();
    let mut transport = transport(&server, settings(ConnectionSecurity::None)).with_config(config);
    let err = transport.open().await.unwrap_err();

    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_secs(5)), "{err:?}");
    assert_eq!(transport.state(), State::Closed);
}

#[tokio::test]
async fn open_twice_is_rejected() {
    let server = MockServer::new();
    server.greet(&[]);
    server.expect_quit();

    let mut transport = transport(&server, settings(ConnectionSecurity::None));
    transport.open().await.unwrap();
    assert_eq!(transport.state(), State::Authenticated);
    assert!(transport.capabilities().is_some());

    let err = transport.open().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)), "{err:?}");

    transport.close().await;
    transport.close().await;
    server.verify();
}

async fn check_settings_logged(config: TransportConfig) -> String {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let server = MockServer::new();
    server.greet(&["AUTH PLAIN LOGIN"]);
    expect_plain_auth(&server);
    server.expect_quit();

    let mut transport =
        transport(&server, password_settings(AuthType::Plain)).with_config(config);
    transport.check_settings().await.unwrap();
    server.verify();

    logs.contents()
}

#[tokio::test]
async fn protocol_log_omits_credentials() {
    let config = TransportConfig::builder().log_protocol(true).build();
    let logs = check_settings_logged(config).await;

    assert!(logs.contains("SMTP >>> EHLO"), "{logs}");
    assert!(logs.contains("SMTP >>> AUTH PLAIN [omitted]"), "{logs}");
    assert!(logs.contains("SMTP <<< 235 [omitted]"), "{logs}");
    assert!(!logs.contains("AHVzZXIAcGFzc3dvcmQ="), "{logs}");
    assert!(!logs.contains("Authentication successful"), "{logs}");
}

#[tokio::test]
async fn protocol_log_includes_credentials_when_sensitive_logging_enabled() {
    let config = TransportConfig::builder()
        .log_protocol(true)
        .log_sensitive(true)
        .build();
    let logs = check_settings_logged(config).await;

    assert!(logs.contains("SMTP >>> AUTH PLAIN AHVzZXIAcGFzc3dvcmQ="), "{logs}");
    assert!(logs.contains("SMTP <<< 235 2.7.0 Authentication successful"), "{logs}");
}

#[tokio::test]
async fn protocol_log_disabled() {
    let logs = check_settings_logged(TransportConfig::default()).await;
    assert!(!logs.contains("SMTP >>>"), "{logs}");
    assert!(!logs.contains("SMTP <<<"), "{logs}");
}

// ----------------------------------------------------------------------------
// Sending
// ----------------------------------------------------------------------------

#[tokio::test]
async fn message_without_recipients_is_skipped() {
    let server = MockServer::new();
    let factory = MockSocketFactory::new(&server);
    let mut transport =
        SmtpTransport::new(settings(ConnectionSecurity::None), factory.clone(), None);

    let mut message = OutgoingMessage::new("user@localhost", "subject", "Message body");
    transport.send_message(&mut message).await.unwrap();

    assert_eq!(factory.connects.load(Ordering::SeqCst), 0);
    assert!(server.received().is_empty());
}

#[tokio::test]
async fn eight_bit_mime() {
    let server = MockServer::new();
    server.greet(&["8BITMIME"]);
    server.expect("MAIL FROM:<user@localhost> BODY=8BITMIME");
    server.output("250 OK");
    server.expect("RCPT TO:<user2@localhost>");
    server.output("250 OK");
    server.accept_data(MESSAGE_DATA);
    server.expect_quit();

    let mut transport = transport(&server, settings(ConnectionSecurity::None));
    transport.send_message(&mut message()).await.unwrap();

    server.verify();
}

#[tokio::test]
async fn recipients_deduplicated_and_bcc_header_removed() {
    let server = MockServer::new();
    server.greet(&[]);
    server.expect("MAIL FROM:<user@localhost>");
    server.output("250 OK");
    server.expect("RCPT TO:<user2@localhost>");
    server.output("250 OK");
    server.expect("RCPT TO:<user3@localhost>");
    server.output("250 OK");
    server.accept_data(&[
        "From: user@localhost",
        "To: user2@localhost",
        "Cc: user2@localhost",
        "Subject: subject",
        "MIME-Version: 1.0",
        "Content-Type: text/plain; charset=utf-8",
        "Content-Transfer-Encoding: 8bit",
        "",
        "..hidden line",
    ]);
    server.expect_quit();

    let mut message = OutgoingMessage::new("user@localhost", "subject", ".hidden line")
        .to("user2@localhost")
        .cc("user2@localhost")
        .bcc("user3@localhost");
    let mut transport = transport(&server, settings(ConnectionSecurity::None));
    transport.send_message(&mut message).await.unwrap();

    server.verify();
}

#[tokio::test]
async fn message_too_large() {
    let server = MockServer::new();
    server.greet(&["SIZE 100"]);
    server.expect_quit();

    let mut message = MessageWithAttachment(message());
    let mut transport = transport(&server, settings(ConnectionSecurity::None));
    let err = transport.send_message(&mut message).await.unwrap_err();

    match err {
        Error::MessageTooLarge { size, limit } => {
            assert_eq!(limit, 100);
            assert!(size > 100);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    server.verify();
}

#[tokio::test]
async fn size_is_only_checked_for_messages_with_attachments() {
    let server = MockServer::new();
    server.greet(&["SIZE 100"]);
    server.expect("MAIL FROM:<user@localhost>");
    server.output("250 OK");
    server.expect("RCPT TO:<user2@localhost>");
    server.output("250 OK");
    server.accept_data(MESSAGE_DATA);
    server.expect_quit();

    let mut transport = transport(&server, settings(ConnectionSecurity::None));
    transport.send_message(&mut message()).await.unwrap();

    server.verify();
}

#[tokio::test]
async fn pipelining_writes_envelope_before_reading() {
    let server = MockServer::new();
    server.greet(&["PIPELINING"]);
    server.expect("MAIL FROM:<user@localhost>");
    server.expect("RCPT TO:<user2@localhost>");
    server.expect("RCPT TO:<user3@localhost>");
    server.output("250 OK");
    server.output("250 OK");
    server.output("250 OK");
    server.accept_data(&[
        "From: user@localhost",
        "To: user2@localhost, user3@localhost",
        "Subject: subject",
        "MIME-Version: 1.0",
        "Content-Type: text/plain; charset=utf-8",
        "Content-Transfer-Encoding: 8bit",
        "",
        "Message body",
    ]);
    server.expect_quit();

    let mut message = message().to("user3@localhost");
    let mut transport = transport(&server, settings(ConnectionSecurity::None));
    transport.send_message(&mut message).await.unwrap();

    server.verify();
}

#[tokio::test]
async fn pipelining_reports_first_rejected_recipient() {
    let server = MockServer::new();
    server.greet(&["PIPELINING", "ENHANCEDSTATUSCODES"]);
    server.expect("MAIL FROM:<user@localhost>");
    server.expect("RCPT TO:<user2@localhost>");
    server.expect("RCPT TO:<user3@localhost>");
    server.output("250 2.1.0 Sender OK");
    server.output("550 5.1.1 No such user: user2@localhost");
    server.output("550 5.1.1 No such user: user3@localhost");
    server.expect_quit();

    let mut message = message().to("user3@localhost");
    let mut transport = transport(&server, settings(ConnectionSecurity::None));
    let err = transport.send_message(&mut message).await.unwrap_err();

    let Error::Send {
        entire_message_sent,
        source,
    } = &err
    else {
        panic!("unexpected error: {err:?}");
    };
    assert!(!entire_message_sent);
    match source.as_ref() {
        Error::NegativeReply {
            code,
            text,
            enhanced_status_code,
        } => {
            assert_eq!(*code, ReplyCode::MAILBOX_UNAVAILABLE);
            assert_eq!(text, "No such user: user2@localhost");
            assert_eq!(enhanced_status_code.as_ref().map(ToString::to_string).as_deref(), Some("5.1.1"));
        }
        other => panic!("unexpected source: {other:?}"),
    }
    assert!(err.is_permanent());
    server.verify();
}

#[tokio::test]
async fn rejected_recipient_without_pipelining() {
    let server = MockServer::new();
    server.greet(&[]);
    server.expect("MAIL FROM:<user@localhost>");
    server.output("250 OK");
    server.expect("RCPT TO:<user2@localhost>");
    server.output("550 No such user");
    server.expect_quit();

    let mut message = message().to("user3@localhost");
    let mut transport = transport(&server, settings(ConnectionSecurity::None));
    let err = transport.send_message(&mut message).await.unwrap_err();

    assert!(!err.entire_message_sent());
    assert_eq!(err.reply_code(), Some(ReplyCode::MAILBOX_UNAVAILABLE));
    server.verify();
}

#[tokio::test]
async fn data_rejected_before_message() {
    let server = MockServer::new();
    server.greet(&[]);
    server.expect("MAIL FROM:<user@localhost>");
    server.output("250 OK");
    server.expect("RCPT TO:<user2@localhost>");
    server.output("250 OK");
    server.expect("DATA");
    server.output("451 Try again later");
    server.expect_quit();

    let mut transport = transport(&server, settings(ConnectionSecurity::None));
    let err = transport.send_message(&mut message()).await.unwrap_err();

    assert!(!err.entire_message_sent());
    assert!(err.is_transient());
    server.verify();
}

#[tokio::test]
async fn message_rejected_after_data() {
    let server = MockServer::new();
    server.greet(&[]);
    server.expect("MAIL FROM:<user@localhost>");
    server.output("250 OK");
    server.expect("RCPT TO:<user2@localhost>");
    server.output("250 OK");
    server.expect("DATA");
    server.output("354 End data with <CR><LF>.<CR><LF>");
    for line in MESSAGE_DATA {
        server.expect(line);
    }
    server.expect(".");
    server.output("554 Message rejected");
    server.expect_quit();

    let mut transport = transport(&server, settings(ConnectionSecurity::None));
    let err = transport.send_message(&mut message()).await.unwrap_err();

    assert!(err.entire_message_sent());
    assert!(err.is_permanent());
    server.verify();
}

#[tokio::test]
async fn connection_errors_are_not_wrapped() {
    let server = MockServer::new();
    server.greet(&["AUTH PLAIN"]);
    server.expect("AUTH PLAIN AHVzZXIAcGFzc3dvcmQ=");
    server.output("535 Authentication failed");
    server.expect_quit();

    let mut transport = transport(&server, password_settings(AuthType::Plain));
    let err = transport.send_message(&mut message()).await.unwrap_err();

    assert!(matches!(err, Error::AuthenticationFailed { .. }), "{err:?}");
    assert!(!err.entire_message_sent());
    server.verify();
}
