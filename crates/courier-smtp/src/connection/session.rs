//! A single connection to the server and what it advertised.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::Sleep;

use super::Connection;
use crate::command::Command;
use crate::data::DataEncoder;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::parser::ResponseParser;
use crate::settings::TransportConfig;
use crate::types::{Extensions, HelloResult, Reply};

/// Capabilities taken from the `EHLO` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `8BITMIME` advertised.
    pub eight_bit_mime: bool,
    /// `ENHANCEDSTATUSCODES` advertised.
    pub enhanced_status_codes: bool,
    /// `PIPELINING` advertised.
    pub pipelining: bool,
    /// Limit from the `SIZE` keyword.
    pub max_message_size: Option<u64>,
    /// Every advertised keyword.
    pub extensions: Extensions,
}

impl Capabilities {
    /// Derives capabilities from advertised extensions.
    #[must_use]
    pub fn from_extensions(extensions: Extensions) -> Self {
        Self {
            eight_bit_mime: extensions.contains("8BITMIME"),
            enhanced_status_codes: extensions.contains("ENHANCEDSTATUSCODES"),
            pipelining: extensions.contains("PIPELINING"),
            max_message_size: extensions.max_message_size(),
            extensions,
        }
    }
}

/// An open connection with its negotiated capabilities.
///
/// Every command is written with a single write followed by a flush. Every
/// reply read is bounded by the current read timeout. Message data is
/// streamed instead, and the timeout bounds each write that makes no
/// progress.
pub struct Session {
    reader: BufReader<Box<dyn Connection>>,
    capabilities: Capabilities,
    read_timeout: Duration,
    log_protocol: bool,
    log_sensitive: bool,
}

impl Session {
    /// Wraps an open stream.
    #[must_use]
    pub fn new(stream: Box<dyn Connection>, config: &TransportConfig) -> Self {
        Self {
            reader: BufReader::new(stream),
            capabilities: Capabilities::default(),
            read_timeout: config.read_timeout,
            log_protocol: config.log_protocol,
            log_sensitive: config.log_sensitive,
        }
    }

    /// Unwraps the stream, e.g. to hand it to a TLS handshake.
    #[must_use]
    pub fn into_stream(self) -> Box<dyn Connection> {
        self.reader.into_inner()
    }

    /// Returns the local address of the socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is not connected.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.reader.get_ref().local_addr()
    }

    /// Returns the negotiated capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Replaces the negotiated capabilities.
    pub fn set_capabilities(&mut self, capabilities: Capabilities) {
        self.capabilities = capabilities;
    }

    /// Changes the timeout applied to subsequent reads.
    pub const fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    /// Reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, I/O failure or malformed input.
    pub async fn read_greeting(&mut self) -> Result<Reply> {
        let log_protocol = self.log_protocol;
        let reply = with_timeout(
            self.read_timeout,
            ResponseParser::new(&mut self.reader, log_protocol).read_greeting(),
        )
        .await?;
        self.log_reply(&reply, false);
        Ok(reply)
    }

    /// Sends `EHLO` and reads the reply.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, I/O failure or malformed input.
    pub async fn ehlo(&mut self, hostname: &str) -> Result<HelloResult> {
        self.write_command(&Command::Ehlo {
            hostname: hostname.to_string(),
        })
        .await?;

        let log_protocol = self.log_protocol;
        let result = with_timeout(
            self.read_timeout,
            ResponseParser::new(&mut self.reader, log_protocol).read_hello_response(),
        )
        .await?;
        self.log_reply(result.reply(), false);
        Ok(result)
    }

    /// Sends a command and reads its reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegativeReply`] for 4xx and 5xx replies.
    pub async fn execute(&mut self, command: &Command) -> Result<Reply> {
        self.write_command(command).await?;
        let reply = self.read_reply(command.is_sensitive()).await?;
        if reply.is_negative() {
            return Err(Error::negative_reply(&reply));
        }
        Ok(reply)
    }

    /// Sends all commands back to back, then reads one reply per command.
    ///
    /// Every reply is read before the first negative one is reported, so the
    /// connection stays in sync.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegativeReply`] for the first 4xx or 5xx reply.
    pub async fn execute_pipelined(&mut self, commands: &[Command]) -> Result<()> {
        for command in commands {
            self.write_command(command).await?;
        }

        let mut first_negative = None;
        for command in commands {
            let reply = self.read_reply(command.is_sensitive()).await?;
            if reply.is_negative() && first_negative.is_none() {
                first_negative = Some(reply);
            }
        }

        match first_negative {
            Some(reply) => Err(Error::negative_reply(&reply)),
            None => Ok(()),
        }
    }

    /// Streams the message through the data encoder.
    ///
    /// The read timeout applies to every stalled write, not to the whole
    /// message, so a slow upload that keeps making progress never times out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when a write makes no progress in time and
    /// [`Error::Io`] on any other failure.
    pub async fn write_message(&mut self, message: &dyn Message) -> Result<()> {
        if self.log_protocol {
            tracing::trace!("SMTP >>> [message data]");
        }

        let timeout = self.read_timeout;
        let map_err = |e: io::Error| {
            if e.kind() == io::ErrorKind::TimedOut {
                Error::Timeout(timeout)
            } else {
                Error::Io(e)
            }
        };

        let mut encoder = DataEncoder::new(WriteTimeout::new(self.reader.get_mut(), timeout));
        message.write_to(&mut encoder).await.map_err(map_err)?;
        encoder.finish().await.map_err(map_err)?;
        Ok(())
    }

    /// Sends `QUIT` without waiting for the reply and shuts the stream down.
    ///
    /// Failures are ignored.
    pub async fn quit(&mut self) {
        if let Err(e) = self.write_command(&Command::Quit).await {
            tracing::debug!(error = %e, "Unable to send QUIT");
        }
        let _ = tokio::time::timeout(self.read_timeout, self.reader.get_mut().shutdown()).await;
    }

    async fn write_command(&mut self, command: &Command) -> Result<()> {
        if self.log_protocol {
            tracing::trace!("SMTP >>> {}", command.to_log_string(self.log_sensitive));
        }

        let line = command.serialize();
        let stream = self.reader.get_mut();
        with_timeout(self.read_timeout, async {
            stream.write_all(&line).await?;
            stream.flush().await?;
            Ok::<_, Error>(())
        })
        .await
    }

    async fn read_reply(&mut self, sensitive: bool) -> Result<Reply> {
        let log_protocol = self.log_protocol;
        let enhanced = self.capabilities.enhanced_status_codes;
        let reply = with_timeout(
            self.read_timeout,
            ResponseParser::new(&mut self.reader, log_protocol).read_response(enhanced),
        )
        .await?;
        self.log_reply(&reply, sensitive);
        Ok(reply)
    }

    fn log_reply(&self, reply: &Reply, sensitive: bool) {
        if self.log_protocol {
            let omit_text = sensitive && !self.log_sensitive;
            tracing::trace!("{}", reply.to_log_string(omit_text, "SMTP <<< "));
        }
    }
}

async fn with_timeout<T>(duration: Duration, future: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| Error::Timeout(duration))?
}

/// Fails a write, flush or shutdown once the inner writer has made no
/// progress for the whole timeout.
struct WriteTimeout<W> {
    inner: W,
    timeout: Duration,
    stalled: Option<Pin<Box<Sleep>>>,
}

impl<W: AsyncWrite + Unpin> WriteTimeout<W> {
    const fn new(inner: W, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            stalled: None,
        }
    }

    fn check<T>(&mut self, cx: &mut Context<'_>, poll: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
        if poll.is_ready() {
            self.stalled = None;
            return poll;
        }

        let timeout = self.timeout;
        let stalled = self
            .stalled
            .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
        if stalled.as_mut().poll(cx).is_ready() {
            self.stalled = None;
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "write made no progress",
            )));
        }
        Poll::Pending
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for WriteTimeout<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        this.check(cx, poll)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        this.check(cx, poll)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_shutdown(cx);
        this.check(cx, poll)
    }
}
