//! Encoding of message data sent after `DATA`.
//!
//! Bytes pass three stages in order:
//! 1. Line endings are normalized: bare CR and bare LF become CRLF.
//! 2. Lines longer than 998 octets are broken, after the last space where one
//!    exists, hard otherwise. A line starting with `.` is broken one octet
//!    earlier so it still fits once stuffed.
//! 3. Lines starting with `.` get an extra `.` (RFC 5321 section 4.5.2).

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Longest line content allowed, excluding CRLF.
pub const MAX_LINE_LENGTH: usize = 998;

/// Input bytes encoded per write before the output is drained.
const BATCH_SIZE: usize = 8 * 1024;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Writer applying SMTP data encoding to everything written to it.
///
/// At most one batch of encoded output is buffered; each write drains the
/// previous batch into the inner writer first.
///
/// Call [`finish`](Self::finish) after the last write so the final line is
/// terminated and everything is flushed.
#[derive(Debug)]
pub struct DataEncoder<W> {
    inner: W,
    line: Vec<u8>,
    pending_cr: bool,
    output: Vec<u8>,
    written: usize,
}

impl<W: AsyncWrite + Unpin> DataEncoder<W> {
    /// Creates an encoder writing to `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            line: Vec::with_capacity(MAX_LINE_LENGTH),
            pending_cr: false,
            output: Vec::with_capacity(BATCH_SIZE),
            written: 0,
        }
    }

    /// Terminates the last line with CRLF, if needed, flushes and returns the
    /// inner writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the inner writer fails.
    pub async fn finish(mut self) -> io::Result<W> {
        if self.pending_cr || !self.line.is_empty() {
            self.pending_cr = false;
            self.end_line();
        }
        self.flush().await?;
        Ok(self.inner)
    }

    fn push(&mut self, byte: u8) {
        if self.pending_cr {
            self.pending_cr = false;
            self.end_line();
            if byte == LF {
                return;
            }
        }

        match byte {
            CR => self.pending_cr = true,
            LF => self.end_line(),
            _ => {
                if self.line.len() >= self.line_limit() {
                    self.wrap_line();
                }
                self.line.push(byte);
            }
        }
    }

    fn line_limit(&self) -> usize {
        if self.line.first() == Some(&b'.') {
            MAX_LINE_LENGTH - 1
        } else {
            MAX_LINE_LENGTH
        }
    }

    fn wrap_line(&mut self) {
        match self.line.iter().rposition(|&b| b == b' ') {
            Some(space) => {
                let rest = self.line.split_off(space + 1);
                self.end_line();
                self.line = rest;
            }
            None => self.end_line(),
        }
    }

    fn end_line(&mut self) {
        if self.line.first() == Some(&b'.') {
            self.output.push(b'.');
        }
        self.output.extend_from_slice(&self.line);
        self.output.extend_from_slice(b"\r\n");
        self.line.clear();
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.written < self.output.len() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.output[self.written..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.written += n;
        }
        self.output.clear();
        self.written = 0;
        Poll::Ready(Ok(()))
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for DataEncoder<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;

        let n = buf.len().min(BATCH_SIZE);
        for &byte in &buf[..n] {
            this.push(byte);
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
