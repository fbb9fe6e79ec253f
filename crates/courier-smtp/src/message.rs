//! Messages handed to the transport.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Recipient header a set of addresses comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipientType {
    /// `To`
    To,
    /// `Cc`
    Cc,
    /// `Bcc`
    Bcc,
}

/// A message the transport can send.
///
/// The transport only needs the envelope addresses and the serialized
/// message; MIME structure is the implementor's business.
#[async_trait]
pub trait Message: Send + Sync {
    /// Envelope sender used in `MAIL FROM`.
    fn from_address(&self) -> &str;

    /// Addresses listed in the given recipient header.
    fn recipients(&self, recipient_type: RecipientType) -> Vec<String>;

    /// Removes every header named `name` (case-insensitive).
    fn remove_header(&mut self, name: &str);

    /// Returns true if the message has attachments.
    ///
    /// The transport only computes the size of such messages before sending.
    fn has_attachments(&self) -> bool;

    /// Returns the serialized size in bytes.
    fn calculate_size(&self) -> u64;

    /// Writes the serialized message, headers and body.
    ///
    /// Large messages should be written in several calls so the transport
    /// can encode and send them without holding the whole message twice.
    ///
    /// # Errors
    ///
    /// Returns an error if `out` fails.
    async fn write_to(&self, out: &mut (dyn AsyncWrite + Send + Unpin)) -> io::Result<()>;
}

/// A plain-text message with a small set of headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// CC addresses.
    pub cc: Vec<String>,
    /// BCC addresses, never written to the message itself.
    pub bcc: Vec<String>,
    /// Additional headers in order, e.g. `Subject`.
    pub headers: Vec<(String, String)>,
    /// Plain text body.
    pub body: String,
    bcc_header: bool,
}

impl OutgoingMessage {
    /// Creates a new outgoing message.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            headers: vec![("Subject".to_string(), subject.into())],
            body: body.into(),
            bcc_header: true,
        }
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.to.push(recipient.into());
        self
    }

    /// Adds a CC recipient.
    #[must_use]
    pub fn cc(mut self, recipient: impl Into<String>) -> Self {
        self.cc.push(recipient.into());
        self
    }

    /// Adds a BCC recipient.
    #[must_use]
    pub fn bcc(mut self, recipient: impl Into<String>) -> Self {
        self.bcc.push(recipient.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Serializes the headers and the body.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::with_capacity(256 + self.body.len());
        push_header(&mut out, "From", &self.from);
        if !self.to.is_empty() {
            push_header(&mut out, "To", &self.to.join(", "));
        }
        if !self.cc.is_empty() {
            push_header(&mut out, "Cc", &self.cc.join(", "));
        }
        if self.bcc_header && !self.bcc.is_empty() {
            push_header(&mut out, "Bcc", &self.bcc.join(", "));
        }
        for (name, value) in &self.headers {
            push_header(&mut out, name, value);
        }
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        out.push_str("Content-Transfer-Encoding: 8bit\r\n");

        // Empty line between headers and body
        out.push_str("\r\n");
        out.push_str(&self.body);
        out.into_bytes()
    }
}

fn push_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

#[async_trait]
impl Message for OutgoingMessage {
    fn from_address(&self) -> &str {
        &self.from
    }

    fn recipients(&self, recipient_type: RecipientType) -> Vec<String> {
        match recipient_type {
            RecipientType::To => self.to.clone(),
            RecipientType::Cc => self.cc.clone(),
            RecipientType::Bcc => self.bcc.clone(),
        }
    }

    fn remove_header(&mut self, name: &str) {
        if name.eq_ignore_ascii_case("Bcc") {
            self.bcc_header = false;
        }
        self.headers.retain(|(header, _)| !header.eq_ignore_ascii_case(name));
    }

    fn has_attachments(&self) -> bool {
        false
    }

    fn calculate_size(&self) -> u64 {
        self.to_bytes().len() as u64
    }

    async fn write_to(&self, out: &mut (dyn AsyncWrite + Send + Unpin)) -> io::Result<()> {
        out.write_all(&self.to_bytes()).await
    }
}
