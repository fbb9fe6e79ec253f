//! SMTP command builder.

use crate::types::AuthMechanism;

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname or address literal
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname or address literal
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: AuthMechanism,
        /// Initial response (optional, for SASL-IR)
        initial_response: Option<String>,
    },
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender address
        from: String,
        /// Append `BODY=8BITMIME`
        eight_bit_mime: bool,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: String,
    },
    /// DATA - Begin message data
    Data,
    /// QUIT - Close connection
    Quit,
    /// SASL continuation response carrying credentials
    SaslResponse(String),
    /// Any other line, such as the `.` terminating message data
    Raw(String),
}

impl Command {
    /// Serializes the command to bytes, CRLF included.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.line().into_bytes();
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns true if the command carries credentials.
    #[must_use]
    pub const fn is_sensitive(&self) -> bool {
        matches!(
            self,
            Self::SaslResponse(_)
                | Self::Auth {
                    initial_response: Some(_),
                    ..
                }
        )
    }

    /// Renders the command for protocol logs.
    ///
    /// Credentials are replaced unless `log_sensitive` is set.
    #[must_use]
    pub fn to_log_string(&self, log_sensitive: bool) -> String {
        if log_sensitive || !self.is_sensitive() {
            return self.line();
        }

        match self {
            Self::Auth { mechanism, .. } => format!("AUTH {mechanism} [omitted]"),
            _ => "[omitted]".to_string(),
        }
    }

    fn line(&self) -> String {
        match self {
            Self::Helo { hostname } => format!("HELO {hostname}"),
            Self::Ehlo { hostname } => format!("EHLO {hostname}"),
            Self::StartTls => "STARTTLS".to_string(),
            Self::Auth {
                mechanism,
                initial_response,
            } => match initial_response {
                Some(response) => format!("AUTH {mechanism} {response}"),
                None => format!("AUTH {mechanism}"),
            },
            Self::MailFrom {
                from,
                eight_bit_mime,
            } => {
                if *eight_bit_mime {
                    format!("MAIL FROM:<{from}> BODY=8BITMIME")
                } else {
                    format!("MAIL FROM:<{from}>")
                }
            }
            Self::RcptTo { to } => format!("RCPT TO:<{to}>"),
            Self::Data => "DATA".to_string(),
            Self::Quit => "QUIT".to_string(),
            Self::SaslResponse(line) | Self::Raw(line) => line.clone(),
        }
    }
}
