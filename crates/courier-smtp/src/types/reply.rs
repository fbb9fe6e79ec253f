//! SMTP reply types.

use std::fmt;

use super::Extensions;

/// SMTP reply from server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code (e.g., 250).
    pub code: ReplyCode,
    /// Enhanced status code (RFC 2034), if the server sent one.
    pub enhanced_status_code: Option<EnhancedStatusCode>,
    /// Reply text, one entry per line.
    pub texts: Vec<String>,
}

impl Reply {
    /// Creates a new reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec is not const-compatible
    pub fn new(
        code: ReplyCode,
        enhanced_status_code: Option<EnhancedStatusCode>,
        texts: Vec<String>,
    ) -> Self {
        Self {
            code,
            enhanced_status_code,
            texts,
        }
    }

    /// Returns true for 4xx and 5xx replies.
    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.code.is_negative()
    }

    /// Returns true if this is a success reply (2xx).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns all text lines joined by a single space.
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.texts.join(" ")
    }

    /// Renders the reply the way it appeared on the wire, one line per text.
    ///
    /// With `omit_text` the text is replaced so credentials echoed by a server
    /// never reach the logs.
    #[must_use]
    pub fn to_log_string(&self, omit_text: bool, line_prefix: &str) -> String {
        let enhanced = self
            .enhanced_status_code
            .map(|esc| format!("{esc} "))
            .unwrap_or_default();

        if self.texts.is_empty() {
            return format!("{line_prefix}{}", self.code);
        }

        let last = self.texts.len() - 1;
        self.texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let separator = if i == last { ' ' } else { '-' };
                let text = if omit_text { "[omitted]" } else { text.as_str() };
                format!("{line_prefix}{}{separator}{enhanced}{text}", self.code)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the first digit of the code.
    #[must_use]
    pub const fn class(self) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        let class = (self.0 / 100) as u8;
        class
    }

    /// Returns true if this is a success code (2xx).
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true if this is an intermediate reply (3xx).
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.0 >= 300 && self.0 < 400
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }

    /// Returns true for 4xx and 5xx codes.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 >= 400
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Reply codes the transport acts on
impl ReplyCode {
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_SUCCEEDED: Self = Self(235);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available, closing transmission channel
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 450 Mailbox unavailable (busy)
    pub const MAILBOX_BUSY: Self = Self(450);
    /// 500 Syntax error, command unrecognized
    pub const SYNTAX_ERROR: Self = Self(500);
    /// 535 Authentication credentials invalid
    pub const AUTH_FAILED: Self = Self(535);
    /// 550 Mailbox unavailable (not found, access denied)
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
    /// 552 Exceeded storage allocation
    pub const EXCEEDED_STORAGE: Self = Self(552);
}

/// Class of an enhanced status code (RFC 3463).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    /// 2.x.x
    Success,
    /// 4.x.x
    PersistentTransientFailure,
    /// 5.x.x
    PermanentFailure,
}

impl StatusClass {
    /// Maps a class digit to a status class.
    #[must_use]
    pub const fn from_digit(digit: u8) -> Option<Self> {
        match digit {
            2 => Some(Self::Success),
            4 => Some(Self::PersistentTransientFailure),
            5 => Some(Self::PermanentFailure),
            _ => None,
        }
    }

    /// Returns the class digit.
    #[must_use]
    pub const fn digit(self) -> u8 {
        match self {
            Self::Success => 2,
            Self::PersistentTransientFailure => 4,
            Self::PermanentFailure => 5,
        }
    }
}

/// Enhanced status code (`class.subject.detail`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnhancedStatusCode {
    /// Status class, always matching the reply code's first digit.
    pub class: StatusClass,
    /// Subject, 0-999.
    pub subject: u16,
    /// Detail, 0-999.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Creates a new enhanced status code.
    #[must_use]
    pub const fn new(class: StatusClass, subject: u16, detail: u16) -> Self {
        Self {
            class,
            subject,
            detail,
        }
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class.digit(), self.subject, self.detail)
    }
}

/// Result of reading the reply to `EHLO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelloResult {
    /// The server accepted `EHLO` and listed its extensions.
    Hello {
        /// The raw reply.
        reply: Reply,
        /// Advertised extensions.
        keywords: Extensions,
    },
    /// The server rejected `EHLO`.
    Error(Reply),
}

impl HelloResult {
    /// Returns the underlying reply.
    #[must_use]
    pub const fn reply(&self) -> &Reply {
        match self {
            Self::Hello { reply, .. } | Self::Error(reply) => reply,
        }
    }
}
