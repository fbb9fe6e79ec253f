//! SMTP response parser.
//!
//! Replies are read byte by byte from a buffered input so a single reply is
//! never over-read:
//! - Single: `250 OK\r\n`
//! - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`
//! - Enhanced (RFC 2034): `550 5.1.1 No such user\r\n`
//!
//! Some popular servers advertise `ENHANCEDSTATUSCODES` and then omit the code,
//! or send text outside the allowed character set. Such violations are logged
//! and tolerated. Anything that makes the reply structure ambiguous is a hard
//! parser error.

mod ehlo;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{Error, Result};
use crate::types::{EnhancedStatusCode, Extensions, HelloResult, Reply, ReplyCode, StatusClass};

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const SPACE: u8 = b' ';
const DASH: u8 = b'-';
const HTAB: u8 = b'\t';
const DOT: u8 = b'.';

/// Reads SMTP replies from a buffered input.
///
/// The parser borrows the input for the duration of one read and keeps a copy
/// of the bytes consumed so far, dumped to the log on hard parser errors when
/// raw protocol logging is enabled.
pub struct ResponseParser<'a, R> {
    input: &'a mut R,
    log_buffer: Vec<u8>,
    raw_protocol_logging: bool,
}

impl<'a, R: AsyncBufRead + Unpin> ResponseParser<'a, R> {
    /// Creates a parser over `input`.
    pub const fn new(input: &'a mut R, raw_protocol_logging: bool) -> Self {
        Self {
            input,
            log_buffer: Vec::new(),
            raw_protocol_logging,
        }
    }

    /// Reads the server greeting.
    ///
    /// The domain in the greeting is not interpreted, and enhanced status
    /// codes are never parsed because the server has not advertised them yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] on malformed input or premature end of stream.
    pub async fn read_greeting(&mut self) -> Result<Reply> {
        self.read_response(false).await
    }

    /// Reads a generic reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] on malformed input or premature end of stream.
    pub async fn read_response(&mut self, enhanced_status_codes: bool) -> Result<Reply> {
        self.log_buffer.clear();

        let code = self.read_reply_code().await?;
        self.read_response_after_reply_code(code, enhanced_status_codes)
            .await
    }

    /// Reads the reply to `EHLO`.
    ///
    /// A 250 reply is parsed into extension keywords; any other reply is
    /// returned as [`HelloResult::Error`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] on malformed input or premature end of stream.
    pub async fn read_hello_response(&mut self) -> Result<HelloResult> {
        self.log_buffer.clear();

        let code = self.read_reply_code().await?;
        if code != ReplyCode::OK {
            let reply = self.read_response_after_reply_code(code, false).await?;
            return Ok(HelloResult::Error(reply));
        }

        // First line holds the domain and optional greeting, taken verbatim
        let mut texts = Vec::new();
        match self.peek_byte().await? {
            SPACE => {
                self.expect(SPACE).await?;
                let text = String::from_utf8_lossy(&self.read_until_end_of_line().await?)
                    .into_owned();
                self.expect_end_of_line().await?;

                return Ok(HelloResult::Hello {
                    reply: Reply::new(code, None, vec![text]),
                    keywords: Extensions::new(),
                });
            }
            DASH => {
                self.expect(DASH).await?;
                let text = String::from_utf8_lossy(&self.read_until_end_of_line().await?)
                    .into_owned();
                texts.push(text);
                self.expect_end_of_line().await?;
            }
            other => return Err(self.unexpected_character(other)),
        }

        let mut keywords = Extensions::new();
        loop {
            let current = self.read_reply_code().await?;
            if current != code {
                return Err(self.parser_error(&format!(
                    "Multi-line response with reply codes not matching: {code} != {current}"
                )));
            }

            let last = match self.peek_byte().await? {
                SPACE => true,
                DASH => false,
                other => return Err(self.unexpected_character(other)),
            };
            self.read_byte().await?;

            let line = self.read_ehlo_line().await?;
            add_ehlo_keyword(&line, &mut keywords);
            texts.push(line);
            self.expect_end_of_line().await?;

            if last {
                return Ok(HelloResult::Hello {
                    reply: Reply::new(code, None, texts),
                    keywords,
                });
            }
        }
    }

    async fn read_response_after_reply_code(
        &mut self,
        code: ReplyCode,
        enhanced_status_codes: bool,
    ) -> Result<Reply> {
        let mut texts = Vec::new();
        let mut enhanced_status_code = None;
        let mut first_line = true;

        loop {
            match self.peek_byte().await? {
                CR => {
                    self.expect_end_of_line().await?;
                    return Ok(Reply::new(code, enhanced_status_code, texts));
                }
                separator @ (SPACE | DASH) => {
                    self.expect(separator).await?;
                    let line = self.read_until_end_of_line().await?;

                    let mut text = line.as_slice();
                    if enhanced_status_codes {
                        let (current, rest) = read_enhanced_status_code(code, text);
                        if !first_line && current != enhanced_status_code {
                            return Err(self.parser_error(&format!(
                                "Multi-line response with enhanced status codes not matching: \
                                 {} != {}",
                                display_optional(enhanced_status_code),
                                display_optional(current)
                            )));
                        }
                        enhanced_status_code = current;
                        text = rest;
                    }
                    first_line = false;

                    let text = read_text_string(text);
                    if separator == DASH || !text.is_empty() {
                        texts.push(text);
                    }
                    self.expect_end_of_line().await?;

                    if separator == SPACE {
                        return Ok(Reply::new(code, enhanced_status_code, texts));
                    }

                    let current = self.read_reply_code().await?;
                    if current != code {
                        return Err(self.parser_error(&format!(
                            "Multi-line response with reply codes not matching: {code} != {current}"
                        )));
                    }
                }
                other => return Err(self.unexpected_character(other)),
            }
        }
    }

    async fn read_reply_code(&mut self) -> Result<ReplyCode> {
        let first = self.read_digit().await?;
        if !(2..=5).contains(&first) {
            return Err(self.parser_error(&format!("Unsupported 1st reply code digit: {first}")));
        }

        let second = self.read_digit().await?;
        if second > 5 {
            tracing::warn!(
                digit = second,
                "2nd digit of reply code outside of specified range (0..5)"
            );
        }

        let third = self.read_digit().await?;
        Ok(ReplyCode::new(
            u16::from(first) * 100 + u16::from(second) * 10 + u16::from(third),
        ))
    }

    async fn read_digit(&mut self) -> Result<u8> {
        let byte = self.read_byte().await?;
        if byte.is_ascii_digit() {
            Ok(byte - b'0')
        } else {
            Err(self.unexpected_character(byte))
        }
    }

    async fn read_ehlo_line(&mut self) -> Result<String> {
        let line = self.read_until_end_of_line().await?;
        if line.is_empty() {
            return Err(self.parser_error("EHLO line must not be empty"));
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Consumes bytes up to, but not including, the next CR.
    async fn read_until_end_of_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            let available = self.input.fill_buf().await?;
            if available.is_empty() {
                return Err(self.parser_error("Unexpected end of stream"));
            }

            let end = available.iter().position(|&b| b == CR);
            let taken = end.unwrap_or(available.len());
            line.extend_from_slice(&available[..taken]);
            self.log_buffer.extend_from_slice(&available[..taken]);
            self.input.consume(taken);

            if end.is_some() {
                return Ok(line);
            }
        }
    }

    async fn expect_end_of_line(&mut self) -> Result<()> {
        self.expect(CR).await?;
        self.expect(LF).await
    }

    async fn expect(&mut self, expected: u8) -> Result<()> {
        let byte = self.read_byte().await?;
        if byte == expected {
            Ok(())
        } else {
            Err(self.unexpected_character(byte))
        }
    }

    async fn peek_byte(&mut self) -> Result<u8> {
        let next = self.input.fill_buf().await?.first().copied();
        match next {
            Some(byte) => Ok(byte),
            None => Err(self.parser_error("Unexpected end of stream")),
        }
    }

    async fn read_byte(&mut self) -> Result<u8> {
        let byte = self.peek_byte().await?;
        self.input.consume(1);
        self.log_buffer.push(byte);
        Ok(byte)
    }

    fn unexpected_character(&self, byte: u8) -> Error {
        self.parser_error(&unexpected_character_message(byte))
    }

    fn parser_error(&self, message: &str) -> Error {
        if self.raw_protocol_logging {
            let data = String::from_utf8_lossy(&self.log_buffer).replace("\r\n", "\n");
            tracing::warn!("SMTP response data on parser error:\n{data}");
        }
        Error::Parse(message.to_string())
    }
}

fn add_ehlo_keyword(line: &str, keywords: &mut Extensions) {
    match ehlo::parse_ehlo_line(line) {
        Ok((keyword, parameters)) => {
            if !keywords.insert(&keyword, parameters) {
                tracing::warn!(
                    line,
                    "Ignoring EHLO keyword line: Same EHLO keyword present in more than one response line"
                );
            }
        }
        Err(reason) => tracing::warn!(line, "Ignoring EHLO keyword line: {reason}"),
    }
}

/// Decodes the text part of a line, logging grammar violations.
fn read_text_string(text: &[u8]) -> String {
    if text.is_empty() {
        tracing::warn!("'textstring' expected, but CR found instead");
    } else if text.iter().any(|&b| b != HTAB && !(32..=126).contains(&b)) {
        tracing::warn!("Text contains characters not allowed in 'textstring'");
    }
    String::from_utf8_lossy(text).into_owned()
}

/// Speculatively reads an enhanced status code from the start of `line`.
///
/// On failure nothing is consumed and the whole line is text.
fn read_enhanced_status_code(code: ReplyCode, line: &[u8]) -> (Option<EnhancedStatusCode>, &[u8]) {
    if !matches!(code.class(), 2 | 4 | 5) {
        return (None, line);
    }

    match parse_enhanced_status_code(code.class(), line) {
        Ok((status, consumed)) => (Some(status), &line[consumed..]),
        Err(reason) => {
            tracing::warn!("Error parsing enhanced status code: {reason}");
            (None, line)
        }
    }
}

/// Parses `class.subject.detail ` and returns the code with the number of
/// bytes it occupies, including the trailing space.
fn parse_enhanced_status_code(
    reply_class: u8,
    line: &[u8],
) -> std::result::Result<(EnhancedStatusCode, usize), String> {
    let mut cursor = LineCursor { line, pos: 0 };

    let class_byte = cursor.read()?;
    let class = match class_byte {
        b'2' | b'4' | b'5' => StatusClass::from_digit(class_byte - b'0'),
        _ => None,
    }
    .ok_or_else(|| unexpected_character_message(class_byte))?;
    if class.digit() != reply_class {
        return Err(format!(
            "Reply code doesn't match status code class: {reply_class} != {}",
            class.digit()
        ));
    }

    cursor.expect(DOT)?;
    let subject = cursor.read_one_to_three_digit_number()?;
    cursor.expect(DOT)?;
    let detail = cursor.read_one_to_three_digit_number()?;
    cursor.expect(SPACE)?;

    Ok((EnhancedStatusCode::new(class, subject, detail), cursor.pos))
}

struct LineCursor<'a> {
    line: &'a [u8],
    pos: usize,
}

impl LineCursor<'_> {
    fn peek(&self) -> Option<u8> {
        self.line.get(self.pos).copied()
    }

    fn read(&mut self) -> std::result::Result<u8, String> {
        let byte = self
            .peek()
            .ok_or_else(|| "Unexpected end of stream".to_string())?;
        self.pos += 1;
        Ok(byte)
    }

    fn expect(&mut self, expected: u8) -> std::result::Result<(), String> {
        let byte = self.read()?;
        if byte == expected {
            Ok(())
        } else {
            Err(unexpected_character_message(byte))
        }
    }

    fn read_digit(&mut self) -> std::result::Result<u16, String> {
        let byte = self.read()?;
        if byte.is_ascii_digit() {
            Ok(u16::from(byte - b'0'))
        } else {
            Err(unexpected_character_message(byte))
        }
    }

    fn read_one_to_three_digit_number(&mut self) -> std::result::Result<u16, String> {
        let mut number = self.read_digit()?;
        for _ in 0..2 {
            if self.peek().is_some_and(|b| b.is_ascii_digit()) {
                number = number * 10 + self.read_digit()?;
            }
        }
        Ok(number)
    }
}

fn unexpected_character_message(byte: u8) -> String {
    if (33..=126).contains(&byte) {
        format!("Unexpected character: {} ({byte})", char::from(byte))
    } else {
        format!("Unexpected character: ({byte})")
    }
}

fn display_optional(code: Option<EnhancedStatusCode>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}
