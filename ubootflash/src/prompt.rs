//! Console prompt matching.
//!
//! [`PromptMatcher`] reads the console one byte at a time and tests the
//! rolling buffer after every byte, so it never reads past the end of a
//! match. Whatever follows the match stays in the port for the next reader
//! (usually the YMODEM sender).

use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, trace};
use regex::bytes::Regex;

use crate::error::{Error, Result};
use crate::port::Port;
use crate::transport::Transport;

/// Upper bound on buffered console text while waiting for a match.
///
/// On overflow the older half is dropped.
pub const MAX_BUFFER: usize = 16 * 1024;

/// Prefix selecting a regular expression in [`Pattern::parse`].
pub const REGEX_PREFIX: &str = "re:";

/// Text to wait for on the console.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exact byte sequence.
    Literal(String),
    /// Regular expression over raw bytes.
    Regex(Regex),
}

impl Pattern {
    /// Literal pattern.
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    /// Regex pattern. Invalid expressions are a `Config` error.
    pub fn regex(expr: &str) -> Result<Self> {
        Regex::new(expr)
            .map(Self::Regex)
            .map_err(|e| Error::Config(format!("invalid pattern '{expr}': {e}")))
    }

    /// Parse user input: `re:<expr>` is a regex, anything else a literal.
    pub fn parse(text: &str) -> Result<Self> {
        match text.strip_prefix(REGEX_PREFIX) {
            Some(expr) => Self::regex(expr),
            None if text.is_empty() => Err(Error::Config("empty pattern".into())),
            None => Ok(Self::literal(text)),
        }
    }

    /// End offset of a match that completes with the last byte of `buf`.
    fn match_end(&self, buf: &[u8]) -> Option<usize> {
        match self {
            Self::Literal(text) => buf
                .ends_with(text.as_bytes())
                .then_some(buf.len()),
            Self::Regex(re) => re
                .find(buf)
                .map(|m| m.end()),
        }
    }

    /// End offset of the first match anywhere in `buf`.
    fn search_end(&self, buf: &[u8]) -> Option<usize> {
        match self {
            Self::Literal(text) => {
                let needle = text.as_bytes();
                if needle.is_empty() {
                    return Some(0);
                }
                buf.windows(needle.len())
                    .position(|w| w == needle)
                    .map(|pos| pos + needle.len())
            },
            Self::Regex(_) => self.match_end(buf),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => write!(f, "{text:?}"),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a == b,
            (Self::Regex(a), Self::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

/// Result of [`PromptMatcher::expect_any`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Index of the pattern that matched.
    pub index: usize,
    /// Console text consumed, up to and including the match.
    pub text: String,
}

/// Waits for console patterns.
#[derive(Debug, Default)]
pub struct PromptMatcher {
    buffer: Vec<u8>,
    line: Vec<u8>,
}

impl PromptMatcher {
    /// Create a matcher with empty buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for `pattern` and return the consumed text.
    ///
    /// Fails with `Timeout` when `timeout` elapses and `Aborted` when the
    /// transport's abort signal is raised.
    pub fn expect<P: Port>(
        &mut self,
        transport: &mut Transport<P>,
        pattern: &Pattern,
        timeout: Duration,
    ) -> Result<String> {
        self.expect_any(transport, &[pattern], timeout)
            .map(|m| m.text)
    }

    /// Wait for the first of several patterns.
    ///
    /// Bytes read past the end of a match stay buffered for the next call.
    pub fn expect_any<P: Port>(
        &mut self,
        transport: &mut Transport<P>,
        patterns: &[&Pattern],
        timeout: Duration,
    ) -> Result<Match> {
        if let Some(found) = self.take_match(patterns, Pattern::search_end) {
            return Ok(found);
        }
        let start = Instant::now();

        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            let byte = match transport.read_byte(remaining) {
                Ok(byte) => byte,
                Err(Error::Timeout(_)) => {
                    self.buffer
                        .clear();
                    self.flush_line();
                    return Err(Error::Timeout(format!(
                        "no {} within {} ms",
                        describe(patterns),
                        timeout.as_millis()
                    )));
                },
                Err(e) => return Err(e),
            };

            self.push(byte);

            if let Some(found) = self.take_match(patterns, Pattern::match_end) {
                return Ok(found);
            }
        }
    }

    /// Consume the buffer up to the first pattern `find` locates.
    fn take_match(
        &mut self,
        patterns: &[&Pattern],
        find: fn(&Pattern, &[u8]) -> Option<usize>,
    ) -> Option<Match> {
        if self
            .buffer
            .is_empty()
        {
            return None;
        }
        for (index, pattern) in patterns
            .iter()
            .enumerate()
        {
            if let Some(end) = find(pattern, &self.buffer) {
                let text = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
                self.buffer
                    .drain(..end);
                trace!("Matched {pattern}");
                return Some(Match { index, text });
            }
        }
        None
    }

    /// Consume console output up to the next newline, or until `timeout`.
    ///
    /// Silence is not an error.
    pub fn skip_line<P: Port>(
        &mut self,
        transport: &mut Transport<P>,
        timeout: Duration,
    ) -> Result<()> {
        let newline = Pattern::literal("\n");
        match self.expect(transport, &newline, timeout) {
            Ok(_) | Err(Error::Timeout(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn push(&mut self, byte: u8) {
        if self
            .buffer
            .len()
            >= MAX_BUFFER
        {
            self.buffer
                .drain(..MAX_BUFFER / 2);
        }
        self.buffer
            .push(byte);

        if byte == b'\n' {
            self.flush_line();
        } else if byte != b'\r' && self.line.len() < MAX_BUFFER {
            self.line
                .push(byte);
        }
    }

    fn flush_line(&mut self) {
        if !self
            .line
            .is_empty()
        {
            debug!("< {}", String::from_utf8_lossy(&self.line));
            self.line
                .clear();
        }
    }
}

fn describe(patterns: &[&Pattern]) -> String {
    patterns
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" or ")
}
