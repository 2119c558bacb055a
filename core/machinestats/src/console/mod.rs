//! Client for line-oriented interactive consoles, such as the coturn CLI.
//!
//! A console is a plaintext TCP service that prints prompts and free-form text,
//! and accepts CRLF-terminated commands. There is no framing: the client reads the
//! stream byte by byte until some expected text appears, or until a deadline is reached.
//!
//! See [`ConsoleSession::wait_until`] for the details of the race between the reader and the timer.

use std::{io, num::ParseIntError, time::Duration};

use regex::Regex;

mod coturn;
mod session;

pub use coturn::{CoturnClient, parse_total_sessions};
pub use session::ConsoleSession;

/// Error that can occur while talking to a console.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// The TCP connection could not be established.
    #[error("could not connect to the console: {0}")]
    Connect(#[source] io::Error),
    /// Reading from or writing to the socket failed.
    #[error("console i/o error: {0}")]
    Io(#[from] io::Error),
    /// The expected text did not appear before the deadline.
    #[error("Timed out after {0:?}")]
    TimedOut(Duration),
    /// The console closed the connection before the expected text appeared.
    #[error("the console closed the connection before the expected text appeared")]
    StreamClosed,
    /// The answer of the console did not have the expected syntax.
    #[error("pattern did not match: '{0}'")]
    PatternMismatch(String),
    /// The answer of the console contained an invalid number.
    #[error("invalid number '{value}': {source}")]
    InvalidNumber {
        value: String,
        #[source]
        source: ParseIntError,
    },
}

impl ConsoleError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConsoleError::TimedOut(_))
    }
}

/// Condition that the current line must satisfy to stop waiting.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// The line contains this text.
    ///
    /// Only checked when the last received byte is the last byte of the text.
    Literal(String),
    /// The line matches this regular expression.
    Pattern(Regex),
}

impl Matcher {
    pub fn literal(text: impl Into<String>) -> Self {
        Matcher::Literal(text.into())
    }

    /// Tests the line accumulated so far. `last` is the byte that has just been appended to it.
    pub fn matches(&self, line: &[u8], last: u8) -> bool {
        match self {
            Matcher::Literal(text) => {
                let text = text.as_bytes();
                text.last() == Some(&last) && line.windows(text.len()).any(|w| w == text)
            }
            Matcher::Pattern(regex) => regex.is_match(&String::from_utf8_lossy(line)),
        }
    }
}
