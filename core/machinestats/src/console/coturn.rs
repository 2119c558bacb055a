use std::{sync::LazyLock, time::Duration};

use regex::Regex;

use super::{ConsoleError, ConsoleSession, Matcher};

/// Lists the sessions of all users.
const PRINT_USERS_COMMAND: &str = "pu";

static TOTAL_SESSIONS: LazyLock<Regex> = LazyLock::new(|| {
    // The trailing whitespace ensures that the number is complete.
    Regex::new(r"Total sessions: (?P<sessions>\d+)\s").expect("regex should be valid")
});

/// Queries the number of sessions of a coturn server through its telnet CLI.
#[derive(Debug, Clone)]
pub struct CoturnClient {
    address: String,
    password: String,
    timeout: Duration,
}

impl CoturnClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

    pub fn new(address: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets the timeout of each step: connection, prompts and answer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Opens a session, logs in, and returns the total number of sessions.
    ///
    /// The connection is closed before returning, whatever the outcome.
    pub async fn sessions(&self) -> Result<u64, ConsoleError> {
        let mut session = ConsoleSession::connect(self.address.as_str(), self.timeout).await?;
        log::debug!("connected to coturn console at {}", self.address);

        session.login(&self.password, self.timeout).await?;
        let matcher = Matcher::Pattern(TOTAL_SESSIONS.clone());
        let line = session.command(PRINT_USERS_COMMAND, &matcher, self.timeout).await?;
        drop(session);

        parse_total_sessions(&line)
    }
}

/// Extracts the number of sessions from the answer of the `pu` command.
pub fn parse_total_sessions(line: &str) -> Result<u64, ConsoleError> {
    let captures = TOTAL_SESSIONS
        .captures(line)
        .ok_or_else(|| ConsoleError::PatternMismatch(line.trim().to_owned()))?;
    let value = &captures["sessions"];
    value.parse().map_err(|source| ConsoleError::InvalidNumber {
        value: value.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sessions() {
        assert_eq!(parse_total_sessions("  Total sessions: 42\r\n").unwrap(), 42);
        assert_eq!(parse_total_sessions("Total sessions: 0\n").unwrap(), 0);
    }

    #[test]
    fn parse_mismatch() {
        let err = parse_total_sessions("Total users: 3\n").unwrap_err();
        assert!(matches!(err, ConsoleError::PatternMismatch(_)), "{err:?}");
    }

    #[test]
    fn parse_overflow() {
        let err = parse_total_sessions("Total sessions: 99999999999999999999999\n").unwrap_err();
        assert!(
            matches!(err, ConsoleError::InvalidNumber { ref value, .. } if value == "99999999999999999999999"),
            "{err:?}"
        );
    }
}
