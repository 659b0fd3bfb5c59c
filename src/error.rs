//! Typed failures surfaced by encoder sessions.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors reported by session construction, writes, and teardown.
///
/// Creation failures carry the underlying `io::Error`, so the platform
/// errno stays reachable through `source()`.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A channel pair could not be fully materialized.
    #[error("failed to create {label} channel: {source}")]
    Channel {
        label: &'static str,
        #[source]
        source: io::Error,
    },

    /// The encoder process could not be started.
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The encoder argument line could not be split into words.
    #[error("invalid encoder argument line: {0}")]
    ArgumentLine(#[from] shell_words::ParseError),

    /// A write stalled past the session timeout without completing.
    #[error("write stalled for {0:?} without completing")]
    WriteTimeout(Duration),

    /// The encoder exited while a write was still pending.
    #[error("encoder exited before the write completed{}", format_exit(.0))]
    ChildExited(Option<ExitStatus>),

    /// The write itself failed at the OS level.
    #[error("write to encoder failed: {0}")]
    Write(#[from] io::Error),

    /// The session was already closed.
    #[error("session is already closed")]
    Closed,
}

fn format_exit(status: &Option<ExitStatus>) -> String {
    match status {
        Some(status) => format!(" ({status})"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_error_keeps_platform_errno() {
        let err = SessionError::Channel {
            label: "stdin",
            source: io::Error::from_raw_os_error(libc::EMFILE),
        };
        let source = std::error::Error::source(&err).expect("channel error has a source");
        let io_err = source
            .downcast_ref::<io::Error>()
            .expect("source is an io::Error");
        assert_eq!(io_err.raw_os_error(), Some(libc::EMFILE));
    }

    #[test]
    fn child_exited_without_status_has_clean_message() {
        let message = SessionError::ChildExited(None).to_string();
        assert_eq!(message, "encoder exited before the write completed");
    }

    #[test]
    fn write_timeout_names_the_duration() {
        let message = SessionError::WriteTimeout(Duration::from_millis(250)).to_string();
        assert!(message.contains("250ms"));
    }
}
