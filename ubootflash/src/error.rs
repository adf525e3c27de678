//! Error types for ubootflash.

use std::io;
use thiserror::Error;

use crate::session::SessionState;

/// Result type for ubootflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ubootflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The serial port could not be opened or is held by another session.
    #[error("Cannot open {port}: {reason}")]
    Connection {
        /// Port name/path.
        port: String,
        /// Why the port could not be acquired.
        reason: String,
    },

    /// No expected pattern or acknowledgment arrived before the deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Bad acknowledgment, receiver cancel, or unexpected bootloader reply.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error after the port was opened.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The operation was cancelled through an [`AbortSignal`](crate::AbortSignal).
    #[error("Aborted")]
    Aborted,

    /// Invalid configuration or request.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Coarse classification used for reporting and process exit codes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Io(_) => ErrorKind::Io,
            #[cfg(feature = "native")]
            Self::Serial(_) => ErrorKind::Io,
            Self::Aborted => ErrorKind::Aborted,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

/// Error classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorKind {
    /// Port could not be opened or locked.
    Connection,
    /// Deadline expired.
    Timeout,
    /// Protocol-level failure.
    Protocol,
    /// Transport or file I/O failure.
    Io,
    /// Cancelled by the caller.
    Aborted,
    /// Invalid configuration or request.
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::Io => "io",
            Self::Aborted => "aborted",
            Self::Config => "config",
        };
        f.write_str(name)
    }
}

/// A session that ended in [`SessionState::Failed`].
///
/// `state` is the state the controller was in when the step failed.
#[derive(Debug, Error)]
#[error("{state} step failed: {error}")]
pub struct SessionError {
    /// State in which the failure happened.
    pub state: SessionState,
    /// Underlying error.
    #[source]
    pub error: Error,
}

impl SessionError {
    /// Kind of the underlying error.
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}
