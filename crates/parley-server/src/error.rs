//! Runtime error types.

use std::fmt;

use crate::server_error::DriverError;

/// Errors from the QUIC server runtime.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, unreadable TLS files).
    ///
    /// Fatal at startup. Fix configuration and restart.
    Config(String),

    /// Transport or network error.
    ///
    /// Scoped to one connection unless it comes from the endpoint itself.
    Transport(String),

    /// A peer sent bytes that do not frame.
    ///
    /// Ends that peer's stream; other connections are unaffected.
    Protocol(String),

    /// Unexpected runtime state. Indicates a bug.
    Internal(String),

    /// Error from the Sans-IO driver.
    Driver(DriverError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::Driver(err) => write!(f, "driver error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Driver(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DriverError> for ServerError {
    fn from(err: DriverError) -> Self {
        Self::Driver(err)
    }
}

impl From<parley_proto::ProtocolError> for ServerError {
    fn from(err: parley_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
