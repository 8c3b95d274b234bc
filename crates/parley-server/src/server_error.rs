//! Driver error types.
//!
//! Invalid client input is not an error here: the driver answers it with an
//! error frame or drops it silently. These errors mean the runtime fed the
//! driver something inconsistent.

use thiserror::Error;

/// Errors returned by [`crate::ServerDriver::process_event`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Frame arrived for a connection the driver never accepted.
    ///
    /// Either the runtime skipped `ConnectionAccepted` or the connection was
    /// refused for capacity and kept sending.
    #[error("session not found: {0}")]
    SessionNotFound(u64),

    /// Failed to encode an outbound frame.
    ///
    /// Indicates a bug: every payload the driver builds is encodable.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<parley_proto::ProtocolError> for DriverError {
    fn from(err: parley_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_display() {
        assert_eq!(DriverError::SessionNotFound(42).to_string(), "session not found: 42");

        let err: DriverError = parley_proto::ProtocolError::InvalidMagic.into();
        assert_eq!(err.to_string(), "protocol error: invalid magic number");
    }
}
