//! Client errors.

use parley_core::{ConnectionId, NameError};
use parley_proto::ProtocolError;
use thiserror::Error;

/// Errors from the session reconciler.
///
/// A failed call leaves the client unchanged and emits no actions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Local intent requires a live connection.
    #[error("not connected to server")]
    NotConnected,

    /// Connection id is not in the current peer view.
    #[error("peer {0} is not online")]
    UnknownPeer(ConnectionId),

    /// Rejected user input (e.g. blank message).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Local display name failed validation.
    #[error("invalid display name: {0}")]
    InvalidName(#[from] NameError),

    /// Frame from the server could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(ClientError::NotConnected.to_string(), "not connected to server");
        assert_eq!(ClientError::UnknownPeer(7).to_string(), "peer 7 is not online");
        assert_eq!(
            ClientError::from(NameError::Empty).to_string(),
            "invalid display name: display name is empty"
        );
        assert_eq!(
            ClientError::from(ProtocolError::UnknownOpcode(0x42)).to_string(),
            format!("protocol error: {}", ProtocolError::UnknownOpcode(0x42))
        );
    }
}
