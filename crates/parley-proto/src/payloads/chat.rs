//! Direct message payloads.

use serde::{Deserialize, Serialize};

/// Client asks the server to relay `text` to one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Target connection.
    pub recipient: u64,
    /// Message body.
    pub text: String,
}

/// Message pushed by the server.
///
/// The recipient sees the sender's display name as `author`. The sender gets
/// the same text back with `author` set to the self-marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedMessage {
    /// Display name of the sender, or the self-marker for echoes.
    pub author: String,
    /// Message body.
    pub text: String,
}
