//! Client events and actions.

use parley_core::ConnectionId;
use parley_proto::Frame;

use crate::{
    client::{ConnectionState, Peer},
    conversation::{ConversationKey, Message},
};

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Reporting transport state changes
/// - Receiving frames from the network
/// - Forwarding user intents (send, select)
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A connection attempt started.
    TransportConnecting,

    /// The transport is up; the client announces itself.
    TransportConnected,

    /// The transport was lost or an attempt failed.
    TransportDisconnected {
        /// Human-readable cause.
        reason: String,
    },

    /// Frame received from server.
    FrameReceived(Frame),

    /// User wants to send a direct message.
    SendMessage {
        /// Recipient connection.
        peer: ConnectionId,
        /// Message text (trimmed before sending).
        text: String,
    },

    /// User selected a peer.
    SelectPeer(ConnectionId),

    /// User cleared the selection.
    ClearSelection,
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Send a frame to the server.
    Send(Frame),

    /// Connection state changed.
    StateChanged(ConnectionState),

    /// Peer view replaced by a roster push.
    PeersChanged {
        /// New peer view, in roster order.
        peers: Vec<Peer>,
    },

    /// A message was appended to a log.
    MessageAppended {
        /// Log the message landed in.
        key: ConversationKey,
        /// The appended message.
        message: Message,
    },

    /// A peer vanished and its log was deleted.
    ConversationRemoved {
        /// Connection of the vanished peer.
        peer: ConnectionId,
    },

    /// Selected peer changed.
    SelectionChanged {
        /// New selection.
        selected: Option<ConnectionId>,
    },

    /// Server rejected one of our frames.
    ServerError {
        /// Error code from the server.
        code: u16,
        /// Human-readable message from the server.
        message: String,
    },

    /// Log message for debugging.
    Log {
        /// Log message.
        message: String,
    },
}
