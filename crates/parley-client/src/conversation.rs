//! Per-peer conversation logs.

use parley_core::ConnectionId;

/// One chat line as the local user sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Display name of the author
    pub author: String,
    /// Message body
    pub text: String,
    /// Authored locally
    pub own: bool,
    /// Wall-clock milliseconds at local append
    pub timestamp: u64,
}

/// Where a log lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    /// Log of a peer in the current peer view.
    Peer(ConnectionId),
    /// Messages from an author not (yet) in the peer view, keyed by name.
    Pending(String),
}

/// Append-only message log.
///
/// Received messages pass a coarse at-most-once guard: a message whose
/// (author, text) pair is already in the log is dropped. Two genuinely
/// identical messages from the same author therefore collapse into one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a received message unless an identical (author, text) entry
    /// exists. Returns whether it was appended.
    pub fn append_received(&mut self, message: Message) -> bool {
        if self.contains(&message.author, &message.text) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Append a locally authored message. No duplicate guard.
    pub fn append_own(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Whether an entry with this author and text exists.
    pub fn contains(&self, author: &str, text: &str) -> bool {
        self.messages.iter().any(|m| m.author == author && m.text == text)
    }

    /// Messages in arrival order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Take every message, oldest first.
    pub(crate) fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
