//! Session reconciler state machine.
//!
//! The `Client` owns a projection of the server's registry (the peer view)
//! plus one conversation log per peer. The peer view is a pure function of
//! the latest roster minus our own name; logs follow it, so a peer that
//! vanishes takes its history with it.
//!
//! Messages can race ahead of the roster that introduces their author. Those
//! are parked in a pending buffer keyed by author name and re-resolved on the
//! next roster push: migrated if the author is now a peer, discarded if not.

use std::collections::HashMap;

use parley_core::{
    ConnectionId, DEFAULT_MAX_NAME_LEN, Environment, SELF_MARKER, normalize_name, normalize_text,
};
use parley_proto::{
    Payload,
    payloads::{
        ErrorPayload,
        chat::{RelayedMessage, SendMessage},
        presence::{AnnounceIdentity, Roster, RosterEntry},
    },
};

use crate::{
    conversation::{Conversation, ConversationKey, Message},
    error::ClientError,
    event::{ClientAction, ClientEvent},
};

/// Transport state as seen by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport.
    Disconnected,
    /// Attempt in progress.
    Connecting,
    /// Transport up and identity announced.
    Connected,
}

/// Another participant in the peer view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    /// Server-assigned connection id
    pub connection_id: ConnectionId,
    /// Announced display name
    pub name: String,
}

impl From<RosterEntry> for Peer {
    fn from(entry: RosterEntry) -> Self {
        Self { connection_id: entry.connection_id, name: entry.name }
    }
}

/// Client-side session reconciler.
pub struct Client<E: Environment> {
    /// Environment for message timestamps.
    env: E,

    /// Our display name, normalized.
    name: String,

    /// Transport state.
    state: ConnectionState,

    /// Latest roster minus ourselves, in roster order.
    peers: Vec<Peer>,

    /// Logs of peers in the peer view.
    conversations: HashMap<ConnectionId, Conversation>,

    /// Messages from authors missing from the peer view, keyed by name.
    pending: HashMap<String, Conversation>,

    /// Selected peer. Always in `peers` when set.
    selected: Option<ConnectionId>,

    /// Last error the server reported.
    last_error: Option<ErrorPayload>,

    /// Human-readable transport status.
    status: Option<String>,
}

impl<E: Environment> Client<E> {
    /// Create a client that will announce `name`.
    ///
    /// The name is trimmed and validated with the server's rules.
    pub fn new(env: E, name: &str) -> Result<Self, ClientError> {
        let name = normalize_name(name, DEFAULT_MAX_NAME_LEN)?;

        Ok(Self {
            env,
            name,
            state: ConnectionState::Disconnected,
            peers: Vec::new(),
            conversations: HashMap::new(),
            pending: HashMap::new(),
            selected: None,
            last_error: None,
            status: None,
        })
    }

    /// Our display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current peer view, in roster order.
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    /// Peer with `connection_id`, if online.
    pub fn peer(&self, connection_id: ConnectionId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.connection_id == connection_id)
    }

    /// Selected peer.
    pub fn selected(&self) -> Option<ConnectionId> {
        self.selected
    }

    /// Log for a peer or pending author.
    pub fn conversation(&self, key: &ConversationKey) -> Option<&Conversation> {
        match key {
            ConversationKey::Peer(id) => self.conversations.get(id),
            ConversationKey::Pending(author) => self.pending.get(author),
        }
    }

    /// Keys of every existing log.
    pub fn conversation_keys(&self) -> Vec<ConversationKey> {
        let peers = self.conversations.keys().map(|&id| ConversationKey::Peer(id));
        let pending = self.pending.keys().map(|a| ConversationKey::Pending(a.clone()));
        peers.chain(pending).collect()
    }

    /// Last error reported by the server, until the next roster or send.
    pub fn last_error(&self) -> Option<&ErrorPayload> {
        self.last_error.as_ref()
    }

    /// Transport status line, e.g. after a disconnect.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Process an event and return resulting actions.
    pub fn handle(&mut self, event: ClientEvent) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::TransportConnecting => Ok(self.handle_connecting()),
            ClientEvent::TransportConnected => self.handle_connected(),
            ClientEvent::TransportDisconnected { reason } => Ok(self.handle_disconnected(&reason)),
            ClientEvent::FrameReceived(frame) => {
                let payload = Payload::from_frame(&frame)?;
                Ok(self.handle_payload(payload))
            },
            ClientEvent::SendMessage { peer, text } => self.handle_send(peer, &text),
            ClientEvent::SelectPeer(peer) => self.handle_select(peer),
            ClientEvent::ClearSelection => Ok(self.clear_selection()),
        }
    }

    fn handle_connecting(&mut self) -> Vec<ClientAction> {
        self.set_state(ConnectionState::Connecting).into_iter().collect()
    }

    /// Announce and ask for the roster. Runs on every (re)connection.
    fn handle_connected(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        let announce = Payload::AnnounceIdentity(AnnounceIdentity { name: self.name.clone() });
        let announce = announce.framed()?;
        let request = Payload::RequestRoster.framed()?;

        self.status = None;
        let mut actions: Vec<_> = self.set_state(ConnectionState::Connected).into_iter().collect();
        actions.push(ClientAction::Send(announce));
        actions.push(ClientAction::Send(request));
        Ok(actions)
    }

    /// Peer view and logs stay readable until the next roster after
    /// reconnect.
    fn handle_disconnected(&mut self, reason: &str) -> Vec<ClientAction> {
        self.status = Some("disconnected from server".to_string());

        let mut actions: Vec<_> =
            self.set_state(ConnectionState::Disconnected).into_iter().collect();
        actions.push(ClientAction::Log { message: format!("transport lost: {reason}") });
        actions
    }

    fn handle_payload(&mut self, payload: Payload) -> Vec<ClientAction> {
        match payload {
            Payload::Roster(roster) => self.handle_roster(roster),
            Payload::Message(message) => self.handle_message(message),
            Payload::Error(error) => self.handle_server_error(error),
            other @ (Payload::AnnounceIdentity(_)
            | Payload::RequestRoster
            | Payload::SendMessage(_)) => vec![ClientAction::Log {
                message: format!("ignoring client-bound opcode {:?}", other.opcode()),
            }],
        }
    }

    /// Replace the peer view wholesale and reconcile logs, pending buffers and
    /// selection against it.
    fn handle_roster(&mut self, roster: Roster) -> Vec<ClientAction> {
        let mut actions = Vec::new();

        self.peers =
            roster.entries.into_iter().filter(|e| e.name != self.name).map(Peer::from).collect();
        self.last_error = None;

        let mut vanished: Vec<_> = self
            .conversations
            .keys()
            .copied()
            .filter(|&id| self.peer(id).is_none())
            .collect();
        vanished.sort_unstable();
        for peer in vanished {
            self.conversations.remove(&peer);
            actions.push(ClientAction::ConversationRemoved { peer });
        }

        if let Some(selected) = self.selected
            && self.peer(selected).is_none()
        {
            self.selected = None;
            actions.push(ClientAction::SelectionChanged { selected: None });
        }

        actions.extend(self.resolve_pending());
        actions.insert(0, ClientAction::PeersChanged { peers: self.peers.clone() });
        actions
    }

    /// Drain every pending buffer: move it into its author's log if the
    /// author is now a peer, otherwise drop it.
    fn resolve_pending(&mut self) -> Vec<ClientAction> {
        let mut actions = Vec::new();
        let mut buffers: Vec<_> = self.pending.drain().collect();
        buffers.sort_by(|a, b| a.0.cmp(&b.0));

        for (author, buffer) in buffers {
            let Some(peer) = self.peers.iter().find(|p| p.name == author).map(|p| p.connection_id)
            else {
                actions.push(ClientAction::Log {
                    message: format!(
                        "discarding {} buffered message(s) from {author}: not online",
                        buffer.len()
                    ),
                });
                continue;
            };

            let log = self.conversations.entry(peer).or_default();
            for message in buffer.into_messages() {
                if log.append_received(message.clone()) {
                    actions.push(ClientAction::MessageAppended {
                        key: ConversationKey::Peer(peer),
                        message,
                    });
                }
            }
        }

        actions
    }

    fn handle_message(&mut self, relayed: RelayedMessage) -> Vec<ClientAction> {
        let RelayedMessage { author, text } = relayed;

        // Already appended at send time.
        if author == SELF_MARKER {
            return Vec::new();
        }

        let message =
            Message { author, text, own: false, timestamp: self.env.wall_clock_millis() };

        let peer = self.peers.iter().find(|p| p.name == message.author).map(|p| p.connection_id);
        match peer {
            Some(peer) => {
                let log = self.conversations.entry(peer).or_default();
                if log.append_received(message.clone()) {
                    vec![ClientAction::MessageAppended { key: ConversationKey::Peer(peer), message }]
                } else {
                    vec![ClientAction::Log {
                        message: format!("duplicate message from {} dropped", message.author),
                    }]
                }
            },
            None => self.buffer_unresolved(message),
        }
    }

    /// Park a message from an unknown author and ask for a fresh roster.
    fn buffer_unresolved(&mut self, message: Message) -> Vec<ClientAction> {
        let key = ConversationKey::Pending(message.author.clone());
        let buffer = self.pending.entry(message.author.clone()).or_default();

        let mut actions = Vec::new();
        if buffer.append_received(message.clone()) {
            actions.push(ClientAction::MessageAppended { key, message });
        }

        match Payload::RequestRoster.framed() {
            Ok(frame) => actions.push(ClientAction::Send(frame)),
            Err(e) => {
                actions.push(ClientAction::Log { message: format!("roster request failed: {e}") });
            },
        }
        actions
    }

    fn handle_server_error(&mut self, error: ErrorPayload) -> Vec<ClientAction> {
        let action = ClientAction::ServerError { code: error.code, message: error.message.clone() };
        self.last_error = Some(error);
        vec![action]
    }

    /// Optimistically append to the peer's log, then send. No rollback.
    fn handle_send(
        &mut self,
        peer: ConnectionId,
        text: &str,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if self.state != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }

        if self.peer(peer).is_none() {
            return Err(ClientError::UnknownPeer(peer));
        }

        let text = normalize_text(text)
            .ok_or_else(|| ClientError::InvalidInput("message is empty".to_string()))?;

        let frame =
            Payload::SendMessage(SendMessage { recipient: peer, text: text.to_string() }).framed()?;

        let message = Message {
            author: self.name.clone(),
            text: text.to_string(),
            own: true,
            timestamp: self.env.wall_clock_millis(),
        };
        self.conversations.entry(peer).or_default().append_own(message.clone());
        self.last_error = None;

        Ok(vec![
            ClientAction::MessageAppended { key: ConversationKey::Peer(peer), message },
            ClientAction::Send(frame),
        ])
    }

    fn handle_select(&mut self, peer: ConnectionId) -> Result<Vec<ClientAction>, ClientError> {
        if self.peer(peer).is_none() {
            return Err(ClientError::UnknownPeer(peer));
        }

        if self.selected == Some(peer) {
            return Ok(Vec::new());
        }

        self.selected = Some(peer);
        Ok(vec![ClientAction::SelectionChanged { selected: Some(peer) }])
    }

    fn clear_selection(&mut self) -> Vec<ClientAction> {
        match self.selected.take() {
            Some(_) => vec![ClientAction::SelectionChanged { selected: None }],
            None => Vec::new(),
        }
    }

    fn set_state(&mut self, state: ConnectionState) -> Option<ClientAction> {
        if self.state == state {
            return None;
        }
        self.state = state;
        Some(ClientAction::StateChanged(state))
    }
}

impl<E: Environment> std::fmt::Debug for Client<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("peer_count", &self.peers.len())
            .field("pending_count", &self.pending.len())
            .finish()
    }
}
