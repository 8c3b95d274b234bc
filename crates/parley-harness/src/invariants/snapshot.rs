//! Observable state snapshots for invariant checking.
//!
//! Invariants operate on snapshots rather than live state so a check always
//! sees one consistent instant.

use parley_client::{Client, ConnectionState, ConversationKey, Peer};
use parley_core::{ConnectionId, Environment};
use parley_proto::payloads::presence::RosterEntry;

/// Snapshot of the whole simulated system.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Server registry in roster order.
    pub registry: Vec<RosterEntry>,
    /// Sessions the server considers connected.
    pub connections: Vec<ConnectionId>,
    /// Per-client state.
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// Snapshot with only client state.
    pub fn from_clients(clients: Vec<ClientSnapshot>) -> Self {
        Self { clients, ..Self::default() }
    }
}

/// Snapshot of one client's observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    /// Session the client is (or was last) connected on.
    pub session: ConnectionId,
    /// Local display name.
    pub name: String,
    /// Transport state.
    pub state: ConnectionState,
    /// Peer view.
    pub peers: Vec<Peer>,
    /// Selected peer.
    pub selected: Option<ConnectionId>,
    /// Peers that have a conversation log.
    pub logs: Vec<ConnectionId>,
    /// Authors with pending buffers.
    pub pending: Vec<String>,
}

impl ClientSnapshot {
    /// Capture `client` as seen on `session`.
    pub fn capture<E: Environment>(session: ConnectionId, client: &Client<E>) -> Self {
        let mut logs = Vec::new();
        let mut pending = Vec::new();
        for key in client.conversation_keys() {
            match key {
                ConversationKey::Peer(id) => logs.push(id),
                ConversationKey::Pending(author) => pending.push(author),
            }
        }
        logs.sort_unstable();
        pending.sort();

        Self {
            session,
            name: client.name().to_string(),
            state: client.state(),
            peers: client.peers().to_vec(),
            selected: client.selected(),
            logs,
            pending,
        }
    }
}
