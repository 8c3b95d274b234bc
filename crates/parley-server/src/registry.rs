//! Presence registry: which connection carries which display name.
//!
//! Two indexes kept in lockstep: connection → presence (for lookups on every
//! frame) and name → connection (for name collisions). A name is attached to
//! at most one connection; announcing a held name moves it to the newcomer and
//! drops the previous holder from the registry (last writer wins).
//!
//! Rosters list connections in the order they first announced. Renaming keeps
//! a connection's place; leaving and announcing again puts it at the end.

use std::collections::HashMap;

use parley_core::ConnectionId;
use parley_proto::payloads::presence::RosterEntry;

/// Registry entry for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Presence {
    /// Attached display name
    name: String,
    /// Position in roster order
    seq: u64,
}

/// What a call to [`PresenceRegistry::register`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    /// Connection that held the name before and lost it.
    pub evicted: Option<ConnectionId>,
    /// Name this connection carried before, if it was renamed.
    pub previous_name: Option<String>,
}

impl Registration {
    /// Whether the registry is unchanged (connection re-announced its own
    /// name).
    pub fn is_noop(&self, name: &str) -> bool {
        self.evicted.is_none() && self.previous_name.as_deref() == Some(name)
    }
}

/// Authoritative connection ↔ identity directory.
///
/// Mutated only by announce and disconnect. Every method leaves both indexes
/// consistent, so a [`PresenceRegistry::snapshot`] taken between calls always
/// reflects a state that really existed.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// Connection → presence
    by_connection: HashMap<ConnectionId, Presence>,
    /// Name → connection (reverse index)
    by_name: HashMap<String, ConnectionId>,
    /// Next roster position
    next_seq: u64,
}

impl PresenceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `name` to `connection`.
    ///
    /// The caller validates the name first. Any other connection holding
    /// `name` is removed from the registry and reported in
    /// [`Registration::evicted`].
    pub fn register(&mut self, connection: ConnectionId, name: &str) -> Registration {
        let mut outcome = Registration::default();

        if let Some(&holder) = self.by_name.get(name)
            && holder != connection
        {
            self.by_connection.remove(&holder);
            outcome.evicted = Some(holder);
        }

        let seq = match self.by_connection.get(&connection) {
            Some(existing) => {
                if existing.name != name {
                    self.by_name.remove(&existing.name);
                }
                outcome.previous_name = Some(existing.name.clone());
                existing.seq
            },
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            },
        };

        self.by_name.insert(name.to_string(), connection);
        self.by_connection.insert(connection, Presence { name: name.to_string(), seq });

        debug_assert_eq!(self.by_name.len(), self.by_connection.len());
        outcome
    }

    /// Remove `connection` from both indexes.
    ///
    /// Returns the name it carried. `None` if it never announced (or was
    /// evicted).
    pub fn unregister(&mut self, connection: ConnectionId) -> Option<String> {
        let presence = self.by_connection.remove(&connection)?;

        // Only drop the reverse entry if it still points at us.
        if self.by_name.get(&presence.name) == Some(&connection) {
            self.by_name.remove(&presence.name);
        }

        debug_assert_eq!(self.by_name.len(), self.by_connection.len());
        Some(presence.name)
    }

    /// Display name attached to `connection`.
    pub fn name_of(&self, connection: ConnectionId) -> Option<&str> {
        self.by_connection.get(&connection).map(|p| p.name.as_str())
    }

    /// Every (connection, name) pair in roster order.
    pub fn snapshot(&self) -> Vec<RosterEntry> {
        let mut entries: Vec<_> = self.by_connection.iter().collect();
        entries.sort_by_key(|(_, presence)| presence.seq);
        entries
            .into_iter()
            .map(|(&connection_id, presence)| RosterEntry {
                connection_id,
                name: presence.name.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
impl PresenceRegistry {
    fn connection_for(&self, name: &str) -> Option<ConnectionId> {
        self.by_name.get(name).copied()
    }

    fn contains(&self, connection: ConnectionId) -> bool {
        self.by_connection.contains_key(&connection)
    }

    fn len(&self) -> usize {
        self.by_connection.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }
}
