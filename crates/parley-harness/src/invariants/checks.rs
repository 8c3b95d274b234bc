//! Standard invariant checks.
//!
//! These capture WHAT must be true, not specific scenarios.

use std::collections::HashSet;

use parley_client::ConnectionState;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// A display name is attached to at most one connection, and only to live
/// ones.
pub struct OneConnectionPerIdentity;

impl Invariant for OneConnectionPerIdentity {
    fn name(&self) -> &'static str {
        "one_connection_per_identity"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut names = HashSet::new();
        let mut ids = HashSet::new();

        for entry in &state.registry {
            if !names.insert(entry.name.as_str()) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("name {:?} registered twice", entry.name),
                });
            }
            if !ids.insert(entry.connection_id) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("connection {} registered twice", entry.connection_id),
                });
            }
            if !state.connections.contains(&entry.connection_id) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("connection {} registered but not live", entry.connection_id),
                });
            }
        }
        Ok(())
    }
}

/// The peer view never contains the client's own name.
pub struct PeerViewExcludesSelf;

impl Invariant for PeerViewExcludesSelf {
    fn name(&self) -> &'static str {
        "peer_view_excludes_self"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if client.peers.iter().any(|p| p.name == client.name) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("client {} sees itself as a peer", client.name),
                });
            }
        }
        Ok(())
    }
}

/// A selection always points at a peer in the current view.
pub struct SelectionInPeerView;

impl Invariant for SelectionInPeerView {
    fn name(&self) -> &'static str {
        "selection_in_peer_view"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if let Some(selected) = client.selected
                && !client.peers.iter().any(|p| p.connection_id == selected)
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("client {} selected vanished peer {selected}", client.name),
                });
            }
        }
        Ok(())
    }
}

/// Every conversation log belongs to a peer in the current view.
pub struct NoGhostLogs;

impl Invariant for NoGhostLogs {
    fn name(&self) -> &'static str {
        "no_ghost_logs"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for log in &client.logs {
                if !client.peers.iter().any(|p| p.connection_id == *log) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("client {} keeps a log for vanished peer {log}", client.name),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Once the network is quiet, every connected client's peer view equals the
/// registry minus its own name, in registry order.
pub struct RosterMatchesRegistry;

impl Invariant for RosterMatchesRegistry {
    fn name(&self) -> &'static str {
        "roster_matches_registry"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in state.clients.iter().filter(|c| c.state == ConnectionState::Connected) {
            let expected: Vec<_> = state
                .registry
                .iter()
                .filter(|e| e.name != client.name)
                .map(|e| (e.connection_id, e.name.as_str()))
                .collect();
            let actual: Vec<_> =
                client.peers.iter().map(|p| (p.connection_id, p.name.as_str())).collect();

            if expected != actual {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {} sees {actual:?}, registry minus self is {expected:?}",
                        client.name
                    ),
                });
            }
        }
        Ok(())
    }
}
