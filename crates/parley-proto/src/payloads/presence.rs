//! Presence payloads: identity announcement and roster snapshots.

use serde::{Deserialize, Serialize};

/// Client declares the display name it wants to be known by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceIdentity {
    /// Requested display name.
    pub name: String,
}

/// One (connection, identity) pair in a roster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Server-assigned connection identifier.
    pub connection_id: u64,
    /// Display name attached to that connection.
    pub name: String,
}

/// Full snapshot of every connection with an attached identity.
///
/// Always sent whole. Clients replace their view with it rather than merging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    /// Entries in registration order.
    pub entries: Vec<RosterEntry>,
}
