//! Peer identity and presence.
//!
//! Peers form a flat set with no hierarchy. Each peer gets an opaque id from
//! the discovery hub at session start (`assign-id`) and picks a display name
//! once; the name is immutable for the rest of the session. The hub is the
//! sole source of roster snapshots, which replace the local peer list
//! wholesale on every join/leave broadcast.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque peer identifier, unique per connection lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Generate a fresh peer id (hub side).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The raw 16-byte form, for the binary chunk codec.
    #[must_use]
    pub const fn into_bytes(self) -> [u8; 16] {
        self.0.into_bytes()
    }

    /// Rebuild an id from its raw 16-byte form.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A member of the peer group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Hub-assigned identifier
    pub id: PeerId,
    /// Display name, chosen once at session start
    pub display_name: String,
}

impl Peer {
    /// Create a peer from an assigned id and chosen display name.
    #[must_use]
    pub fn new(id: PeerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// A full roster snapshot as broadcast by the hub.
///
/// The snapshot replaces the local peer list wholesale; the engine never
/// merges or diffs rosters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    /// All currently connected peers
    pub peers: Vec<Peer>,
}

impl Roster {
    /// Number of peers in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the roster is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Look up a peer's display name by id.
    #[must_use]
    pub fn display_name(&self, id: PeerId) -> Option<&str> {
        self.peers
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.display_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_ids_unique() {
        assert_ne!(PeerId::generate(), PeerId::generate());
    }

    #[test]
    fn test_roster_lookup() {
        let a = Peer::new(PeerId::generate(), "ada");
        let b = Peer::new(PeerId::generate(), "brin");
        let roster = Roster {
            peers: vec![a.clone(), b.clone()],
        };

        assert_eq!(roster.len(), 2);
        assert_eq!(roster.display_name(a.id), Some("ada"));
        assert_eq!(roster.display_name(b.id), Some("brin"));
        assert_eq!(roster.display_name(PeerId::generate()), None);
    }

    #[test]
    fn test_peer_id_serde_transparent() {
        let id = PeerId::generate();
        let json = serde_json::to_string(&id).expect("encode");
        let back: PeerId = serde_json::from_str(&json).expect("decode");
        assert_eq!(id, back);
        // transparent newtype: serializes as a bare uuid string
        assert!(json.starts_with('"'));
    }
}
