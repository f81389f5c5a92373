//! Join authorization and room-id derivation.
//!
//! The hub never decides who may join a room. Before an agent is created
//! the HTTP layer asks a [`SessionAuthority`]; the answer holds for the
//! lifetime of the connection.

use crate::message::RoomId;
use dashmap::DashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Separator between the two identities of a derived room id.
pub const ROOM_ID_SEPARATOR: char = '_';

/// Derive the room id for a pair of identities.
///
/// The identities are ordered lexicographically so both sides arrive at the
/// same id: `derive_room_id("bob", "alice") == "alice_bob"`.
#[must_use]
pub fn derive_room_id(a: &str, b: &str) -> RoomId {
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    format!("{low}{ROOM_ID_SEPARATOR}{high}")
}

/// Decides whether an identity may join a room.
pub trait SessionAuthority: Send + Sync {
    /// Check whether `identity` may join `room_id`.
    fn is_authorized(&self, identity: &str, room_id: &str) -> bool;

    /// Derive the room id for an accepted pairing.
    fn derive_room_id(&self, a: &str, b: &str) -> RoomId {
        derive_room_id(a, b)
    }
}

/// Lets every identity into every room.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenSessions;

impl SessionAuthority for OpenSessions {
    fn is_authorized(&self, _identity: &str, _room_id: &str) -> bool {
        true
    }
}

/// Authorizes an identity for a room iff the room id is the derived id of
/// that identity and some peer. Keeps no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairedRooms;

impl SessionAuthority for PairedRooms {
    fn is_authorized(&self, identity: &str, room_id: &str) -> bool {
        if identity.is_empty() {
            return false;
        }

        let as_low = room_id
            .strip_prefix(identity)
            .and_then(|rest| rest.strip_prefix(ROOM_ID_SEPARATOR));
        let as_high = room_id
            .strip_suffix(identity)
            .and_then(|rest| rest.strip_suffix(ROOM_ID_SEPARATOR));

        [as_low, as_high]
            .into_iter()
            .flatten()
            .any(|peer| !peer.is_empty() && derive_room_id(identity, peer) == room_id)
    }
}

/// An opened session between two identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Room id of the session.
    pub room_id: RoomId,
    /// The two participants, in derivation order.
    pub participants: [String; 2],
    /// Unix time in milliseconds when the session was opened.
    pub opened_at: u64,
}

impl Session {
    /// Check whether `identity` takes part in this session.
    #[must_use]
    pub fn includes(&self, identity: &str) -> bool {
        self.participants.iter().any(|p| p == identity)
    }
}

/// Sessions opened explicitly when a pairing is accepted.
///
/// Shared between request handlers, so it uses a concurrent map rather than
/// going through the hub.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<RoomId, Session>,
}

impl SessionRegistry {
    /// Create an empty session registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session between two identities and return its room id.
    ///
    /// Opening the same pair again returns the existing room id.
    pub fn open(&self, a: &str, b: &str) -> RoomId {
        let room_id = derive_room_id(a, b);
        self.sessions.entry(room_id.clone()).or_insert_with(|| {
            let (low, high) = if a < b { (a, b) } else { (b, a) };
            debug!(room = %room_id, "Opened session");
            Session {
                room_id: room_id.clone(),
                participants: [low.to_string(), high.to_string()],
                opened_at: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or_default(),
            }
        });
        room_id
    }

    /// Close a session.
    ///
    /// Returns the session if it existed. Agents already connected to the
    /// room are not affected.
    pub fn close(&self, room_id: &str) -> Option<Session> {
        self.sessions.remove(room_id).map(|(_, session)| session)
    }

    /// Get a session by room id.
    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<Session> {
        self.sessions.get(room_id).map(|s| s.clone())
    }

    /// Get the number of open sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if no sessions are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionAuthority for SessionRegistry {
    fn is_authorized(&self, identity: &str, room_id: &str) -> bool {
        self.sessions
            .get(room_id)
            .is_some_and(|session| session.includes(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_room_id_is_symmetric() {
        assert_eq!(derive_room_id("bob", "alice"), "alice_bob");
        assert_eq!(derive_room_id("alice", "bob"), "alice_bob");
        assert_eq!(derive_room_id("same", "same"), "same_same");
    }

    #[test]
    fn test_open_sessions_allow_everything() {
        assert!(OpenSessions.is_authorized("anyone", "any-room"));
    }

    #[test]
    fn test_paired_rooms() {
        let auth = PairedRooms;
        assert!(auth.is_authorized("alice", "alice_bob"));
        assert!(auth.is_authorized("bob", "alice_bob"));
        assert!(!auth.is_authorized("carol", "alice_bob"));
        // wrong order is not a derived id
        assert!(!auth.is_authorized("alice", "bob_alice"));
        assert!(!auth.is_authorized("alice", "alice_"));
        assert!(!auth.is_authorized("", "_bob"));
    }

    #[test]
    fn test_paired_rooms_with_separator_in_identity() {
        let auth = PairedRooms;
        let room = derive_room_id("a_b", "c");
        assert_eq!(room, "a_b_c");
        assert!(auth.is_authorized("a_b", &room));
        assert!(auth.is_authorized("c", &room));
    }

    #[test]
    fn test_session_registry() {
        let registry = SessionRegistry::new();
        assert!(!registry.is_authorized("alice", "alice_bob"));

        let room = registry.open("bob", "alice");
        assert_eq!(room, "alice_bob");
        assert_eq!(registry.open("alice", "bob"), room);
        assert_eq!(registry.len(), 1);

        assert!(registry.is_authorized("alice", &room));
        assert!(registry.is_authorized("bob", &room));
        assert!(!registry.is_authorized("carol", &room));

        let session = registry.close(&room).unwrap();
        assert_eq!(session.participants, ["alice".to_string(), "bob".to_string()]);
        assert!(!registry.is_authorized("alice", &room));
        assert!(registry.is_empty());
    }
}
