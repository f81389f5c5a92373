//! Identifiers and the broadcast event.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A room identifier.
pub type RoomId = String;

/// Source of agent identifiers.
static AGENT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a connection agent.
///
/// The registry keys every member by this value; rooms hold sets of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(u64);

impl AgentId {
    /// Allocate the next identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(AGENT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent_{}", self.0)
    }
}

/// An instruction to fan a payload out to every current member of a room.
#[derive(Debug, Clone)]
pub struct BroadcastEvent {
    /// Target room.
    pub room_id: RoomId,
    /// Opaque payload.
    pub payload: Bytes,
    /// Agent whose inbound pump produced the event, if any.
    pub source: Option<AgentId>,
}

impl BroadcastEvent {
    /// Create a new broadcast event.
    #[must_use]
    pub fn new(room_id: impl Into<RoomId>, payload: impl Into<Bytes>) -> Self {
        Self {
            room_id: room_id.into(),
            payload: payload.into(),
            source: None,
        }
    }

    /// Tag the event with the agent that sent it.
    #[must_use]
    pub fn with_source(mut self, source: AgentId) -> Self {
        self.source = Some(source);
        self
    }

    /// Get the payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_ids_are_unique() {
        let a = AgentId::next();
        let b = AgentId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert!(a.to_string().starts_with("agent_"));
    }

    #[test]
    fn test_broadcast_event() {
        let source = AgentId::next();
        let event = BroadcastEvent::new("r1", b"hello".to_vec()).with_source(source);
        assert_eq!(event.room_id, "r1");
        assert_eq!(&event.payload[..], b"hello");
        assert_eq!(event.payload_size(), 5);
        assert_eq!(event.source, Some(source));
    }
}
