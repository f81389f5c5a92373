//! Room abstraction for Murmur.
//!
//! A room is a named set of agents that receive each other's broadcasts.
//! It only records membership by [`AgentId`]; the members themselves are
//! owned by the [`RoomRegistry`](crate::registry::RoomRegistry).

use crate::message::{AgentId, RoomId};
use std::collections::HashSet;
use tracing::debug;

/// Maximum room identifier length.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// Validate a room identifier.
///
/// # Errors
///
/// Returns an error message if the identifier is invalid.
pub fn validate_room_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if !id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room id contains invalid characters");
    }
    Ok(())
}

/// A room and its current members.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: HashSet<AgentId>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self {
            id: id.into(),
            members: HashSet::new(),
        }
    }

    /// Get the room identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if an agent is a member.
    #[must_use]
    pub fn contains(&self, agent: AgentId) -> bool {
        self.members.contains(&agent)
    }

    /// Add a member.
    ///
    /// Returns `true` if the agent was not already a member.
    pub fn join(&mut self, agent: AgentId) -> bool {
        let added = self.members.insert(agent);
        if added {
            debug!(
                room = %self.id,
                agent = %agent,
                members = self.members.len(),
                "Agent joined room"
            );
        }
        added
    }

    /// Remove a member.
    ///
    /// Returns `true` if the agent was a member.
    pub fn leave(&mut self, agent: AgentId) -> bool {
        let removed = self.members.remove(&agent);
        if removed {
            debug!(
                room = %self.id,
                agent = %agent,
                members = self.members.len(),
                "Agent left room"
            );
        }
        removed
    }

    /// Iterate over the members.
    pub fn members(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.members.iter().copied()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
