//! Room registry.
//!
//! The registry is the hub's private state: every live agent keyed by its
//! [`AgentId`], and every non-empty room keyed by its [`RoomId`]. It is a
//! plain data structure with no locking; the [`Hub`](crate::hub::Hub) task
//! owns it and is the only caller of its mutating methods.

use crate::message::{AgentId, BroadcastEvent, RoomId};
use crate::metrics;
use crate::room::Room;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

/// A registered agent as the hub sees it.
///
/// Holds the only sender of the agent's outbound queue, so dropping the
/// member closes the queue.
#[derive(Debug)]
pub struct Member {
    /// Agent identifier.
    pub id: AgentId,
    /// Authenticated identity of the connected user.
    pub identity: String,
    /// The room this agent belongs to for its whole lifetime.
    pub room_id: RoomId,
    outbound: mpsc::Sender<Bytes>,
}

impl Member {
    /// Create a member from its outbound queue sender.
    #[must_use]
    pub fn new(
        id: AgentId,
        identity: impl Into<String>,
        room_id: impl Into<RoomId>,
        outbound: mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            id,
            identity: identity.into(),
            room_id: room_id.into(),
            outbound,
        }
    }
}

/// Why the hub dropped a member while fanning out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictReason {
    /// The outbound queue was full: the peer is not keeping up.
    QueueOverflow,
    /// The outbound queue had no reader left.
    Disconnected,
}

impl EvictReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictReason::QueueOverflow => "queue_overflow",
            EvictReason::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for EvictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The agent was removed and its queue closed.
    Removed {
        /// Whether its room became empty and was deleted.
        room_deleted: bool,
    },
    /// The agent was not registered (already removed, or never added).
    NotRegistered,
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fanout {
    /// Members whose queue accepted the payload.
    pub delivered: usize,
    /// Members evicted during this fan-out.
    pub evicted: Vec<(AgentId, EvictReason)>,
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Number of registered agents.
    pub agent_count: usize,
    /// Number of rooms.
    pub room_count: usize,
    /// Agents registered since start.
    pub registered_total: u64,
    /// Broadcast events processed since start.
    pub broadcasts_total: u64,
    /// Payloads enqueued to members since start.
    pub deliveries_total: u64,
    /// Members evicted since start.
    pub evictions_total: u64,
}

/// Membership state of the hub.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    agents: HashMap<AgentId, Member>,
    rooms: HashMap<RoomId, Room>,
    registered_total: u64,
    broadcasts_total: u64,
    deliveries_total: u64,
    evictions_total: u64,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent and put it in its room, creating the room if needed.
    ///
    /// Returns `false` if an agent with the same id is already registered,
    /// in which case the existing member is kept.
    pub fn register(&mut self, member: Member) -> bool {
        if self.agents.contains_key(&member.id) {
            warn!(agent = %member.id, "Agent already registered");
            return false;
        }

        let id = member.id;
        let room_id = member.room_id.clone();
        debug!(agent = %id, identity = %member.identity, room = %room_id, "Registering agent");

        self.agents.insert(id, member);
        self.rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                debug!(room = %room_id, "Creating room");
                Room::new(room_id.clone())
            })
            .join(id);

        self.registered_total += 1;
        metrics::record_registered(self.agents.len(), self.rooms.len());
        true
    }

    /// Remove an agent, close its outbound queue and delete its room if it
    /// is now empty.
    ///
    /// Unregistering an agent that is not present is a no-op.
    pub fn unregister(&mut self, id: AgentId) -> Removal {
        let Some(member) = self.agents.remove(&id) else {
            trace!(agent = %id, "Unregister for unknown agent ignored");
            return Removal::NotRegistered;
        };

        let mut room_deleted = false;
        if let Some(room) = self.rooms.get_mut(&member.room_id) {
            room.leave(id);
            if room.is_empty() {
                self.rooms.remove(&member.room_id);
                room_deleted = true;
                debug!(room = %member.room_id, "Deleted empty room");
            }
        }

        debug!(
            agent = %id,
            identity = %member.identity,
            room = %member.room_id,
            "Unregistered agent"
        );
        // Dropping the member drops the queue's only sender.
        drop(member);

        metrics::set_population(self.agents.len(), self.rooms.len());
        Removal::Removed { room_deleted }
    }

    /// Enqueue the payload for every current member of the room without
    /// blocking. Members whose queue cannot take it are evicted.
    ///
    /// Broadcasting to a room that does not exist is a no-op.
    pub fn broadcast(&mut self, event: &BroadcastEvent) -> Fanout {
        self.broadcasts_total += 1;

        let Some(room) = self.rooms.get(&event.room_id) else {
            trace!(room = %event.room_id, "Broadcast to absent room dropped");
            metrics::record_broadcast(0);
            return Fanout::default();
        };

        let mut fanout = Fanout::default();
        for id in room.members() {
            let Some(member) = self.agents.get(&id) else {
                continue;
            };
            match member.outbound.try_send(event.payload.clone()) {
                Ok(()) => {
                    fanout.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    fanout.evicted.push((id, EvictReason::QueueOverflow));
                }
                Err(TrySendError::Closed(_)) => {
                    fanout.evicted.push((id, EvictReason::Disconnected));
                }
            }
        }

        for (id, reason) in &fanout.evicted {
            warn!(agent = %id, room = %event.room_id, reason = %reason, "Evicting agent");
            self.unregister(*id);
            self.evictions_total += 1;
            metrics::record_eviction(reason.as_str());
        }

        self.deliveries_total += fanout.delivered as u64;
        metrics::record_broadcast(fanout.delivered);
        trace!(
            room = %event.room_id,
            bytes = event.payload.len(),
            recipients = fanout.delivered,
            "Broadcast"
        );
        fanout
    }

    /// Check if an agent is registered.
    #[must_use]
    pub fn is_registered(&self, id: AgentId) -> bool {
        self.agents.contains_key(&id)
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Get the member count for a room (zero if absent).
    #[must_use]
    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(Room::member_count)
            .unwrap_or(0)
    }

    /// Get the members of a room.
    #[must_use]
    pub fn room_members(&self, room_id: &str) -> Vec<AgentId> {
        self.rooms
            .get(room_id)
            .map(|room| room.members().collect())
            .unwrap_or_default()
    }

    /// Get the number of registered agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Get the number of rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Get all room ids.
    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.keys().cloned().collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            agent_count: self.agents.len(),
            room_count: self.rooms.len(),
            registered_total: self.registered_total,
            broadcasts_total: self.broadcasts_total,
            deliveries_total: self.deliveries_total,
            evictions_total: self.evictions_total,
        }
    }

    /// Verify the membership invariants: every room is non-empty, every
    /// room member is registered under that room, and every agent is in
    /// its room.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let rooms_ok = self.rooms.iter().all(|(room_id, room)| {
            !room.is_empty()
                && room.id() == room_id
                && room.members().all(|id| {
                    self.agents
                        .get(&id)
                        .is_some_and(|member| &member.room_id == room_id)
                })
        });
        let agents_ok = self.agents.values().all(|member| {
            self.rooms
                .get(&member.room_id)
                .is_some_and(|room| room.contains(member.id))
        });
        rooms_ok && agents_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn member(identity: &str, room: &str, capacity: usize) -> (Member, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Member::new(AgentId::next(), identity, room, tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            out.push(payload);
        }
        out
    }

    #[test]
    fn test_register_creates_room_lazily() {
        let mut registry = RoomRegistry::new();
        assert!(!registry.room_exists("r1"));

        let (a, _rx) = member("alice", "r1", 8);
        assert!(registry.register(a));
        assert!(registry.room_exists("r1"));
        assert_eq!(registry.member_count("r1"), 1);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_last_leave_deletes_room() {
        let mut registry = RoomRegistry::new();
        let (a, _rx_a) = member("alice", "r1", 8);
        let (b, _rx_b) = member("bob", "r1", 8);
        let (a_id, b_id) = (a.id, b.id);
        registry.register(a);
        registry.register(b);

        assert_eq!(
            registry.unregister(a_id),
            Removal::Removed {
                room_deleted: false
            }
        );
        assert_eq!(registry.member_count("r1"), 1);

        assert_eq!(
            registry.unregister(b_id),
            Removal::Removed { room_deleted: true }
        );
        assert!(!registry.room_exists("r1"));
        assert_eq!(registry.room_count(), 0);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_duplicate_unregister_is_noop() {
        let mut registry = RoomRegistry::new();
        let (a, mut rx_a) = member("alice", "r1", 8);
        let (b, _rx_b) = member("bob", "r1", 8);
        let a_id = a.id;
        registry.register(a);
        registry.register(b);

        assert!(matches!(registry.unregister(a_id), Removal::Removed { .. }));
        assert_eq!(registry.unregister(a_id), Removal::NotRegistered);

        // bob is still there, the count was decremented once
        assert_eq!(registry.member_count("r1"), 1);
        assert_eq!(registry.agent_count(), 1);
        assert_eq!(rx_a.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_duplicate_register_keeps_existing() {
        let mut registry = RoomRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let id = AgentId::next();
        assert!(registry.register(Member::new(id, "alice", "r1", tx.clone())));
        assert!(!registry.register(Member::new(id, "alice", "r2", tx)));

        assert!(registry.room_exists("r1"));
        assert!(!registry.room_exists("r2"));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_broadcast_reaches_every_member_once() {
        let mut registry = RoomRegistry::new();
        let (a, mut rx_a) = member("alice", "r1", 8);
        let (b, mut rx_b) = member("bob", "r1", 8);
        registry.register(a);
        registry.register(b);

        let fanout = registry.broadcast(&BroadcastEvent::new("r1", "hello"));
        assert_eq!(fanout.delivered, 2);
        assert!(fanout.evicted.is_empty());

        assert_eq!(drain(&mut rx_a), vec![Bytes::from("hello")]);
        assert_eq!(drain(&mut rx_b), vec![Bytes::from("hello")]);
    }

    #[test]
    fn test_broadcast_is_scoped_to_room() {
        let mut registry = RoomRegistry::new();
        let (a, mut rx_a) = member("alice", "r1", 8);
        let (c, mut rx_c) = member("carol", "r2", 8);
        registry.register(a);
        registry.register(c);

        registry.broadcast(&BroadcastEvent::new("r1", "x"));
        assert_eq!(drain(&mut rx_a), vec![Bytes::from("x")]);
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn test_broadcast_to_deleted_room_is_noop() {
        let mut registry = RoomRegistry::new();
        let (a, _rx) = member("alice", "r1", 8);
        let a_id = a.id;
        registry.register(a);
        registry.unregister(a_id);

        let fanout = registry.broadcast(&BroadcastEvent::new("r1", "y"));
        assert_eq!(fanout, Fanout::default());
        assert!(!registry.room_exists("r1"));
    }

    #[test]
    fn test_late_joiner_misses_earlier_broadcast() {
        let mut registry = RoomRegistry::new();
        let (a, _rx_a) = member("alice", "r1", 8);
        registry.register(a);
        registry.broadcast(&BroadcastEvent::new("r1", "before"));

        let (b, mut rx_b) = member("bob", "r1", 8);
        registry.register(b);
        registry.broadcast(&BroadcastEvent::new("r1", "after"));

        assert_eq!(drain(&mut rx_b), vec![Bytes::from("after")]);
    }

    #[test]
    fn test_full_queue_evicts_slow_consumer() {
        let mut registry = RoomRegistry::new();
        let (slow, mut rx_slow) = member("slow", "r1", 256);
        let (fast, mut rx_fast) = member("fast", "r1", 1024);
        let slow_id = slow.id;
        registry.register(slow);
        registry.register(fast);

        for i in 0..256 {
            let fanout = registry.broadcast(&BroadcastEvent::new("r1", format!("m{i}")));
            assert_eq!(fanout.delivered, 2);
        }

        let fanout = registry.broadcast(&BroadcastEvent::new("r1", "m256"));
        assert_eq!(fanout.delivered, 1);
        assert_eq!(fanout.evicted, vec![(slow_id, EvictReason::QueueOverflow)]);

        assert!(!registry.is_registered(slow_id));
        assert_eq!(registry.member_count("r1"), 1);
        assert_eq!(registry.stats().evictions_total, 1);

        // The queued messages stay readable, then the queue reports closed.
        assert_eq!(drain(&mut rx_slow).len(), 256);
        assert_eq!(rx_slow.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(drain(&mut rx_fast).len(), 257);
    }

    #[test]
    fn test_closed_queue_evicts_and_deletes_room() {
        let mut registry = RoomRegistry::new();
        let (a, rx) = member("alice", "r1", 8);
        let a_id = a.id;
        registry.register(a);
        drop(rx);

        let fanout = registry.broadcast(&BroadcastEvent::new("r1", "hello"));
        assert_eq!(fanout.evicted, vec![(a_id, EvictReason::Disconnected)]);
        assert!(!registry.room_exists("r1"));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_membership_counts_follow_random_operations() {
        let mut registry = RoomRegistry::new();
        let rooms = ["r0", "r1", "r2", "r3"];
        let mut live: Vec<(AgentId, &str, mpsc::Receiver<Bytes>)> = Vec::new();
        let mut removed: Vec<AgentId> = Vec::new();

        // Deterministic LCG so the sequence is reproducible.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = || {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            (seed >> 33) as usize
        };

        for _ in 0..2_000 {
            match next() % 4 {
                0 | 1 => {
                    let room = rooms[next() % rooms.len()];
                    let (m, rx) = member("user", room, 4);
                    live.push((m.id, room, rx));
                    registry.register(m);
                }
                2 if !live.is_empty() => {
                    let (id, _, _) = live.swap_remove(next() % live.len());
                    assert!(matches!(registry.unregister(id), Removal::Removed { .. }));
                    removed.push(id);
                }
                _ if !removed.is_empty() => {
                    let id = removed[next() % removed.len()];
                    assert_eq!(registry.unregister(id), Removal::NotRegistered);
                }
                _ => {}
            }

            assert!(registry.is_consistent());
            for room in rooms {
                let expected = live.iter().filter(|(_, r, _)| *r == room).count();
                assert_eq!(registry.member_count(room), expected);
                assert_eq!(registry.room_exists(room), expected > 0);
            }
        }
    }
}
