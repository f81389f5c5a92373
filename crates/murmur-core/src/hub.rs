//! The coordinator.
//!
//! A [`Hub`] is a single task that owns the [`RoomRegistry`] and processes
//! one event at a time from three queues: register, unregister and
//! broadcast. Everything else talks to it through a cloneable
//! [`HubHandle`]. Because only the hub task touches membership, none of it
//! needs a lock.
//!
//! ```rust,no_run
//! use murmur_core::{Hub, HubConfig};
//!
//! # async fn example() {
//! let (hub, handle) = Hub::new(HubConfig::default());
//! let task = hub.spawn();
//!
//! handle.publish("alice_bob", "hello").await.ok();
//!
//! handle.shutdown();
//! let stats = task.await.unwrap();
//! # }
//! ```

use crate::message::{AgentId, BroadcastEvent, RoomId};
use crate::registry::{HubStats, Member, RoomRegistry};
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default capacity of each hub event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Hub errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    /// The hub has stopped and no longer accepts events.
    #[error("Hub is not running")]
    Stopped,
}

/// An event processed by the hub.
#[derive(Debug)]
pub enum HubEvent {
    /// Add an agent to the registry and its room.
    Register(Member),
    /// Remove an agent; a no-op if it is already gone.
    Unregister(AgentId),
    /// Fan a payload out to a room.
    Broadcast(BroadcastEvent),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each of the register, unregister and broadcast queues.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// A register event and the reply sent once it has been applied.
type Registration = (Member, oneshot::Sender<bool>);

/// Read-only questions answered between events.
#[derive(Debug)]
enum Query {
    Stats(oneshot::Sender<HubStats>),
    Members(RoomId, oneshot::Sender<Vec<AgentId>>),
}

/// The coordinator task.
pub struct Hub {
    registry: RoomRegistry,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<AgentId>,
    broadcast_rx: mpsc::Receiver<BroadcastEvent>,
    query_rx: mpsc::Receiver<Query>,
    shutdown: CancellationToken,
}

impl Hub {
    /// Create a hub and the handle used to reach it.
    ///
    /// The hub does nothing until [`Hub::spawn`] or [`Hub::run`] is called.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let capacity = config.queue_capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let (query_tx, query_rx) = mpsc::channel(capacity);
        let shutdown = CancellationToken::new();

        info!("Creating hub with config: {:?}", config);

        let hub = Self {
            registry: RoomRegistry::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            query_rx,
            shutdown: shutdown.clone(),
        };
        let handle = HubHandle {
            register: register_tx,
            unregister: unregister_tx,
            broadcast: broadcast_tx,
            query: query_tx,
            shutdown,
        };
        (hub, handle)
    }

    /// Run the hub on the tokio runtime.
    ///
    /// The task resolves to the final statistics once the hub stops.
    pub fn spawn(self) -> JoinHandle<HubStats> {
        tokio::spawn(self.run())
    }

    /// Process events until [`HubHandle::shutdown`] is called or every
    /// handle has been dropped.
    ///
    /// On return the registry is dropped, which closes every agent's
    /// outbound queue.
    pub async fn run(mut self) -> HubStats {
        info!("Hub started");

        loop {
            let event = tokio::select! {
                () = self.shutdown.cancelled() => break,
                Some((member, applied)) = self.register_rx.recv() => {
                    let added = self.registry.register(member);
                    let _ = applied.send(added);
                    continue;
                }
                Some(agent) = self.unregister_rx.recv() => HubEvent::Unregister(agent),
                Some(event) = self.broadcast_rx.recv() => HubEvent::Broadcast(event),
                Some(query) = self.query_rx.recv() => {
                    self.answer(query);
                    continue;
                }
                else => break,
            };
            self.apply(event);
        }

        let stats = self.registry.stats();
        info!(
            agents = stats.agent_count,
            rooms = stats.room_count,
            broadcasts = stats.broadcasts_total,
            evictions = stats.evictions_total,
            "Hub stopped"
        );
        stats
    }

    /// Apply one event to the registry.
    pub fn apply(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(member) => {
                self.registry.register(member);
            }
            HubEvent::Unregister(agent) => {
                self.registry.unregister(agent);
            }
            HubEvent::Broadcast(event) => {
                self.registry.broadcast(&event);
            }
        }
    }

    /// Get the registry.
    #[must_use]
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    fn answer(&self, query: Query) {
        match query {
            Query::Stats(reply) => {
                let _ = reply.send(self.registry.stats());
            }
            Query::Members(room_id, reply) => {
                let _ = reply.send(self.registry.room_members(&room_id));
            }
        }
    }
}

/// Cloneable handle to a running [`Hub`].
#[derive(Debug, Clone)]
pub struct HubHandle {
    register: mpsc::Sender<Registration>,
    unregister: mpsc::Sender<AgentId>,
    broadcast: mpsc::Sender<BroadcastEvent>,
    query: mpsc::Sender<Query>,
    shutdown: CancellationToken,
}

impl HubHandle {
    /// Register an agent and wait until the hub has applied it.
    ///
    /// Any unregister sent after this returns is applied after the
    /// register. Returns `false` if the id was already registered.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is no longer running.
    pub async fn register(&self, member: Member) -> Result<bool, HubError> {
        let (tx, rx) = oneshot::channel();
        self.register
            .send((member, tx))
            .await
            .map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Queue an unregister event.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is no longer running.
    pub async fn unregister(&self, agent: AgentId) -> Result<(), HubError> {
        self.unregister
            .send(agent)
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Queue a broadcast event.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is no longer running.
    pub async fn broadcast(&self, event: BroadcastEvent) -> Result<(), HubError> {
        self.broadcast
            .send(event)
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Queue a broadcast of a raw payload to a room.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is no longer running.
    pub async fn publish(
        &self,
        room_id: impl Into<RoomId>,
        payload: impl Into<Bytes>,
    ) -> Result<(), HubError> {
        self.broadcast(BroadcastEvent::new(room_id, payload)).await
    }

    /// Get hub statistics.
    ///
    /// Queries travel on their own queue, so the answer may not yet reflect
    /// events queued just before it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is no longer running.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (tx, rx) = oneshot::channel();
        self.query
            .send(Query::Stats(tx))
            .await
            .map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Get the current members of a room.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is no longer running.
    pub async fn room_members(&self, room_id: impl Into<RoomId>) -> Result<Vec<AgentId>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.query
            .send(Query::Members(room_id.into(), tx))
            .await
            .map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Stop the hub. Agents see their outbound queues close.
    pub fn shutdown(&self) {
        debug!("Hub shutdown requested");
        self.shutdown.cancel();
    }

    /// Check whether the hub is still accepting events.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.register.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_for_stats(handle: &HubHandle, f: impl Fn(&HubStats) -> bool) -> HubStats {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stats = handle.stats().await.unwrap();
                if f(&stats) {
                    return stats;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("hub did not reach expected state")
    }

    #[test]
    fn test_apply_events_in_order() {
        let (mut hub, _handle) = Hub::new(HubConfig::default());
        let (tx, mut rx) = mpsc::channel(4);
        let id = AgentId::next();

        hub.apply(HubEvent::Register(Member::new(id, "alice", "r1", tx)));
        hub.apply(HubEvent::Broadcast(BroadcastEvent::new("r1", "hello")));
        hub.apply(HubEvent::Unregister(id));
        hub.apply(HubEvent::Unregister(id));

        assert_eq!(rx.try_recv().unwrap(), Bytes::from("hello"));
        assert!(rx.try_recv().is_err());
        assert!(!hub.registry().room_exists("r1"));
    }

    #[tokio::test]
    async fn test_hub_processes_events() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let task = hub.spawn();

        let (tx, mut rx) = mpsc::channel(4);
        let id = AgentId::next();
        handle
            .register(Member::new(id, "alice", "r1", tx))
            .await
            .unwrap();
        wait_for_stats(&handle, |s| s.agent_count == 1).await;
        assert_eq!(handle.room_members("r1").await.unwrap(), vec![id]);

        handle.publish("r1", "hello").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("hello"));

        handle.unregister(id).await.unwrap();
        let stats = wait_for_stats(&handle, |s| s.agent_count == 0).await;
        assert_eq!(stats.room_count, 0);
        assert_eq!(rx.recv().await, None);

        handle.shutdown();
        let final_stats = task.await.unwrap();
        assert_eq!(final_stats.registered_total, 1);
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_closes_queues_and_rejects_events() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let task = hub.spawn();

        let (tx, mut rx) = mpsc::channel(4);
        handle
            .register(Member::new(AgentId::next(), "alice", "r1", tx))
            .await
            .unwrap();
        wait_for_stats(&handle, |s| s.agent_count == 1).await;

        handle.shutdown();
        task.await.unwrap();

        assert_eq!(rx.recv().await, None);
        assert_eq!(handle.publish("r1", "late").await, Err(HubError::Stopped));
        assert_eq!(handle.stats().await, Err(HubError::Stopped));
    }

    #[tokio::test]
    async fn test_register_resolves_after_it_is_applied() {
        let (hub, handle) = Hub::new(HubConfig::default());
        hub.spawn();

        let (tx, _rx) = mpsc::channel(4);
        let id = AgentId::next();
        let member = Member::new(id, "alice", "r1", tx.clone());
        assert_eq!(handle.register(member).await, Ok(true));

        // an unregister queued now cannot overtake the register
        handle.unregister(id).await.unwrap();
        let stats = wait_for_stats(&handle, |s| s.agent_count == 0).await;
        assert_eq!(stats.room_count, 0);
        assert_eq!(stats.registered_total, 1);

        let (dup_tx, _dup_rx) = mpsc::channel(4);
        let other = AgentId::next();
        let member = Member::new(other, "bob", "r1", dup_tx);
        assert_eq!(handle.register(member).await, Ok(true));
        let duplicate = Member::new(other, "bob", "r1", tx);
        assert_eq!(handle.register(duplicate).await, Ok(false));
        assert_eq!(handle.room_members("r1").await.unwrap(), vec![other]);
    }

    #[tokio::test]
    async fn test_hub_stops_when_handles_dropped() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let task = hub.spawn();
        drop(handle);
        let stats = task.await.unwrap();
        assert_eq!(stats, HubStats::default());
    }
}
