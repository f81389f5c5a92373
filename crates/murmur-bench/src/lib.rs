//! Fixtures shared by the Murmur benchmarks.

use bytes::Bytes;
use murmur_core::{AgentId, Member, RoomRegistry};
use tokio::sync::mpsc;

/// Build a registry with `members` agents in one room.
///
/// Returns the receivers so the queues stay open; drain them between
/// iterations or the members get evicted once `capacity` fills up.
pub fn populated_registry(
    room: &str,
    members: usize,
    capacity: usize,
) -> (RoomRegistry, Vec<mpsc::Receiver<Bytes>>) {
    let mut registry = RoomRegistry::new();
    let receivers = (0..members)
        .map(|i| {
            let (tx, rx) = mpsc::channel(capacity);
            registry.register(Member::new(AgentId::next(), format!("user-{i}"), room, tx));
            rx
        })
        .collect();
    (registry, receivers)
}

/// Empty every queue and return how many payloads were waiting.
pub fn drain(receivers: &mut [mpsc::Receiver<Bytes>]) -> usize {
    receivers
        .iter_mut()
        .map(|rx| {
            let mut n = 0;
            while rx.try_recv().is_ok() {
                n += 1;
            }
            n
        })
        .sum()
}
