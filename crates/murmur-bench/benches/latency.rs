//! Latency benchmarks for Murmur.
//!
//! These benchmarks focus on measuring end-to-end latency, from a
//! broadcast entering the hub to the frame reaching a peer.

use criterion::{criterion_group, criterion_main, Criterion};
use murmur_bench::{drain, populated_registry};
use murmur_core::{Agent, AgentConfig, BroadcastEvent, Hub, HubConfig, HubHandle};
use murmur_transport::memory::{self, MemoryPeer};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

/// Benchmark broadcast + receive on the bare registry.
fn bench_registry_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_latency");

    for members in [1usize, 10] {
        group.bench_function(format!("{members}_members"), |b| {
            b.iter_custom(|iters| {
                let (mut registry, mut rxs) = populated_registry("test", members, 256);

                let start = Instant::now();
                for _ in 0..iters {
                    registry.broadcast(&BroadcastEvent::new("test", vec![0u8; 64]));
                    drain(&mut rxs);
                }
                start.elapsed()
            });
        });
    }

    group.finish();
}

async fn room_with_peers(handle: &HubHandle, room: &str, members: usize) -> Vec<MemoryPeer> {
    let mut peers = Vec::with_capacity(members);
    for i in 0..members {
        let (conn, peer) = memory::pair();
        let agent = Agent::new(format!("user-{i}"), room, conn, AgentConfig::default());
        let handle = handle.clone();
        tokio::spawn(async move { agent.run(&handle).await });
        peers.push(peer);
    }

    while handle
        .stats()
        .await
        .map(|s| s.agent_count < members)
        .unwrap_or(false)
    {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    peers
}

/// Benchmark publish through the hub until every member's peer has the frame.
fn bench_hub_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("hub_roundtrip");
    let rt = Runtime::new().unwrap();

    for members in [1usize, 10] {
        group.bench_function(format!("{members}_members"), |b| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let (hub, handle) = Hub::new(HubConfig::default());
                    let hub_task = hub.spawn();
                    let mut peers = room_with_peers(&handle, "test", members).await;

                    let start = Instant::now();
                    for _ in 0..iters {
                        handle.publish("test", vec![0u8; 64]).await.unwrap();
                        for peer in &mut peers {
                            let _ = peer.recv_messages().await;
                        }
                    }
                    let elapsed = start.elapsed();

                    handle.shutdown();
                    let _ = hub_task.await;
                    elapsed
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_registry_latency, bench_hub_roundtrip);
criterion_main!(benches);
