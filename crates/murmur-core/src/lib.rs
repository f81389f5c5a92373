//! # murmur-core
//!
//! Room registry, broadcast coordinator and connection agents for the
//! Murmur room broadcast hub.
//!
//! - **Hub** - single task that owns all membership and fans broadcasts out
//! - **Registry** - agents by id and rooms by id, with backpressure eviction
//! - **Agent** - per-connection inbound and outbound pumps
//! - **Session** - who may join which room
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  register / broadcast   ┌─────────────┐
//! │    Agent    │────────────────────────▶│     Hub     │
//! │ (two pumps) │◀────────────────────────│ (registry)  │
//! └─────────────┘   bounded outbound queue └─────────────┘
//!        │                                        │
//!        ▼                                        ▼
//!  ┌─────────────┐                         ┌─────────────┐
//!  │ Connection  │                         │    Room     │
//!  └─────────────┘                         └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use murmur_core::{Agent, AgentConfig, Hub, HubConfig};
//! use murmur_transport::memory;
//!
//! # async fn example() {
//! let (hub, handle) = Hub::new(HubConfig::default());
//! hub.spawn();
//!
//! let (conn, _peer) = memory::pair();
//! let agent = Agent::new("alice", "alice_bob", conn, AgentConfig::default());
//! let teardown = agent.run(&handle).await;
//! println!("{:?}", teardown.inbound);
//! # }
//! ```

pub mod agent;
pub mod hub;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod room;
pub mod session;

pub use agent::{Agent, AgentConfig, AgentError, ConnectionState, PumpExit, Teardown};
pub use hub::{Hub, HubConfig, HubError, HubEvent, HubHandle};
pub use message::{AgentId, BroadcastEvent, RoomId};
pub use registry::{EvictReason, Fanout, HubStats, Member, Removal, RoomRegistry};
pub use room::{validate_room_id, Room};
pub use session::{derive_room_id, OpenSessions, PairedRooms, SessionAuthority, SessionRegistry};
