//! # murmur-transport
//!
//! Connection abstraction layer for the Murmur room broadcast hub.
//!
//! - **WebSocket** - standalone tokio-tungstenite listener and client wrapper
//! - **axum** - adapter for sockets upgraded by an axum handler
//! - **memory** - in-process pair for tests and benchmarks
//!
//! Every connection implements [`Connection`] and splits into a
//! [`FrameReader`] and a [`FrameWriter`] that can be driven from separate
//! tasks.
//!
//! ```rust,ignore
//! use murmur_transport::{Connection, FrameReader};
//!
//! async fn drain(conn: impl Connection) {
//!     let (mut reader, _writer) = conn.split();
//!     while let Ok(Some(frame)) = reader.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "axum")]
pub mod axum_ws;

pub use traits::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError};

#[cfg(feature = "axum")]
pub use axum_ws::AxumConnection;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};
