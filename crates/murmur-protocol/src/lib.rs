//! # murmur-protocol
//!
//! Wire framing for the Murmur room broadcast hub.
//!
//! Murmur has no envelope format of its own: each application message is an
//! opaque payload carried in a WebSocket text frame, bounded at
//! [`MAX_MESSAGE_SIZE`] bytes. Messages flushed together are joined with a
//! single newline byte.
//!
//! ## Example
//!
//! ```rust
//! use murmur_protocol::codec;
//!
//! let frame = codec::coalesce(["hello", "world"]).unwrap();
//! assert_eq!(&frame[..], b"hello\nworld");
//!
//! let messages: Vec<&[u8]> = codec::split(&frame).collect();
//! assert_eq!(messages, vec![b"hello".as_slice(), b"world".as_slice()]);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{Coalescer, ProtocolError, DELIMITER, MAX_MESSAGE_SIZE};
pub use frames::{Frame, FrameType};
