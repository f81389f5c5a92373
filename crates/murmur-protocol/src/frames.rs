//! Frame types for the Murmur wire protocol.
//!
//! Murmur rides directly on WebSocket framing. Application payloads are
//! opaque to the hub; only the control frames (ping, pong, close) carry
//! meaning of their own.

use bytes::Bytes;
use std::fmt;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameType::Text => "text",
            FrameType::Binary => "binary",
            FrameType::Ping => "ping",
            FrameType::Pong => "pong",
            FrameType::Close => "close",
        };
        f.write_str(name)
    }
}

/// A single frame exchanged with a connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// An application message, or several coalesced messages joined by
    /// [`DELIMITER`](crate::codec::DELIMITER).
    Text(Bytes),

    /// An application message the peer sent as a binary frame.
    Binary(Bytes),

    /// Keepalive probe.
    Ping(Bytes),

    /// Keepalive acknowledgment.
    Pong(Bytes),

    /// Orderly close.
    Close,
}

impl Frame {
    /// Create a text frame.
    #[must_use]
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Frame::Text(payload.into())
    }

    /// Create an empty ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping(Bytes::new())
    }

    /// Create an empty pong frame.
    #[must_use]
    pub fn pong() -> Self {
        Frame::Pong(Bytes::new())
    }

    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Text(_) => FrameType::Text,
            Frame::Binary(_) => FrameType::Binary,
            Frame::Ping(_) => FrameType::Ping,
            Frame::Pong(_) => FrameType::Pong,
            Frame::Close => FrameType::Close,
        }
    }

    /// Whether this frame carries an application payload.
    #[must_use]
    pub fn is_payload(&self) -> bool {
        matches!(self, Frame::Text(_) | Frame::Binary(_))
    }

    /// Get the application payload, if any.
    #[must_use]
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Frame::Text(data) | Frame::Binary(data) => Some(data),
            _ => None,
        }
    }

    /// Consume the frame, returning the application payload, if any.
    #[must_use]
    pub fn into_payload(self) -> Option<Bytes> {
        match self {
            Frame::Text(data) | Frame::Binary(data) => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_types() {
        assert_eq!(Frame::text("hi").frame_type(), FrameType::Text);
        assert_eq!(Frame::ping().frame_type(), FrameType::Ping);
        assert_eq!(Frame::pong().frame_type(), FrameType::Pong);
        assert_eq!(Frame::Close.frame_type(), FrameType::Close);
        assert_eq!(FrameType::Binary.to_string(), "binary");
    }

    #[test]
    fn test_payload_access() {
        let frame = Frame::Binary(Bytes::from_static(b"\x01\x02"));
        assert!(frame.is_payload());
        assert_eq!(frame.payload().map(|p| p.len()), Some(2));

        assert!(!Frame::ping().is_payload());
        assert!(Frame::Close.into_payload().is_none());
        assert_eq!(
            Frame::text("hello").into_payload(),
            Some(Bytes::from_static(b"hello"))
        );
    }
}
