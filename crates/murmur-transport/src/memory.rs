//! In-process transport.
//!
//! [`pair`] returns a [`MemoryConnection`] for the server side and a
//! [`MemoryPeer`] that plays the remote client. Used by tests and benchmarks
//! to drive agents without sockets.

use async_trait::async_trait;
use bytes::Bytes;
use murmur_protocol::{codec, Frame};
use tokio::sync::mpsc;

use crate::traits::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError};

/// Frames buffered towards the peer before the writer blocks.
pub const DEFAULT_PEER_CAPACITY: usize = 1024;

type Inbound = Result<Frame, TransportError>;

/// Create a connected pair with the default peer buffer.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    pair_with_capacity(DEFAULT_PEER_CAPACITY)
}

/// Create a connected pair whose writer blocks once `capacity` frames are
/// waiting for the peer.
///
/// A small capacity together with a peer that never reads models a slow
/// consumer.
#[must_use]
pub fn pair_with_capacity(capacity: usize) -> (MemoryConnection, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));

    let conn = MemoryConnection {
        id: ConnectionId::generate(),
        inbound: inbound_rx,
        outbound: outbound_tx,
    };
    let peer = MemoryPeer {
        tx: Some(inbound_tx),
        rx: outbound_rx,
    };
    (conn, peer)
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::Sender<Frame>,
}

impl Connection for MemoryConnection {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        (
            MemoryReader {
                inbound: self.inbound,
            },
            MemoryWriter {
                outbound: Some(self.outbound),
            },
        )
    }
}

/// Reader half of a [`MemoryConnection`].
pub struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Writer half of a [`MemoryConnection`].
pub struct MemoryWriter {
    outbound: Option<mpsc::Sender<Frame>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        tx.send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        Ok(())
    }
}

/// The remote end of an in-memory connection.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Inbound>>,
    rx: mpsc::Receiver<Frame>,
}

impl MemoryPeer {
    /// Send a frame to the server side.
    ///
    /// # Errors
    ///
    /// Returns an error if either side has closed.
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(Ok(frame))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a text message to the server side.
    ///
    /// # Errors
    ///
    /// Returns an error if either side has closed.
    pub fn send_text(&self, payload: impl Into<Bytes>) -> Result<(), TransportError> {
        self.send(Frame::Text(payload.into()))
    }

    /// Make the server's next read fail with `error`.
    ///
    /// # Errors
    ///
    /// Returns an error if either side has closed.
    pub fn fail(&self, error: TransportError) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(Err(error))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Hang up without a close frame. The server's next read returns `None`.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Receive the next frame written by the server.
    ///
    /// Returns `None` once the server has closed and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Receive a frame if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Receive the next text frame, skipping pings, and split it into its
    /// coalesced messages.
    ///
    /// Returns `None` on a close frame or once the server has closed.
    pub async fn recv_messages(&mut self) -> Option<Vec<Bytes>> {
        loop {
            match self.rx.recv().await? {
                Frame::Text(data) | Frame::Binary(data) => return Some(codec::split_bytes(&data)),
                Frame::Ping(_) | Frame::Pong(_) => continue,
                Frame::Close => return None,
            }
        }
    }
}
