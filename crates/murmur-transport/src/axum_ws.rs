//! Adapter for WebSockets upgraded by axum.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use murmur_protocol::Frame;
use tracing::debug;

use crate::traits::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError};

/// A connection backed by an axum [`WebSocket`].
pub struct AxumConnection {
    id: ConnectionId,
    socket: WebSocket,
    remote_addr: Option<String>,
}

impl AxumConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self {
            id: ConnectionId::generate(),
            socket,
            remote_addr: None,
        }
    }

    /// Record the peer address reported by the HTTP layer.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

impl Connection for AxumConnection {
    type Reader = AxumReader;
    type Writer = AxumWriter;

    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.socket.split();
        (
            AxumReader { stream },
            AxumWriter {
                sink,
                closed: false,
            },
        )
    }
}

/// Reader half of an [`AxumConnection`].
pub struct AxumReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReader for AxumReader {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(Frame::Text(Bytes::from(text)))),
            Some(Ok(Message::Binary(data))) => Ok(Some(Frame::Binary(Bytes::from(data)))),
            Some(Ok(Message::Ping(data))) => Ok(Some(Frame::Ping(Bytes::from(data)))),
            Some(Ok(Message::Pong(data))) => Ok(Some(Frame::Pong(Bytes::from(data)))),
            Some(Ok(Message::Close(reason))) => {
                debug!(reason = ?reason, "Received close frame");
                Ok(Some(Frame::Close))
            }
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => Ok(None),
        }
    }
}

/// Writer half of an [`AxumConnection`].
pub struct AxumWriter {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for AxumWriter {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match frame {
            Frame::Text(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => Message::Text(text),
                Err(e) => Message::Binary(e.into_bytes()),
            },
            Frame::Binary(data) => Message::Binary(data.to_vec()),
            Frame::Ping(data) => Message::Ping(data.to_vec()),
            Frame::Pong(data) => Message::Pong(data.to_vec()),
            Frame::Close => Message::Close(None),
        };

        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }
}
