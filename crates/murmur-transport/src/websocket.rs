//! WebSocket transport implementation.
//!
//! This module provides a standalone WebSocket transport using tokio-tungstenite.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use murmur_protocol::{Frame, ProtocolError, MAX_MESSAGE_SIZE};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_async_with_config,
    tungstenite::{
        error::CapacityError, protocol::WebSocketConfig as ProtocolConfig, Error as WsError,
        Message,
    },
    WebSocketStream,
};
use tracing::{debug, error, info};

use crate::traits::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// WebSocket transport.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new WebSocket transport with default config.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Accept the next connection and complete its WebSocket handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP accept or the handshake fails.
    pub async fn accept(&self) -> Result<WebSocketConnection<TcpStream>, TransportError> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Io)?;

        debug!("Accepted TCP connection from {}", addr);

        let mut protocol = ProtocolConfig::default();
        protocol.max_message_size = Some(self.config.max_message_size);

        let ws_stream = accept_async_with_config(stream, Some(protocol))
            .await
            .map_err(|e| {
                error!("WebSocket handshake failed: {}", e);
                TransportError::Other(format!("WebSocket handshake failed: {}", e))
            })?;

        debug!("WebSocket handshake completed with {}", addr);

        Ok(WebSocketConnection::new(ws_stream, Some(addr)))
    }
}

/// A WebSocket connection over any byte stream.
pub struct WebSocketConnection<S> {
    id: ConnectionId,
    stream: WebSocketStream<S>,
    remote_addr: Option<SocketAddr>,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an established WebSocket stream.
    #[must_use]
    pub fn new(stream: WebSocketStream<S>, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            id: ConnectionId::generate(),
            stream,
            remote_addr,
        }
    }
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Reader = WebSocketReader<S>;
    type Writer = WebSocketWriter<S>;

    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.stream.split();
        (
            WebSocketReader { stream },
            WebSocketWriter {
                sink,
                closed: false,
            },
        )
    }
}

/// Reader half of a [`WebSocketConnection`].
pub struct WebSocketReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> FrameReader for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            let frame = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => Frame::Text(Bytes::from(text)),
                Some(Ok(Message::Binary(data))) => Frame::Binary(Bytes::from(data)),
                // tungstenite queues the pong reply itself
                Some(Ok(Message::Ping(data))) => Frame::Ping(Bytes::from(data)),
                Some(Ok(Message::Pong(data))) => Frame::Pong(Bytes::from(data)),
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    Frame::Close
                }
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    debug!("Connection closed");
                    return Ok(None);
                }
                Some(Err(WsError::Capacity(CapacityError::MessageTooLong { size, max_size }))) => {
                    return Err(ProtocolError::FrameTooLarge {
                        size,
                        max: max_size,
                    }
                    .into());
                }
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            };
            return Ok(Some(frame));
        }
    }
}

/// Writer half of a [`WebSocketConnection`].
pub struct WebSocketWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    closed: bool,
}

#[async_trait]
impl<S> FrameWriter for WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
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

        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(format!("Failed to close: {}", e))),
        }
    }
}

/// Complete a server-side WebSocket handshake on an accepted TCP stream.
///
/// # Errors
///
/// Returns an error if the handshake fails.
pub async fn upgrade_to_websocket(
    stream: TcpStream,
    max_message_size: usize,
) -> Result<WebSocketConnection<TcpStream>, TransportError> {
    let addr = stream.peer_addr().map_err(TransportError::Io)?;

    let mut protocol = ProtocolConfig::default();
    protocol.max_message_size = Some(max_message_size);

    let ws_stream = accept_async_with_config(stream, Some(protocol))
        .await
        .map_err(|e| TransportError::Other(format!("WebSocket handshake failed: {}", e)))?;

    Ok(WebSocketConnection::new(ws_stream, Some(addr)))
}
