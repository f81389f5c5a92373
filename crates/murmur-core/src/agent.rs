//! Connection agents.
//!
//! An [`Agent`] owns one authorized connection. Running it registers the
//! agent with the hub and starts two pumps as separate tasks:
//!
//! - the inbound pump reads frames under a read deadline and turns each
//!   payload into a broadcast to the agent's room;
//! - the outbound pump drains the agent's queue to the wire, coalescing
//!   whatever is already queued, and sends keepalive pings.
//!
//! The pumps share a [`CancellationToken`]. Whichever exits first cancels
//! it, so the other one follows.

use crate::hub::HubHandle;
use crate::message::{AgentId, BroadcastEvent, RoomId};
use crate::metrics;
use crate::registry::Member;
use bytes::Bytes;
use murmur_protocol::{codec, Coalescer, Frame, ProtocolError, MAX_MESSAGE_SIZE};
use murmur_transport::{Connection, FrameReader, FrameWriter, TransportError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Default outbound queue capacity per agent.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default read deadline.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Default write deadline.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Largest accepted inbound payload in bytes.
    pub max_message_size: usize,
    /// Time allowed between pongs before the connection is dropped.
    pub read_timeout: Duration,
    /// Time allowed for a single frame write.
    pub write_timeout: Duration,
    /// Keepalive period. Must be shorter than `read_timeout`.
    pub ping_interval: Duration,
    /// Capacity of the outbound queue.
    pub queue_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            ping_interval: ping_interval_for(DEFAULT_READ_TIMEOUT),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl AgentConfig {
    /// Set the read deadline. The ping interval follows at nine tenths of it.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self.ping_interval = ping_interval_for(timeout);
        self
    }

    /// Set the write deadline.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the inbound payload limit.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the outbound queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

/// Keepalive period for a given read deadline.
#[must_use]
pub fn ping_interval_for(read_timeout: Duration) -> Duration {
    read_timeout * 9 / 10
}

/// Errors that end a connection.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Reading from the connection failed.
    #[error("Read failed: {0}")]
    Read(TransportError),

    /// The peer sent a payload over the limit.
    #[error("Message size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// No pong arrived within the read deadline.
    #[error("Read deadline exceeded")]
    ReadDeadlineExceeded,

    /// Writing to the connection failed.
    #[error("Write failed: {0}")]
    Write(TransportError),

    /// A write did not complete within the write deadline.
    #[error("Write deadline exceeded")]
    WriteDeadlineExceeded,
}

impl AgentError {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Read(_) => "read",
            AgentError::FrameTooLarge { .. } => "frame_too_large",
            AgentError::ReadDeadlineExceeded => "read_deadline",
            AgentError::Write(_) => "write",
            AgentError::WriteDeadlineExceeded => "write_deadline",
        }
    }
}

impl From<ProtocolError> for AgentError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::FrameTooLarge { size, max } => AgentError::FrameTooLarge { size, max },
        }
    }
}

/// Lifecycle of a connection.
///
/// States only move forward. `Connecting` covers the handshake before an
/// agent exists; [`Agent::new`] starts at `Authorized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    Connecting,
    Authorized,
    Registered,
    Active,
    Unregistering,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authorized => "authorized",
            ConnectionState::Registered => "registered",
            ConnectionState::Active => "active",
            ConnectionState::Unregistering => "unregistering",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How a pump ended.
#[derive(Debug)]
pub enum PumpExit {
    /// The peer sent a close frame or the stream ended.
    PeerClosed,
    /// The other pump closed the connection.
    Closed,
    /// The hub closed the outbound queue; a close frame was sent.
    QueueClosed,
    /// The hub was not running.
    HubStopped,
    /// The connection failed.
    Failed(AgentError),
    /// The pump task panicked or was cancelled.
    Aborted,
}

impl PumpExit {
    /// Get the error, if the pump failed.
    #[must_use]
    pub fn error(&self) -> Option<&AgentError> {
        match self {
            PumpExit::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Report returned once an agent has fully shut down.
#[derive(Debug)]
pub struct Teardown {
    /// The agent that shut down.
    pub agent: AgentId,
    /// Its room.
    pub room_id: RoomId,
    /// How the inbound pump ended.
    pub inbound: PumpExit,
    /// How the outbound pump ended.
    pub outbound: PumpExit,
}

/// An authorized connection bound to one room.
pub struct Agent<C: Connection> {
    id: AgentId,
    identity: String,
    room_id: RoomId,
    connection: C,
    config: AgentConfig,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl<C: Connection> Agent<C> {
    /// Create an agent for a connection that has already been authorized
    /// for `room_id`.
    pub fn new(
        identity: impl Into<String>,
        room_id: impl Into<RoomId>,
        connection: C,
        config: AgentConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Authorized);
        Self {
            id: AgentId::next(),
            identity: identity.into(),
            room_id: room_id.into(),
            connection,
            config,
            state: Arc::new(state),
        }
    }

    /// Get the agent id.
    #[must_use]
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Get the identity of the connected user.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Get the room id.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Watch the connection state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Register with the hub and pump frames until the connection ends.
    ///
    /// Resolves once both pumps have exited; the state is then `Closed`.
    pub async fn run(self, hub: &HubHandle) -> Teardown {
        let Agent {
            id,
            identity,
            room_id,
            connection,
            config,
            state,
        } = self;

        let conn_id = connection.id().clone();
        let remote = connection.remote_addr();
        let (reader, mut writer) = connection.split();

        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_capacity.max(1));
        let member = Member::new(id, identity.clone(), room_id.clone(), outbound_tx);

        // The pumps start only after the hub has applied the registration,
        // so their unregister can never overtake it.
        if hub.register(member).await.is_err() {
            warn!(agent = %id, room = %room_id, "Hub not running, dropping connection");
            let _ = time::timeout(config.write_timeout, writer.close()).await;
            advance(&state, ConnectionState::Closed);
            return Teardown {
                agent: id,
                room_id,
                inbound: PumpExit::HubStopped,
                outbound: PumpExit::HubStopped,
            };
        }
        advance(&state, ConnectionState::Registered);
        info!(
            agent = %id,
            identity = %identity,
            room = %room_id,
            connection = %conn_id,
            remote = remote.as_deref().unwrap_or("unknown"),
            "Agent connected"
        );

        let closing = CancellationToken::new();

        let inbound = InboundPump {
            id,
            room_id: room_id.clone(),
            hub: hub.clone(),
            max_message_size: config.max_message_size,
            read_timeout: config.read_timeout,
            closing: closing.clone(),
            state: Arc::clone(&state),
        };
        let outbound = OutboundPump {
            id,
            write_timeout: config.write_timeout,
            ping_interval: config.ping_interval,
            closing,
        };

        let inbound = tokio::spawn(inbound.run(reader));
        let outbound = tokio::spawn(outbound.run(outbound_rx, writer));
        advance(&state, ConnectionState::Active);

        let (inbound, outbound) = tokio::join!(inbound, outbound);
        let inbound = inbound.unwrap_or_else(|e| {
            warn!(agent = %id, error = %e, "Inbound pump aborted");
            PumpExit::Aborted
        });
        let outbound = outbound.unwrap_or_else(|e| {
            warn!(agent = %id, error = %e, "Outbound pump aborted");
            PumpExit::Aborted
        });

        advance(&state, ConnectionState::Closed);
        info!(
            agent = %id,
            room = %room_id,
            inbound = ?inbound,
            outbound = ?outbound,
            "Agent disconnected"
        );

        Teardown {
            agent: id,
            room_id,
            inbound,
            outbound,
        }
    }
}

fn advance(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state.send_if_modified(|current| {
        if next > *current {
            *current = next;
            true
        } else {
            false
        }
    });
}

struct InboundPump {
    id: AgentId,
    room_id: RoomId,
    hub: HubHandle,
    max_message_size: usize,
    read_timeout: Duration,
    closing: CancellationToken,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl InboundPump {
    async fn run<R: FrameReader>(self, mut reader: R) -> PumpExit {
        let exit = self.pump(&mut reader).await;

        match &exit {
            PumpExit::Failed(err) => {
                warn!(agent = %self.id, error = %err, "Inbound pump failed");
                metrics::record_error(err.kind());
            }
            other => debug!(agent = %self.id, exit = ?other, "Inbound pump stopped"),
        }

        advance(&self.state, ConnectionState::Unregistering);
        if self.hub.unregister(self.id).await.is_err() {
            debug!(agent = %self.id, "Hub already stopped");
        }
        self.closing.cancel();
        exit
    }

    async fn pump<R: FrameReader>(&self, reader: &mut R) -> PumpExit {
        let mut deadline = Instant::now() + self.read_timeout;

        loop {
            let result = tokio::select! {
                () = self.closing.cancelled() => return PumpExit::Closed,
                result = time::timeout_at(deadline, reader.recv()) => result,
            };

            let frame = match result {
                Err(_) => return PumpExit::Failed(AgentError::ReadDeadlineExceeded),
                Ok(Err(TransportError::Protocol(err))) => return PumpExit::Failed(err.into()),
                Ok(Err(TransportError::ConnectionClosed)) | Ok(Ok(None)) => {
                    return PumpExit::PeerClosed
                }
                Ok(Err(err)) => return PumpExit::Failed(AgentError::Read(err)),
                Ok(Ok(Some(frame))) => frame,
            };

            let payload = match frame {
                Frame::Text(payload) | Frame::Binary(payload) => payload,
                Frame::Pong(_) => {
                    deadline = Instant::now() + self.read_timeout;
                    trace!(agent = %self.id, "Pong received");
                    continue;
                }
                // answered by the transport
                Frame::Ping(_) => continue,
                Frame::Close => return PumpExit::PeerClosed,
            };

            if let Err(err) = codec::check_size(&payload, self.max_message_size) {
                return PumpExit::Failed(err.into());
            }
            metrics::record_message(payload.len(), "inbound");

            let event = BroadcastEvent::new(self.room_id.clone(), payload).with_source(self.id);
            tokio::select! {
                () = self.closing.cancelled() => return PumpExit::Closed,
                sent = self.hub.broadcast(event) => {
                    if sent.is_err() {
                        return PumpExit::HubStopped;
                    }
                }
            }
        }
    }
}

struct OutboundPump {
    id: AgentId,
    write_timeout: Duration,
    ping_interval: Duration,
    closing: CancellationToken,
}

impl OutboundPump {
    async fn run<W: FrameWriter>(
        self,
        mut queue: mpsc::Receiver<Bytes>,
        mut writer: W,
    ) -> PumpExit {
        let exit = self.pump(&mut queue, &mut writer).await;

        match &exit {
            PumpExit::Failed(err) => {
                warn!(agent = %self.id, error = %err, "Outbound pump failed");
                metrics::record_error(err.kind());
            }
            other => debug!(agent = %self.id, exit = ?other, "Outbound pump stopped"),
        }

        self.closing.cancel();
        match time::timeout(self.write_timeout, writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(agent = %self.id, error = %err, "Error closing connection"),
            Err(_) => debug!(agent = %self.id, "Timed out closing connection"),
        }
        exit
    }

    async fn pump<W: FrameWriter>(
        &self,
        queue: &mut mpsc::Receiver<Bytes>,
        writer: &mut W,
    ) -> PumpExit {
        let period = self.ping_interval.max(Duration::from_millis(1));
        let mut keepalive = time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.closing.cancelled() => return PumpExit::Closed,
                message = queue.recv() => {
                    let Some(first) = message else {
                        if let Err(err) = self.write(writer, Frame::Close).await {
                            debug!(agent = %self.id, error = %err, "Failed to send close frame");
                        }
                        return PumpExit::QueueClosed;
                    };

                    let (frame, count) = drain_batch(first, queue);
                    let bytes = frame.len();
                    if let Err(err) = self.write(writer, Frame::Text(frame)).await {
                        return PumpExit::Failed(err);
                    }
                    metrics::record_message(bytes, "outbound");
                    trace!(agent = %self.id, messages = count, bytes, "Flushed");
                }
                _ = keepalive.tick() => {
                    if let Err(err) = self.write(writer, Frame::ping()).await {
                        return PumpExit::Failed(err);
                    }
                    trace!(agent = %self.id, "Ping sent");
                }
            }
        }
    }

    async fn write<W: FrameWriter>(&self, writer: &mut W, frame: Frame) -> Result<(), AgentError> {
        match time::timeout(self.write_timeout, writer.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(AgentError::Write(err)),
            Err(_) => Err(AgentError::WriteDeadlineExceeded),
        }
    }
}

/// Join `first` with every message already waiting in the queue.
///
/// Returns the frame payload and the number of messages in it. A lone
/// message is passed through without copying.
fn drain_batch(first: Bytes, queue: &mut mpsc::Receiver<Bytes>) -> (Bytes, usize) {
    let Ok(second) = queue.try_recv() else {
        return (first, 1);
    };

    let mut batch = Coalescer::new(&first);
    batch.push(&second);
    while let Ok(message) = queue.try_recv() {
        batch.push(&message);
    }
    let count = batch.count();
    (batch.finish(), count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig};
    use murmur_transport::memory;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.max_message_size, 512);
        assert_eq!(config.read_timeout, Duration::from_secs(60));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.ping_interval, Duration::from_secs(54));
        assert_eq!(config.queue_capacity, 256);
    }

    #[test]
    fn test_ping_interval_follows_read_timeout() {
        let config = AgentConfig::default().with_read_timeout(Duration::from_secs(10));
        assert_eq!(config.ping_interval, Duration::from_secs(9));
        assert!(config.ping_interval < config.read_timeout);
    }

    #[test]
    fn test_states_are_ordered() {
        assert!(ConnectionState::Connecting < ConnectionState::Authorized);
        assert!(ConnectionState::Active < ConnectionState::Unregistering);
        assert!(ConnectionState::Unregistering < ConnectionState::Closed);
        assert_eq!(ConnectionState::Closed.to_string(), "closed");
    }

    #[test]
    fn test_advance_never_goes_back() {
        let (state, rx) = watch::channel(ConnectionState::Authorized);
        advance(&state, ConnectionState::Unregistering);
        advance(&state, ConnectionState::Active);
        assert_eq!(*rx.borrow(), ConnectionState::Unregistering);
    }

    #[test]
    fn test_protocol_error_maps_to_frame_too_large() {
        let err: AgentError = ProtocolError::FrameTooLarge { size: 513, max: 512 }.into();
        assert!(matches!(err, AgentError::FrameTooLarge { size: 513, max: 512 }));
        assert_eq!(err.kind(), "frame_too_large");
    }

    #[test]
    fn test_drain_batch_single_message() {
        let (tx, mut rx) = mpsc::channel(8);
        drop(tx);
        let (frame, count) = drain_batch(Bytes::from("only"), &mut rx);
        assert_eq!(frame, Bytes::from("only"));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_drain_batch_coalesces_queued_messages() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.try_send(Bytes::from("b")).unwrap();
        tx.try_send(Bytes::from("c")).unwrap();

        let (frame, count) = drain_batch(Bytes::from("a"), &mut rx);
        assert_eq!(frame, Bytes::from("a\nb\nc"));
        assert_eq!(count, 3);

        // later arrivals go in the next frame
        tx.try_send(Bytes::from("d")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Bytes::from("d"));
    }

    #[tokio::test]
    async fn test_new_agent_is_authorized() {
        let (conn, _peer) = memory::pair();
        let agent = Agent::new("alice", "alice_bob", conn, AgentConfig::default());
        assert_eq!(*agent.state().borrow(), ConnectionState::Authorized);
        assert_eq!(agent.identity(), "alice");
        assert_eq!(agent.room_id(), "alice_bob");
    }

    #[tokio::test]
    async fn test_run_without_hub_closes_immediately() {
        let (hub, handle) = Hub::new(HubConfig::default());
        drop(hub);

        let (conn, mut peer) = memory::pair();
        let agent = Agent::new("alice", "r1", conn, AgentConfig::default());
        let state = agent.state();

        let teardown = agent.run(&handle).await;
        assert!(matches!(teardown.inbound, PumpExit::HubStopped));
        assert_eq!(*state.borrow(), ConnectionState::Closed);
        assert_eq!(peer.recv().await, None);
    }
}
