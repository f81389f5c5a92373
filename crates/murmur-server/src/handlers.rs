//! HTTP and WebSocket handlers for the Murmur server.
//!
//! Joining a room is a WebSocket upgrade on `{websocket_path}/:room_id`.
//! The identity comes from a header set by the upstream authentication
//! layer; the configured [`SessionAuthority`] decides whether it may join.

use crate::config::{Config, SessionPolicy};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use murmur_core::{
    validate_room_id, Agent, Hub, HubHandle, OpenSessions, PairedRooms, SessionAuthority,
    SessionRegistry,
};
use murmur_transport::AxumConnection;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Handle to the running hub.
    pub hub: HubHandle,
    /// Join authorization.
    pub sessions: Arc<dyn SessionAuthority>,
    /// Explicitly opened sessions, when the policy records them.
    pub session_registry: Option<Arc<SessionRegistry>>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state with the authority selected by the config.
    #[must_use]
    pub fn new(config: Config, hub: HubHandle) -> Self {
        let (sessions, session_registry): (Arc<dyn SessionAuthority>, _) =
            match config.sessions.policy {
                SessionPolicy::Open => (Arc::new(OpenSessions), None),
                SessionPolicy::Paired => (Arc::new(PairedRooms), None),
                SessionPolicy::Registered => {
                    let registry = Arc::new(SessionRegistry::new());
                    (registry.clone(), Some(registry))
                }
            };

        Self {
            hub,
            sessions,
            session_registry,
            config,
        }
    }
}

/// Why a join was refused before upgrade.
#[derive(Debug, Error)]
pub enum JoinRejection {
    /// The room id in the path is not usable.
    #[error("Invalid room id: {0}")]
    InvalidRoom(&'static str),

    /// The identity header is absent or empty.
    #[error("Missing identity")]
    MissingIdentity,

    /// The identity may not join the room.
    #[error("Not authorized for this room")]
    AuthorizationDenied,

    /// The hub has stopped.
    #[error("Hub is not running")]
    HubUnavailable,
}

impl JoinRejection {
    /// HTTP status for the rejection.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            JoinRejection::InvalidRoom(_) => StatusCode::BAD_REQUEST,
            JoinRejection::MissingIdentity => StatusCode::UNAUTHORIZED,
            JoinRejection::AuthorizationDenied => StatusCode::FORBIDDEN,
            JoinRejection::HubUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            JoinRejection::InvalidRoom(_) => "invalid_room",
            JoinRejection::MissingIdentity => "missing_identity",
            JoinRejection::AuthorizationDenied => "authorization_denied",
            JoinRejection::HubUnavailable => "hub_unavailable",
        }
    }
}

impl IntoResponse for JoinRejection {
    fn into_response(self) -> Response {
        metrics::record_rejection(self.kind());
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let join_route = state.config.join_route();
    Router::new()
        .route(&join_route, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/sessions", post(open_session_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until ctrl-c.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = config
            .metrics_addr()
            .and_then(metrics::start_metrics_server)
        {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let (hub, handle) = Hub::new(config.hub_config());
    let hub_task = hub.spawn();

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone(), handle.clone()));
    let app = build_router(state);

    let listener = TcpListener::bind(addr).await?;

    info!("Murmur server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}/{{room_id}}",
        addr,
        config.transport.websocket_path.trim_end_matches('/')
    );
    info!(policy = ?config.sessions.policy, "Session policy");

    let shutdown = handle.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
        info!("Shutting down");
        shutdown.shutdown();
    })
    .await?;

    handle.shutdown();
    let stats = hub_task.await?;
    info!(
        registered = stats.registered_total,
        broadcasts = stats.broadcasts_total,
        evictions = stats.evictions_total,
        "Server stopped"
    );

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Hub statistics handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.hub.stats().await {
        Ok(stats) => Json(serde_json::json!({
            "agents": stats.agent_count,
            "rooms": stats.room_count,
            "registered_total": stats.registered_total,
            "broadcasts_total": stats.broadcasts_total,
            "deliveries_total": stats.deliveries_total,
            "evictions_total": stats.evictions_total,
        }))
        .into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

/// Body of `POST /sessions`.
#[derive(Debug, Deserialize)]
pub struct OpenSession {
    /// Identity of the other participant.
    pub peer: String,
}

/// Response of `POST /sessions`.
#[derive(Debug, Serialize, Deserialize)]
pub struct OpenedSession {
    /// The room both participants join.
    pub room_id: String,
}

/// Open a session between the caller and a peer.
///
/// Only the `registered` policy records it; the others return the derived id.
async fn open_session_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<OpenSession>,
) -> Result<Json<OpenedSession>, JoinRejection> {
    let identity = identity(&headers, &state.config.transport.identity_header)?;
    let peer = body.peer.trim();
    if peer.is_empty() {
        return Err(JoinRejection::InvalidRoom("Peer cannot be empty"));
    }

    let room_id = match &state.session_registry {
        Some(registry) => registry.open(identity, peer),
        None => state.sessions.derive_room_id(identity, peer),
    };
    validate_room_id(&room_id).map_err(JoinRejection::InvalidRoom)?;

    debug!(identity = %identity, peer = %peer, room = %room_id, "Session opened");
    Ok(Json(OpenedSession { room_id }))
}

/// WebSocket upgrade handler for joining a room.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response, JoinRejection> {
    let identity = authorize_join(&state, &headers, &room_id)?.to_string();
    if !state.hub.is_running() {
        return Err(JoinRejection::HubUnavailable);
    }

    let agent_config = state.config.agent_config();
    // Leave room above the limit so oversize payloads reach the agent.
    let transport_limit = agent_config.max_message_size.saturating_mul(4);
    let hub = state.hub.clone();

    debug!(identity = %identity, room = %room_id, remote = %remote, "Upgrading connection");

    Ok(ws
        .max_message_size(transport_limit)
        .max_frame_size(transport_limit)
        .on_failed_upgrade(move |e| {
            warn!(remote = %remote, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            let _metrics_guard = ConnectionMetricsGuard::new();
            let connection = AxumConnection::new(socket).with_remote_addr(remote.to_string());
            let agent = Agent::new(identity, room_id, connection, agent_config);
            agent.run(&hub).await;
        }))
}

/// Check the identity header and room id of a join request.
fn authorize_join<'a>(
    state: &AppState,
    headers: &'a HeaderMap,
    room_id: &str,
) -> Result<&'a str, JoinRejection> {
    validate_room_id(room_id).map_err(JoinRejection::InvalidRoom)?;
    let identity = identity(headers, &state.config.transport.identity_header)?;

    if !state.sessions.is_authorized(identity, room_id) {
        debug!(identity = %identity, room = %room_id, "Join denied");
        return Err(JoinRejection::AuthorizationDenied);
    }
    Ok(identity)
}

fn identity<'a>(headers: &'a HeaderMap, header: &str) -> Result<&'a str, JoinRejection> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(JoinRejection::MissingIdentity)
}
