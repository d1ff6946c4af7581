//! Connection handlers for the roomcast server.
//!
//! This module handles the connection lifecycle and event processing: the
//! WebSocket surface for live sessions and the stateless history endpoint.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use roomcast_core::{
    AuthError, ConnectionId, InMemoryMessageLedger, InMemoryRoomDirectory, JwtVerifier,
    MessageLedger, RegistryConfig, RoomDirectory, SessionError, SessionRegistry, TokenVerifier,
    validate_room_name,
};
use roomcast_protocol::{codec, kinds, ChatMessage, ClientEvent, ServerEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The session registry.
    pub registry: SessionRegistry,
    /// Per-request token verification for the stateless surface.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Room-existence oracle.
    pub directory: Arc<dyn RoomDirectory>,
    /// Message store.
    pub ledger: Arc<dyn MessageLedger>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let mut verifier = JwtVerifier::new(config.auth.secret.as_bytes());
        if let Some(issuer) = &config.auth.issuer {
            verifier = verifier.with_issuer(issuer.clone());
        }
        let verifier: Arc<dyn TokenVerifier> = Arc::new(verifier);

        let directory: Arc<InMemoryRoomDirectory> =
            Arc::new(InMemoryRoomDirectory::with_rooms(config.rooms.iter().cloned()));
        let ledger: Arc<InMemoryMessageLedger> = Arc::new(InMemoryMessageLedger::new());

        let registry = SessionRegistry::with_config(
            verifier.clone(),
            directory.clone(),
            ledger.clone(),
            RegistryConfig {
                history_limit: config.limits.history_limit,
            },
        );

        Self {
            registry,
            verifier,
            directory,
            ledger,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/rooms/:room/history", get(history_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("roomcast server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Extract a bearer credential from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_owned)
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    /// Credential fallback for clients that cannot set headers.
    token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// The bearer credential is carried once at connection establishment,
/// either as an Authorization header or a `token` query parameter.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = bearer_token(&headers).or(query.token);
    ws.on_upgrade(move |socket| handle_websocket(socket, state, token))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, token: Option<String>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Authentication must complete within the handshake window; a timeout
    // is an AuthError like any other and terminates the connection.
    let window = Duration::from_millis(state.config.auth.handshake_timeout_ms);
    let authenticated = match timeout(
        window,
        state
            .registry
            .authenticate(connection_id.clone(), token.as_deref(), outbound_tx),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(AuthError::Timeout),
    };

    let identity = match authenticated {
        Ok(identity) => identity,
        Err(e) => {
            metrics::record_auth_failure();
            warn!(connection = %connection_id, error = %e, "Authentication failed");
            let event = ServerEvent::error(kinds::AUTH, e.to_string());
            let _ = send_event(&mut sender, &event).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    debug!(connection = %connection_id, user = %identity.user_id, "WebSocket connected");

    // Event processing loop
    loop {
        tokio::select! {
            biased;

            // Deliver events fanned out to this session
            Some(event) = outbound_rx.recv() => {
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_message("inbound");
                        if let Err(e) = handle_frame(&text, &connection_id, &state, &mut sender).await {
                            error!(connection = %connection_id, error = %e, "Frame handling error");
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_) | Message::Binary(_))) => {
                        // Text-frame protocol; ignore the rest
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: the session and its membership go together
    state.registry.disconnect(&connection_id);
    metrics::set_active_rooms(state.registry.room_count());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Handle one inbound text frame.
///
/// Decoding is the schema-validation boundary: a frame that does not parse
/// into a typed command is answered with a validation error before any
/// session logic runs.
async fn handle_frame(
    text: &str,
    connection_id: &ConnectionId,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
) -> Result<()> {
    let event = match codec::decode_client(text) {
        Ok(event) => event,
        Err(e) => {
            metrics::record_error(kinds::VALIDATION);
            let event = ServerEvent::error(kinds::VALIDATION, e.to_string());
            return send_event(sender, &event).await;
        }
    };

    match event {
        ClientEvent::Join { room } => {
            debug!(connection = %connection_id, room = %room, "Join request");

            match state.registry.join(connection_id, &room).await {
                Ok(history) => {
                    metrics::record_join();
                    metrics::set_active_rooms(state.registry.room_count());
                    let messages = history.iter().map(ChatMessage::from).collect();
                    send_event(sender, &ServerEvent::history(room, messages)).await?;
                }
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Join failed");
                    report(sender, &e).await?;
                }
            }
        }

        ClientEvent::Leave { room } => {
            debug!(connection = %connection_id, room = %room, "Leave request");
            state.registry.leave(connection_id, &room);
            metrics::set_active_rooms(state.registry.room_count());
        }

        ClientEvent::Send { room, text } => {
            let start = Instant::now();
            match state.registry.send(connection_id, &room, &text).await {
                // The sender receives the delivered event through its own
                // outbound queue along with everyone else.
                Ok(_) => metrics::record_send_latency(start.elapsed().as_secs_f64()),
                Err(e) => report(sender, &e).await?,
            }
        }
    }

    Ok(())
}

/// Report a failed operation to the originating connection.
async fn report(
    sender: &mut SplitSink<WebSocket, Message>,
    error: &SessionError,
) -> Result<()> {
    metrics::record_error(error.kind());
    send_event(sender, &ServerEvent::error(error.kind(), error.to_string())).await
}

/// Send an event to the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<()> {
    let text = codec::encode_server(event)?;
    metrics::record_message("outbound");
    sender.send(Message::Text(text)).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    room: String,
    messages: Vec<ChatMessage>,
}

/// Stateless history endpoint.
///
/// There is no persistent session to rely on, so the bearer credential is
/// validated on every request.
async fn history_handler(
    Path(room): Path<String>,
    Query(query): Query<HistoryQuery>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>, ApiError> {
    let token = bearer_token(&headers).ok_or(AuthError::MissingToken)?;
    state.verifier.verify(&token).await?;

    validate_room_name(&room).map_err(SessionError::InvalidRoomName)?;
    if !state
        .directory
        .exists(&room)
        .await
        .map_err(SessionError::from)?
    {
        return Err(SessionError::RoomNotFound(room).into());
    }

    let limit = query
        .limit
        .unwrap_or(state.config.limits.history_limit)
        .clamp(1, state.config.limits.history_max_limit);
    let offset = query.offset.unwrap_or(0);

    let messages = state
        .ledger
        .recent(&room, limit, offset)
        .await
        .map_err(SessionError::from)?;

    Ok(Json(HistoryResponse {
        room,
        messages: messages.iter().map(ChatMessage::from).collect(),
    }))
}

/// Session errors mapped onto the HTTP surface.
struct ApiError(SessionError);

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        Self(error)
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        Self(SessionError::Auth(error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            kinds::AUTH => StatusCode::UNAUTHORIZED,
            kinds::VALIDATION => StatusCode::BAD_REQUEST,
            kinds::NOT_FOUND => StatusCode::NOT_FOUND,
            kinds::STATE => StatusCode::CONFLICT,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        metrics::record_error(kind);

        let body = Json(serde_json::json!({
            "kind": kind,
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
