//! HTTP and WebSocket handlers for the Parley server.
//!
//! This module wires the shared state together, accepts WebSocket
//! connections into [`Session`]s and serves the message API.

use crate::auth::JwtVerifier;
use crate::chat::{ChatError, ChatService};
use crate::config::Config;
use crate::metrics;
use crate::session::Session;
use crate::store::{MemoryStore, MessageStore, StoreError, User, UserDirectory};
use anyhow::{Context, Result};
use axum::{
    async_trait,
    extract::{ws::WebSocketUpgrade, ConnectInfo, FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parley_core::{
    extract_credential, EventRouter, IdentityVerifier, MessageBody, PresenceBroadcaster,
    PresenceConfig, Registry, UserIdentity, VerificationError,
};
use parley_protocol::{Encoding, EventCodec, MessagePayload};
use parley_transport::websocket::{handshake_from_headers, WebSocketConfig};
use parley_transport::WebSocketConnection;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Who is connected, and where.
    pub registry: Arc<Registry>,
    /// Online-set publisher.
    pub presence: Arc<PresenceBroadcaster>,
    /// Chat and typing fan-out.
    pub router: Arc<EventRouter>,
    /// Message validation and persistence.
    pub chat: ChatService,
    /// Handshake and request authentication.
    pub verifier: Arc<dyn IdentityVerifier>,
    pub users: Arc<dyn UserDirectory>,
    pub messages: Arc<dyn MessageStore>,
    /// Fired once on shutdown; every session's close signal derives from it.
    pub shutdown: CancellationToken,
    /// Sessions alive in any state, authenticated or not.
    pub sessions: AtomicUsize,
}

impl AppState {
    /// Create app state over the given storage.
    #[must_use]
    pub fn new(
        config: Config,
        users: Arc<dyn UserDirectory>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        let presence = Arc::new(PresenceBroadcaster::new(
            Arc::clone(&registry),
            PresenceConfig {
                debounce: config.presence.debounce(),
            },
        ));
        let router = Arc::new(EventRouter::new(Arc::clone(&registry)));
        let chat = ChatService::new(
            Arc::clone(&users),
            Arc::clone(&messages),
            Arc::clone(&router),
        );
        let verifier: Arc<dyn IdentityVerifier> =
            Arc::new(JwtVerifier::new(&config.auth.jwt_secret, Arc::clone(&users)));

        Self {
            config,
            registry,
            presence,
            router,
            chat,
            verifier,
            users,
            messages,
            shutdown: CancellationToken::new(),
            sessions: AtomicUsize::new(0),
        }
    }

    /// Whether another upgrade would exceed `limits.max_connections`.
    #[must_use]
    pub fn at_capacity(&self) -> bool {
        self.sessions.load(Ordering::Relaxed) >= self.config.limits.max_connections
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/messages/contacts", get(contacts_handler))
        .route("/api/messages/chats", get(chats_handler))
        .route("/api/messages/send/:id", post(send_handler))
        .route("/api/messages/:id", get(conversation_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let store = Arc::new(MemoryStore::with_users(config.users.iter().map(User::from)));
    info!(users = config.users.len(), "User directory loaded");
    let state = Arc::new(AppState::new(config.clone(), store.clone(), store));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let presence = tokio::spawn(Arc::clone(&state.presence).run(state.shutdown.clone()));

    let app = router(Arc::clone(&state));
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
    .await?;

    state.shutdown.cancel();
    if let Err(e) = presence.await {
        warn!(error = %e, "Presence broadcaster task failed");
    }
    info!("Parley server stopped");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => {
                error!(error = %e, "Failed to listen for shutdown signal");
                shutdown.cancelled().await;
            }
        },
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.registry.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "online": stats.identities,
    }))
}

/// WebSocket upgrade query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Credential supplied as the handshake auth payload.
    pub token: Option<String>,
    /// `json` (default) or `msgpack`.
    pub format: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if state.at_capacity() {
        warn!(remote = %remote, "Connection limit reached");
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let encoding = match params.format.as_deref().map(str::parse::<Encoding>).transpose() {
        Ok(encoding) => encoding.unwrap_or_default(),
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let handshake = handshake_from_headers(&headers, params.token);
    let ws_config = WebSocketConfig {
        max_message_size: state.config.transport.max_message_size,
    };

    ws.max_message_size(ws_config.max_message_size)
        .on_upgrade(move |socket| async move {
            let conn = WebSocketConnection::new(
                socket,
                handshake,
                EventCodec::new(encoding),
                Some(remote),
                ws_config,
            );
            Session::new(Box::new(conn), state).run().await;
        })
}

/// Errors returned by the message API, rendered as `{"message": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Internal server error")]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Chat(e) => {
                StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = ?self, "Request failed");
        }
        (status, Json(serde_json::json!({ "message": self.to_string() }))).into_response()
    }
}

/// The authenticated caller of an API request.
///
/// Accepts the same credentials as the WebSocket handshake, except the
/// auth payload.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserIdentity);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let handshake = handshake_from_headers(&parts.headers, None);
        let credential = extract_credential(&handshake)
            .ok_or_else(|| ApiError::Unauthorized(VerificationError::MissingCredential.to_string()))?;

        match state.verifier.verify(&credential.token).await {
            Ok(identity) => Ok(AuthUser(identity)),
            Err(e) => {
                debug!(reason = e.reason(), "Request rejected");
                metrics::record_auth_failure(e.reason());
                Err(ApiError::Unauthorized(e.to_string()))
            }
        }
    }
}

/// Users the caller can start a conversation with.
async fn contacts_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(me): AuthUser,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = state
        .users
        .list_users()
        .await?
        .into_iter()
        .filter(|user| user.id != me)
        .collect();
    Ok(Json(users))
}

/// Users the caller has exchanged messages with.
async fn chats_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(me): AuthUser,
) -> Result<Json<Vec<User>>, ApiError> {
    let mut partners = Vec::new();
    for id in state.messages.partners(&me).await? {
        if let Some(user) = state.users.find_user(&id).await? {
            partners.push(user);
        }
    }
    Ok(Json(partners))
}

/// Messages between the caller and another user, oldest first.
async fn conversation_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(me): AuthUser,
    Path(other): Path<String>,
) -> Result<Json<Vec<MessagePayload>>, ApiError> {
    let messages = state
        .messages
        .conversation(&me, &UserIdentity::new(other))
        .await?;
    Ok(Json(messages.iter().map(|m| m.to_payload()).collect()))
}

/// Body of a send request.
#[derive(Debug, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Send a message. Live delivery is best effort; the response only
/// reflects persistence.
async fn send_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(me): AuthUser,
    Path(receiver): Path<String>,
    Json(request): Json<SendRequest>,
) -> Result<(StatusCode, Json<MessagePayload>), ApiError> {
    let body = MessageBody {
        text: request.text,
        image: request.image,
    };
    let (message, _report) = state
        .chat
        .send(&me, &UserIdentity::new(receiver), body)
        .await?;
    Ok((StatusCode::CREATED, Json(message.to_payload())))
}
