//! HTTP routes and the WebSocket upgrade gate.

use crate::auth::{self, AuthError, Authenticator, JwtAuthenticator};
use crate::config::Config;
use crate::metrics;
use crate::store::SqliteMessageStore;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use whisper_core::{Connection, History, Hub, HubHandle, Identity, MemoryStore, MessageStore};
use whisper_protocol::MAX_FRAME_SIZE;
use whisper_transport::{split_socket, ConnectionId};

/// Shared server state.
pub struct AppState {
    /// The broadcast hub.
    pub hub: HubHandle,
    /// Verifies upgrade credentials.
    pub authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(hub: HubHandle, authenticator: Arc<dyn Authenticator>) -> Self {
        Self { hub, authenticator }
    }
}

/// Build the router: the WebSocket endpoint plus `/health`.
pub fn build_app(state: Arc<AppState>, websocket_path: &str) -> Router {
    Router::new()
        .route(websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve `app` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the listener cannot
/// be bound.
pub async fn run_server(config: Config) -> Result<()> {
    let history = open_history(&config).await?;
    let hub = Hub::spawn(config.hub_config(), Some(history));
    let authenticator = Arc::new(JwtAuthenticator::new(&config.auth.jwt_secret));
    let state = Arc::new(AppState::new(hub.clone(), authenticator));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_app(state, &config.transport.websocket_path);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Whisper server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, app, shutdown_signal(hub.clone())).await?;

    hub.shutdown();
    info!("Server stopped");
    Ok(())
}

async fn open_history(config: &Config) -> Result<History> {
    let store: Arc<dyn MessageStore> = if config.database.url.is_empty() {
        info!("No database configured, keeping chat history in memory");
        Arc::new(MemoryStore::new())
    } else {
        let store = SqliteMessageStore::connect(&config.database.url, 5)
            .await
            .context("Failed to open message store")?;
        Arc::new(store)
    };
    Ok(History::new(store))
}

/// Resolve on Ctrl-C and tell the hub to close every member.
async fn shutdown_signal(hub: HubHandle) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
    hub.shutdown();
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let (status, label) = if state.hub.is_available() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(serde_json::json!({
            "status": label,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}

/// WebSocket upgrade handler.
///
/// The credential is checked before the upgrade completes; a refused
/// request gets a plain 401 and no connection is ever created.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let offered = headers
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let identity = match auth::admit(state.authenticator.as_ref(), offered.as_deref()).await {
        Ok(identity) => identity,
        Err(e) => return refusal(&e),
    };

    let mut ws = ws
        .max_message_size(MAX_FRAME_SIZE)
        .max_frame_size(MAX_FRAME_SIZE);
    if let Some(offered) = offered {
        // echo the accepted value so browsers complete the handshake
        ws = ws.protocols([offered]);
    }

    ws.on_upgrade(move |socket| handle_socket(socket, identity, state))
}

fn refusal(err: &AuthError) -> Response {
    warn!(error = %err, "Refusing WebSocket upgrade");
    (StatusCode::UNAUTHORIZED, err.to_string()).into_response()
}

/// Drive an admitted socket until it closes.
async fn handle_socket(socket: WebSocket, identity: Identity, state: Arc<AppState>) {
    let id = ConnectionId::generate();
    let username = identity.username.clone();
    let (sink, source) = split_socket(socket);

    info!(connection = %id, %username, "WebSocket connected");

    match Connection::new(id.clone(), identity, sink, source, state.hub.clone())
        .run()
        .await
    {
        Ok(reason) => info!(connection = %id, %username, ?reason, "WebSocket disconnected"),
        Err(e) => error!(connection = %id, %username, error = %e, "Hub refused connection"),
    }
}
