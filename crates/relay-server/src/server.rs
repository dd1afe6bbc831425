//! HTTP surface: WebSocket upgrade, health endpoint, lifecycle handle.

use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use relay_llm::Dispatcher;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::registry::ClientRegistry;
use crate::session;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub config: Arc<ServerConfig>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns a handle for shutdown and introspection.
pub async fn start(
    config: ServerConfig,
    dispatcher: Arc<dyn Dispatcher>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ClientRegistry::new(config.max_send_queue));
    let close_grace = config.close_grace();
    let config = Arc::new(config);

    let state = AppState {
        registry: Arc::clone(&registry),
        dispatcher,
        config: Arc::clone(&config),
    };

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;

    info!(addr = %addr, "relay server listening");

    let token = CancellationToken::new();
    let shutdown_token = token.clone();
    let task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
            .await
            .ok();
    });

    Ok(ServerHandle {
        addr,
        registry,
        token,
        task,
        close_grace,
    })
}

/// Handle returned by [`start`]. Dropping it does not stop the server;
/// call [`ServerHandle::stopped`] for an orderly shutdown.
pub struct ServerHandle {
    addr: std::net::SocketAddr,
    registry: Arc<ClientRegistry>,
    token: CancellationToken,
    task: tokio::task::JoinHandle<()>,
    close_grace: std::time::Duration,
}

impl ServerHandle {
    pub fn addr(&self) -> std::net::SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Signal shutdown and wait for the accept loop to finish, bounded by
    /// the close grace period. Sessions still open after the grace period
    /// are dropped.
    pub async fn stopped(mut self) {
        self.token.cancel();
        if tokio::time::timeout(self.close_grace, &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
            info!("shutdown grace period elapsed, aborting server task");
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client, rx) = state.registry.register();
    info!(client_id = %client.id, total = state.registry.count(), "client connected");

    session::run_session(
        socket,
        client,
        rx,
        state.registry,
        state.dispatcher,
        &state.config,
    )
    .await;
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "connections": state.registry.count(),
    }))
}
