use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use relay_directory::DirectoryConfig;
use relay_store::SharedStore;
use relay_telemetry::MetricsRecorder;
use relay_translate::{TranslateConfig, TranslateError, TranslationService};

use crate::client::{self, ClientRegistry};
use crate::handlers::{self, HandlerState};
use crate::http;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    /// Directory served for every path no route matches.
    pub public_dir: PathBuf,
    pub directory: DirectoryConfig,
    pub translate: TranslateConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_send_queue: 256,
            public_dir: PathBuf::from("public"),
            directory: DirectoryConfig::default(),
            translate: TranslateConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Translate(#[from] TranslateError),
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub client_registry: Arc<ClientRegistry>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, public_dir: PathBuf) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(http::health))
        .route("/translate", post(http::translate))
        .route("/translation-stats", get(http::translation_stats))
        .route("/clear-cache", post(http::clear_cache))
        .route("/debug/session/{code}", get(http::debug_session))
        .fallback_service(ServeDir::new(public_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    store: Option<Arc<dyn SharedStore>>,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, ServerError> {
    let translation = Arc::new(TranslationService::new(&config.translate)?);
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue));

    let cleanup = client::start_cleanup_task(Arc::clone(&client_registry), CLEANUP_INTERVAL);

    let handler_state = Arc::new(HandlerState::new(
        config.directory.normalized(),
        Arc::clone(&client_registry),
        store,
        translation,
        metrics,
    ));

    let app_state = AppState {
        handler_state: Arc::clone(&handler_state),
        client_registry: Arc::clone(&client_registry),
    };

    let router = build_router(app_state, config.public_dir.clone());
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        addr = %local_addr,
        store = handler_state.hub.directory().mirror().backend().unwrap_or("none"),
        public_dir = %config.public_dir.display(),
        "Relay server started"
    );

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        state: handler_state,
        shutdown,
        server,
        cleanup,
    })
}

/// Handle returned by `start()`. Keeps background tasks alive until shut down.
pub struct ServerHandle {
    pub port: u16,
    state: Arc<HandlerState>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn state(&self) -> &Arc<HandlerState> {
        &self.state
    }

    /// Close every session, drain pending store writes, then stop accepting connections.
    pub async fn shutdown(self) {
        let directory = self.state.hub.directory();
        directory.shutdown();
        directory.mirror().flush().await;

        self.shutdown.cancel();
        self.state.clients.close_all();
        self.cleanup.abort();

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.server).await.is_err() {
            tracing::warn!("server did not stop within shutdown timeout");
        }
        tracing::info!("Relay server stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.client_registry.register();
    handlers::connected(&state.handler_state, &client_id);

    let dispatch_state = Arc::clone(&state.handler_state);
    client::handle_ws_connection(
        socket,
        client_id.clone(),
        rx,
        Arc::clone(&state.client_registry),
        move |connection, raw| {
            let handlers = Arc::clone(&dispatch_state);
            async move { handlers::dispatch(&handlers, &connection, &raw).await }
        },
    )
    .await;

    handlers::disconnected(&state.handler_state, &client_id);
}
