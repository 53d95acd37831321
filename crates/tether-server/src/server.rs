//! `TetherServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tether_ws::axum_ws::{AxumTransport, refuse};
use tether_ws::{ConnectionRegistry, WorkerConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{AuthError, TokenVerifier, merge_smuggled_headers};
use crate::chat::{CHAT_CONNECTION_TYPE, VoiceChatHandler};
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::AUTH_REFUSALS_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::ticker::ticks_handler;

/// Close reason sent when a handshake fails authentication.
pub const UNAUTHORIZED_REASON: &str = "unauthorized";

/// Registry of voice chat connections, keyed by token subject.
pub type ChatRegistry = ConnectionRegistry<VoiceChatHandler>;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Resolved server configuration.
    pub config: Arc<ServerConfig>,
    /// Voice chat connections.
    pub chat: Arc<ChatRegistry>,
    /// Bearer token verifier.
    pub verifier: Arc<TokenVerifier>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The main Tether server.
pub struct TetherServer {
    state: AppState,
}

impl TetherServer {
    /// Create a new server.
    pub fn new(config: ServerConfig) -> Self {
        let gap = config.utterance_gap;
        let worker_config = WorkerConfig::new(CHAT_CONNECTION_TYPE).with_queue(config.queue);
        let chat = ConnectionRegistry::new(worker_config, move |_key| VoiceChatHandler::new(gap));

        Self {
            state: AppState {
                verifier: Arc::new(TokenVerifier::new(&config.jwt_secret)),
                config: Arc::new(config),
                chat: Arc::new(chat),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
                metrics: None,
            },
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/chat", get(chat_handler))
            .route("/ticks", get(ticks_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind and serve in the background.
    ///
    /// Returns the bound address and the serve task, which ends once
    /// shutdown has been initiated and in-flight requests have finished.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        let handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %err, "server error");
            }
        });
        info!(%addr, "listening");
        Ok((addr, handle))
    }

    /// Stop accepting work, close every chat connection and wait for the
    /// serve task, bounded by the configured shutdown timeout.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn shutdown(&self, serve: JoinHandle<()>) -> bool {
        let chat = self.state.chat.clone();
        let drain = async move {
            let closed = chat.close_all();
            info!(closed, "closing chat connections");
            chat.drained().await;
        };
        self.state
            .shutdown
            .graceful_shutdown(drain, vec![serve], Some(self.state.config.shutdown_timeout))
            .await
    }

    /// Voice chat registry.
    pub fn chat(&self) -> &Arc<ChatRegistry> {
        &self.state.chat
    }

    /// Shutdown coordinator.
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, state.chat.len()))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// GET /chat, authenticated websocket upgrade.
async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let ws = ws.max_message_size(state.config.max_message_size);

    let (headers, protocols) = match merge_smuggled_headers(headers) {
        Ok(merged) => merged,
        Err(err) => return refused(ws, &err),
    };
    // Echoed on refusal too
    let ws = ws.protocols(protocols);

    match state.verifier.authorize(&headers) {
        Ok(claims) => {
            info!(
                sub = %claims.sub,
                user_role_id = claims.user_role_id,
                expires_at = ?claims.expires_at(),
                "chat handshake authorized"
            );
            let chat = state.chat.clone();
            ws.on_upgrade(move |socket| async move {
                chat.begin_unique(AxumTransport::new(socket), claims.sub).await;
            })
        }
        Err(err) => refused(ws, &err),
    }
}

/// Complete the upgrade only to close it with a policy violation.
fn refused(ws: WebSocketUpgrade, err: &AuthError) -> Response {
    warn!(error = %err, "chat handshake refused");
    counter!(AUTH_REFUSALS_TOTAL, "reason" => refusal_reason(err)).increment(1);
    ws.on_upgrade(|socket| refuse(socket, UNAUTHORIZED_REASON))
}

fn refusal_reason(err: &AuthError) -> &'static str {
    match err {
        AuthError::MalformedProtocol(_) => "malformed_protocol",
        AuthError::MissingAuthorization => "missing_authorization",
        AuthError::MalformedAuthorization => "malformed_authorization",
        AuthError::InvalidToken(_) => "invalid_token",
    }
}
