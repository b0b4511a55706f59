//! Authoritative scrum-poker session server: HTTP routes for creating and
//! checking sessions, and one websocket channel per `(session, client)` that
//! pushes per-recipient state after every change.

mod channel;
pub mod config;
pub mod registry;
pub mod session;
pub mod telemetry;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use scrum_poker_core::{ClientId, SessionId};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

pub use config::ServerConfig;
pub use registry::{RegistryConfig, RegistryError, SessionRegistry};

pub struct AppState {
    pub config: ServerConfig,
    pub registry: SessionRegistry,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Self {
        let registry = SessionRegistry::new(RegistryConfig {
            session_ttl: config.session_ttl,
            recycle_interval: config.recycle_interval,
            heartbeat_interval: config.heartbeat_interval,
        });
        Self {
            config,
            registry,
            metrics,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreatedSession {
    uuid: SessionId,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    active_sessions: usize,
    active_connections: usize,
    sessions: Vec<registry::SessionStats>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/sessions/create", post(create_session))
        .route("/api/sessions/:session_id", get(check_session))
        .route("/api/sessions/:session_id/join/:client_id", get(join_session))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/debug/stats", get(stats_handler));

    let app = match &state.config.static_dir {
        Some(dir) => api.fallback_service(
            ServeDir::new(dir).not_found_service(ServeFile::new(dir.join("index.html"))),
        ),
        None => api,
    };
    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serves until `shutdown` resolves, with the heartbeat and session
/// recycler running alongside.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let heartbeat = state.registry.spawn_heartbeat();
    let recycler = state.registry.spawn_recycler();
    let addr = listener.local_addr().context("listener address")?;
    info!(%addr, "scrum-poker listening");

    let result = axum::serve(listener, router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown)
        .await
        .context("server shutdown with error");

    heartbeat.abort();
    recycler.abort();
    result
}

async fn create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(CreatedSession {
        uuid: state.registry.create(),
    })
}

async fn check_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    match lookup(&state, &session_id) {
        Ok(_) => StatusCode::OK.into_response(),
        Err(status) => status.into_response(),
    }
}

async fn join_session(
    State(state): State<Arc<AppState>>,
    Path((session_id, client_id)): Path<(String, String)>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let session = match lookup(&state, &session_id) {
        Ok(session) => session,
        Err(status) => return status.into_response(),
    };
    if client_id.trim().is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let Some(ws) = ws else {
        return StatusCode::UPGRADE_REQUIRED.into_response();
    };
    let client_id = ClientId::from(client_id);
    let limit = state.config.max_message_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| channel::serve_channel(socket, state, session, client_id))
        .into_response()
}

fn lookup(state: &AppState, raw: &str) -> Result<Arc<session::Session>, StatusCode> {
    let Ok(uuid) = Uuid::parse_str(raw) else {
        warn!(session_id = raw, "rejecting malformed session id");
        return Err(StatusCode::BAD_REQUEST);
    };
    state
        .registry
        .get(&SessionId::from(uuid))
        .map_err(|_| StatusCode::NOT_FOUND)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.registry.snapshot();
    Json(StatsResponse {
        active_sessions: sessions.len(),
        active_connections: sessions.iter().map(|entry| entry.connections).sum(),
        sessions,
    })
}
