use std::sync::{Arc, Mutex};

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query, State,
    },
    http::Method,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use murmur_shared::constants::SOCKET_TOKEN_SCOPE;
use murmur_store::{Database, StoreError};

use crate::config::ServerConfig;
use crate::connection::{self, PumpSettings};
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::hub::{Registry, RegistryStats};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Mutex<Database>>,
    pub registry: Arc<Registry>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stats(State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.registry.stats().await)
}

/// `GET /ws?token=...`. The token is checked before the upgrade is looked
/// at, so an unauthenticated client never gets a connection.
async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ServerError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ServerError::Unauthorized("missing token".into()))?;

    let user_id = {
        let db = state
            .store
            .lock()
            .map_err(|_| ServerError::from(StoreError::LockPoisoned))?;
        db.user_for_token(SOCKET_TOKEN_SCOPE, &token)?
    }
    .ok_or_else(|| ServerError::Unauthorized("invalid or expired token".into()))?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(user = %user_id, "Rejected non-WebSocket request");
            return Ok(rejection.into_response());
        }
    };

    info!(user = %user_id, "Upgrading connection");

    let settings = PumpSettings::from(state.config.as_ref());
    let registry = state.registry.clone();
    let dispatcher = state.dispatcher.clone();
    Ok(ws
        .max_message_size(state.config.max_frame_bytes)
        .on_upgrade(move |socket| {
            connection::serve_socket(socket, user_id, registry, dispatcher, settings)
        }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
