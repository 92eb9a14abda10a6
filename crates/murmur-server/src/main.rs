//! # murmur-server
//!
//! Realtime chat server.
//!
//! This binary provides:
//! - **WebSocket endpoint** (`/ws?token=...`) where authenticated clients
//!   send and receive chat events as JSON envelopes
//! - **Registry** of live connections with non-blocking fan-out to every
//!   device of every recipient
//! - **SQLite store** for conversations, messages and per-recipient delivery
//!   status
//! - **HTTP endpoints** for health checks and connection statistics

mod api;
mod config;
mod connection;
mod coordinator;
mod dispatch;
mod error;
mod handlers;
mod hub;

#[cfg(test)]
mod test_support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use murmur_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::coordinator::Coordinator;
use crate::dispatch::Dispatcher;
use crate::hub::Registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,murmur_server=debug")),
        )
        .init();

    info!("Starting murmur server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store and build the core
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    }
    .inspect_err(|e| tracing::error!(error = %e, "Failed to open database"))?;
    if let Some(path) = db.path() {
        info!(path = %path.display(), "Database ready");
    }

    let store = Arc::new(Mutex::new(db));
    let registry = Arc::new(Registry::new());
    let coordinator = Coordinator::new(store.clone(), registry.clone());
    let dispatcher = Arc::new(Dispatcher::new(coordinator));

    let app_state = AppState {
        store: store.clone(),
        registry: registry.clone(),
        dispatcher,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic cleanup of expired socket tokens (hourly)
    let token_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let purged = match token_store.lock() {
                Ok(db) => db.purge_expired_tokens(),
                Err(_) => break,
            };
            match purged {
                Ok(0) => {}
                Ok(n) => info!(purged = n, "Removed expired socket tokens"),
                Err(e) => warn!(error = %e, "Token cleanup failed"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    // Closing every outbound queue makes each write pump send a Close frame.
    registry.shutdown().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(())
}
