//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use murmur_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_MAX_FRAME_BYTES, DEFAULT_OUTBOUND_QUEUE_CAPACITY,
    DEFAULT_PONG_WAIT_SECS, DEFAULT_WRITE_WAIT_SECS,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP and WebSocket listener.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None`, meaning the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Capacity of each connection's outbound queue. Events for a full queue
    /// are dropped.
    /// Env: `OUTBOUND_QUEUE_CAPACITY`
    /// Default: `100`
    pub outbound_queue_capacity: usize,

    /// How long a connection may stay silent (no pong) before it is closed.
    /// Env: `PONG_WAIT_SECS`
    /// Default: `60`
    pub pong_wait: Duration,

    /// Deadline for writing a single frame.
    /// Env: `WRITE_WAIT_SECS`
    /// Default: `10`
    pub write_wait: Duration,

    /// Largest inbound WebSocket message accepted.
    /// Env: `MAX_FRAME_BYTES`
    /// Default: 10 MiB
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            pong_wait: Duration::from_secs(DEFAULT_PONG_WAIT_SECS),
            write_wait: Duration::from_secs(DEFAULT_WRITE_WAIT_SECS),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ServerConfig::from_env`] but reading from an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse_var::<SocketAddr>(&lookup, "HTTP_ADDR") {
            config.http_addr = addr;
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(capacity) = parse_var::<usize>(&lookup, "OUTBOUND_QUEUE_CAPACITY") {
            if capacity > 0 {
                config.outbound_queue_capacity = capacity;
            } else {
                tracing::warn!("OUTBOUND_QUEUE_CAPACITY must be positive, using default");
            }
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "PONG_WAIT_SECS") {
            if secs > 0 {
                config.pong_wait = Duration::from_secs(secs);
            } else {
                tracing::warn!("PONG_WAIT_SECS must be positive, using default");
            }
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "WRITE_WAIT_SECS") {
            if secs > 0 {
                config.write_wait = Duration::from_secs(secs);
            } else {
                tracing::warn!("WRITE_WAIT_SECS must be positive, using default");
            }
        }

        if let Some(bytes) = parse_var::<usize>(&lookup, "MAX_FRAME_BYTES") {
            if bytes > 0 {
                config.max_frame_bytes = bytes;
            } else {
                tracing::warn!("MAX_FRAME_BYTES must be positive, using default");
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Heartbeat period: nine tenths of the pong wait, so a ping always
    /// lands before the peer's read deadline.
    pub fn ping_interval(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "invalid value, using default");
            None
        }
    }
}
