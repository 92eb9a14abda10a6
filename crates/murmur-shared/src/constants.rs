/// Token scope that authorises a WebSocket upgrade.
pub const SOCKET_TOKEN_SCOPE: &str = "socket";

/// Default capacity of a connection's outbound queue.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 100;

/// Default time to wait for a pong before the connection is considered dead.
pub const DEFAULT_PONG_WAIT_SECS: u64 = 60;

/// Default deadline for a single frame write.
pub const DEFAULT_WRITE_WAIT_SECS: u64 = 10;

/// Largest inbound frame accepted (10 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Page size used by `get_messages` when the client does not ask for one.
pub const DEFAULT_MESSAGE_PAGE: u32 = 50;

/// Upper bound on a single `get_messages` page.
pub const MAX_MESSAGE_PAGE: u32 = 200;

/// Default HTTP port of the server.
pub const DEFAULT_HTTP_PORT: u16 = 8080;
