//! Per-connection read and write pumps.
//!
//! Each WebSocket gets two tasks. The read pump decodes inbound frames and
//! hands them to the [`Dispatcher`]; the write pump is the only writer to the
//! socket and drains the connection's outbound queue. The pumps are generic
//! over `Stream`/`Sink` so they run the same over a real socket and over
//! in-memory channels.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use murmur_shared::protocol::{ClientEvent, ServerEvent};
use murmur_shared::types::{ConnectionId, UserId};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::hub::{ConnectionHandle, Enqueue, Registry};

/// Timing and sizing shared by all connections.
#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    pub queue_capacity: usize,
    pub pong_wait: Duration,
    pub ping_interval: Duration,
    pub write_wait: Duration,
}

impl From<&ServerConfig> for PumpSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            queue_capacity: config.outbound_queue_capacity,
            pong_wait: config.pong_wait,
            ping_interval: config.ping_interval(),
            write_wait: config.write_wait,
        }
    }
}

/// What a handler knows about the connection an event arrived on.
#[derive(Clone)]
pub struct ClientContext {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    registry: Arc<Registry>,
}

impl ClientContext {
    pub fn new(handle: &ConnectionHandle, registry: Arc<Registry>) -> Self {
        Self {
            connection_id: handle.id,
            user_id: handle.user_id,
            registry,
        }
    }

    /// Enqueue an event for this connection only. Does nothing once the
    /// connection has been removed from the registry.
    pub async fn reply(&self, event: ServerEvent) -> Enqueue {
        self.registry.send_to_connection(self.connection_id, event).await
    }
}

/// Register an upgraded socket and run both pumps until it closes.
pub async fn serve_socket(
    socket: WebSocket,
    user_id: UserId,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    settings: PumpSettings,
) {
    let (handle, queue) = ConnectionHandle::new(user_id, settings.queue_capacity);
    let ctx = ClientContext::new(&handle, registry.clone());
    registry.add(handle).await;

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_pump(sink, queue, ctx.connection_id, settings));

    read_pump(stream, ctx, dispatcher, registry, settings.pong_wait).await;

    if let Err(e) = writer.await {
        warn!(error = %e, "Write pump panicked");
    }
}

/// Read frames until the peer goes away, then deregister the connection.
///
/// The read deadline starts at `pong_wait` and is only extended by pongs,
/// so a peer that stops answering heartbeats is dropped even if it keeps
/// sending data.
pub async fn read_pump<S>(
    mut stream: S,
    ctx: ClientContext,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<Registry>,
    pong_wait: Duration,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let frame = match timeout_at(deadline, stream.next()).await {
            Err(_) => {
                info!(conn = %ctx.connection_id, "Read deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(conn = %ctx.connection_id, error = %e, "Read error");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => handle_text(&ctx, &dispatcher, text.as_str()).await,
            Message::Pong(_) => deadline = Instant::now() + pong_wait,
            Message::Close(_) => {
                debug!(conn = %ctx.connection_id, "Peer closed connection");
                break;
            }
            Message::Binary(_) | Message::Ping(_) => {}
        }
    }

    registry.remove(ctx.connection_id).await;
}

async fn handle_text(ctx: &ClientContext, dispatcher: &Dispatcher, text: &str) {
    let result = match ClientEvent::from_json(text) {
        Ok(event) => dispatcher.dispatch(ctx, event).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        warn!(
            conn = %ctx.connection_id,
            user = %ctx.user_id,
            error = %e,
            "Event rejected"
        );
        ctx.reply(ServerEvent::error(e.client_message())).await;
    }
}

/// Drain the outbound queue into the socket and keep the peer alive with
/// pings. Ends with a Close frame once the queue is closed.
pub async fn write_pump<K>(
    mut sink: K,
    mut queue: mpsc::Receiver<ServerEvent>,
    connection_id: ConnectionId,
    settings: PumpSettings,
) where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );

    loop {
        tokio::select! {
            event = queue.recv() => {
                let Some(event) = event else {
                    let _ = write_frame(&mut sink, Message::Close(None), settings.write_wait).await;
                    debug!(conn = %connection_id, "Outbound queue closed");
                    break;
                };

                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(conn = %connection_id, kind = event.kind(), error = %e, "Failed to encode event");
                        continue;
                    }
                };

                if let Err(e) = write_frame(&mut sink, Message::text(text), settings.write_wait).await {
                    debug!(conn = %connection_id, error = %e, "Write failed");
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = write_frame(&mut sink, Message::Ping(Bytes::new()), settings.write_wait).await {
                    debug!(conn = %connection_id, error = %e, "Ping failed");
                    break;
                }
            }
        }
    }
}

async fn write_frame<K>(sink: &mut K, frame: Message, write_wait: Duration) -> Result<(), String>
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    match timeout(write_wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("write deadline expired".to_string()),
    }
}
