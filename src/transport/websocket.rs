//! WebSocket transport
//!
//! This file implements the WebSocket server that carries the subscription
//! protocol. Responsibilities:
//! - Accept TCP/WebSocket connections, refusing those above
//!   `broker.max_connections`
//! - Run one reader per connection that feeds text frames to its
//!   [`Connection`] multiplexer, and one writer that drains the connection's
//!   outbox onto the socket
//! - Send `ka` keep-alives on an interval while the connection is ready
//! - Sweep every session of a connection when the socket goes away

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio::time::error::Elapsed;
use tokio::time::{Instant, Interval, interval_at, timeout};
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, error, info, warn};
use tungstenite::Error as WsError;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::client::Client;
use crate::config::Settings;
use crate::session::SelectorResolver;
use crate::transport::connection::{Connection, Dispatch};
use crate::transport::message::ServerMessage;
use crate::utils::error::TransportError;

/// Binds `addr` and serves until the listener fails.
pub async fn start_websocket_server(
    addr: &str,
    broker: Arc<Broker<Value>>,
    resolver: Arc<dyn SelectorResolver>,
    settings: Settings,
) -> Result<(), TransportError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    info!("WebSocket server listening on ws://{addr}");
    serve(listener, broker, resolver, settings).await
}

/// Accept loop over an already bound listener.
pub async fn serve(
    listener: TcpListener,
    broker: Arc<Broker<Value>>,
    resolver: Arc<dyn SelectorResolver>,
    settings: Settings,
) -> Result<(), TransportError> {
    let settings = Arc::new(settings);
    let active = Arc::new(AtomicUsize::new(0));

    loop {
        let (stream, peer) = listener.accept().await?;
        let slot = ConnectionSlot::acquire(&active, settings.broker.max_connections);

        spawn(handle_connection(
            stream,
            peer,
            slot,
            broker.clone(),
            resolver.clone(),
            settings.clone(),
        ));
    }
}

/// Counts one accepted connection for the lifetime of its task.
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
    admitted: bool,
}

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, limit: usize) -> Self {
        let previous = active.fetch_add(1, Ordering::SeqCst);
        Self {
            active: active.clone(),
            admitted: limit == 0 || previous < limit,
        }
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    slot: ConnectionSlot,
    broker: Arc<Broker<Value>>,
    resolver: Arc<dyn SelectorResolver>,
    settings: Arc<Settings>,
) {
    let ws_stream = match accept_within(stream, settings.server.handshake_timeout_secs).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!(%peer, "WebSocket handshake error: {e}");
            return;
        }
        Err(_) => {
            warn!(%peer, "WebSocket handshake timed out");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    if !slot.admitted {
        warn!(%peer, limit = settings.broker.max_connections, "connection refused, server is full");
        let refusal = ServerMessage::error(None, "server is at its connection limit");
        if let Ok(text) = serde_json::to_string(&refusal) {
            let _ = ws_sender.send(WsMessage::text(text)).await;
        }
        let _ = ws_sender.close().await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let client = Client::new(tx);
    let client_id = client.id.clone();
    info!(connection = %client_id, %peer, "connection accepted");

    // Single writer: everything bound for this socket passes through `rx`.
    let writer = {
        let client_id = client_id.clone();
        spawn(async move {
            while let Some(msg) = rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(connection = %client_id, "Failed to serialize message: {e}");
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(WsMessage::text(text)).await {
                    debug!(connection = %client_id, "Failed to send message: {e}");
                    break;
                }
            }
            let _ = ws_sender.close().await;
            debug!(connection = %client_id, "Send loop closed");
        })
    };

    let mut connection = Connection::new(client, broker, resolver, settings.protocol.clone());
    let mut keep_alive = keep_alive_interval(settings.protocol.keep_alive_secs);

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                let dispatch = match frame {
                    Some(Ok(WsMessage::Text(text))) => connection.on_message(text.as_str()),
                    Some(Ok(WsMessage::Binary(_))) => connection.on_binary(),
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => Dispatch::Continue,
                    Some(Err(e)) => {
                        debug!(connection = %client_id, "read error: {e}");
                        break;
                    }
                };
                if dispatch == Dispatch::Close {
                    break;
                }
            }
            _ = next_keep_alive(&mut keep_alive) => connection.keep_alive(),
            _ = connection.outbox_closed() => {
                debug!(connection = %client_id, "writer gone, closing");
                break;
            }
        }
    }

    connection.on_close();
    // Dropping the connection drops the last outbox sender, so the writer
    // flushes what is queued and closes the socket.
    drop(connection);
    let _ = writer.await;
    info!(connection = %client_id, "disconnected");
}

/// `accept_async` bounded by `secs` (0 waits forever), so a stalled peer
/// cannot sit on a connection slot.
async fn accept_within(
    stream: TcpStream,
    secs: u64,
) -> Result<Result<WebSocketStream<TcpStream>, WsError>, Elapsed> {
    if secs == 0 {
        return Ok(accept_async(stream).await);
    }
    timeout(Duration::from_secs(secs), accept_async(stream)).await
}

fn keep_alive_interval(secs: u64) -> Option<Interval> {
    if secs == 0 {
        return None;
    }
    let period = Duration::from_secs(secs);
    Some(interval_at(Instant::now() + period, period))
}

async fn next_keep_alive(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
