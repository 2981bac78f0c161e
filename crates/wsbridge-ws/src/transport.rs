//! `WsTransport` — a [`Transport`] over `tokio-tungstenite`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use wsbridge_core::{
    ConnectionConfig, ConnectionError, ConnectionId, DispatchEvent, EventHandler, Message, SendError,
    Transport,
};

use crate::convert::{build_request, from_ws_message, to_ws_message, websocket_config};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectionMap = Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<WsCommand>>>;

/// Configuration for the websocket transport.
#[derive(Debug, Clone)]
pub struct WsTransportConfig {
    /// Give up on the TCP/TLS/websocket handshake after this long.
    pub connect_timeout: Duration,
    /// Set `TCP_NODELAY` on new sockets.
    pub disable_nagle: bool,
}

impl Default for WsTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            disable_nagle: false,
        }
    }
}

/// Command sent from callers to a connection task.
enum WsCommand {
    Send {
        message: WsMessage,
        tx: oneshot::Sender<Result<(), SendError>>,
    },
}

/// Websocket transport.
///
/// Each open connection is owned by a background task; `transmit` talks to
/// that task over a channel. Dropping the transport closes every connection
/// it opened and reports `Closed` for each.
pub struct WsTransport {
    config: WsTransportConfig,
    connections: Arc<ConnectionMap>,
    next_id: AtomicU32,
}

impl WsTransport {
    pub fn new(config: WsTransportConfig) -> Self {
        Self {
            config,
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU32::new(1),
        }
    }

    /// Number of sockets currently owned by this transport.
    pub fn open_connections(&self) -> usize {
        lock(&self.connections).len()
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(WsTransportConfig::default())
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(
        &self,
        url: &str,
        config: ConnectionConfig,
        handler: EventHandler,
    ) -> Result<ConnectionId, ConnectionError> {
        let request = build_request(url, &config)?;
        let connect = tokio_tungstenite::connect_async_with_config(
            request,
            Some(websocket_config(&config)),
            self.config.disable_nagle,
        );

        let (stream, response) = time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| {
                ConnectionError::Transport(format!(
                    "handshake timed out after {}ms",
                    self.config.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(connection = %id, url, status = %response.status(), "websocket handshake complete");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        lock(&self.connections).insert(id, cmd_tx);

        let connections = Arc::downgrade(&self.connections);
        tokio::spawn(async move {
            connection_task(id, stream, cmd_rx, handler).await;
            if let Some(connections) = connections.upgrade() {
                lock(&connections).remove(&id);
            }
        });

        Ok(id)
    }

    async fn transmit(&self, id: ConnectionId, message: Message) -> Result<(), SendError> {
        let cmd_tx = lock(&self.connections)
            .get(&id)
            .cloned()
            .ok_or(SendError::UnknownConnection(id))?;

        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(WsCommand::Send {
                message: to_ws_message(message),
                tx,
            })
            .map_err(|_| SendError::Closed(id))?;
        rx.await.map_err(|_| SendError::Closed(id))?
    }

    fn name(&self) -> &str {
        "tungstenite"
    }
}

/// Owns one socket until it terminates, or until the transport is dropped.
/// Reports exactly one terminal event either way.
async fn connection_task(
    id: ConnectionId,
    stream: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    handler: EventHandler,
) {
    let (mut sink, mut stream) = stream.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None => {
                        tracing::debug!(connection = %id, "transport dropped, closing socket");
                        handler(id, DispatchEvent::Closed);
                        let _ = sink.close().await;
                        return;
                    }
                    Some(WsCommand::Send { message, tx }) => {
                        let result = sink
                            .send(message)
                            .await
                            .map_err(|e| SendError::Transport(e.to_string()));
                        let _ = tx.send(result);
                    }
                }
            }
            frame = stream.next() => {
                match frame {
                    None => {
                        tracing::debug!(connection = %id, "stream ended");
                        handler(id, DispatchEvent::Closed);
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(connection = %id, error = %e, "websocket receive error");
                        handler(id, DispatchEvent::Error(e.to_string()));
                        break;
                    }
                    Some(Ok(message)) => {
                        let Some(message) = from_ws_message(message) else {
                            continue;
                        };
                        let close = message.is_close();
                        tracing::trace!(connection = %id, kind = message.kind(), len = message.len(), "received");
                        handler(id, DispatchEvent::Message(message));
                        if close {
                            // Flushes the close reply tungstenite queued.
                            let _ = sink.close().await;
                            break;
                        }
                    }
                }
            }
        }
    }

    // Fail whatever is still queued.
    cmd_rx.close();
    while let Ok(WsCommand::Send { tx, .. }) = cmd_rx.try_recv() {
        let _ = tx.send(Err(SendError::Closed(id)));
    }
}

fn lock(connections: &ConnectionMap) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, mpsc::UnboundedSender<WsCommand>>> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}
