//! The `Transport` trait — the boundary to whatever owns the real socket.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, SendError};
use crate::message::{DispatchEvent, Message};

/// Opaque identifier of a live connection, assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u32);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ConnectionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Inbound event callback handed to [`Transport::open`].
///
/// The transport calls it once per event, one event at a time per
/// connection, until it has reported a terminal event.
pub type EventHandler = Arc<dyn Fn(ConnectionId, DispatchEvent) + Send + Sync>;

/// The network side of a session.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and is stored as `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `url` and start delivering its events to
    /// `handler`.
    ///
    /// The handler is installed before the first frame is read, so nothing
    /// received on the socket can be missed. `config` arrives already
    /// normalized.
    async fn open(
        &self,
        url: &str,
        config: ConnectionConfig,
        handler: EventHandler,
    ) -> Result<ConnectionId, ConnectionError>;

    /// Queue `message` on connection `id`. Resolves once the frame has been
    /// accepted for transmission, not when the peer received it.
    async fn transmit(&self, id: ConnectionId, message: Message) -> Result<(), SendError>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}
