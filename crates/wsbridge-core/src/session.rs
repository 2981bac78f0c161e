//! `Session` — the caller's handle to one live connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::SendError;
use crate::listener::{DispatchOutcome, Listener, ObserverList};
use crate::message::{CloseFrame, DispatchEvent, IntoMessage, Message};
use crate::transport::{ConnectionId, Transport};

/// State shared between a `Session`, its clones and the event handler the
/// registry installed on the transport.
#[derive(Default)]
pub(crate) struct SessionState {
    observers: ObserverList,
    closed: AtomicBool,
}

impl SessionState {
    /// State whose observer list already holds `listeners`, in order.
    pub(crate) fn with_listeners(listeners: &[Listener]) -> Self {
        let state = Self::default();
        for listener in listeners {
            state.observers.add(listener);
        }
        state
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the session torn down. Returns `false` if it already was.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn fan_out(&self, id: ConnectionId, event: &DispatchEvent) -> DispatchOutcome {
        self.observers.dispatch(id, event)
    }
}

/// A live client connection.
///
/// Cheap to clone; every clone shares the same listeners and lifecycle.
/// Created by [`ConnectionRegistry::connect`](crate::ConnectionRegistry::connect)
/// and torn down when the transport reports a close or an error.
#[derive(Clone)]
pub struct Session {
    id: ConnectionId,
    state: Arc<SessionState>,
    transport: Arc<dyn Transport>,
}

impl Session {
    pub(crate) fn new(id: ConnectionId, state: Arc<SessionState>, transport: Arc<dyn Transport>) -> Self {
        Self { id, state, transport }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` once the transport has reported a terminal event.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Register `listener`. Registering the same listener twice is a no-op.
    pub fn add_listener(&self, listener: &Listener) {
        if !self.state.observers.add(listener) {
            tracing::trace!(connection = %self.id, "listener already registered");
        }
    }

    /// Unregister `listener`. Unknown listeners are ignored.
    pub fn remove_listener(&self, listener: &Listener) {
        self.state.observers.remove(listener);
    }

    /// Wrap `callback` in a [`Listener`], register it and return the handle
    /// needed to remove it later.
    pub fn listen(&self, callback: impl Fn(&DispatchEvent) + Send + Sync + 'static) -> Listener {
        let listener = Listener::new(callback);
        self.add_listener(&listener);
        listener
    }

    pub fn listener_count(&self) -> usize {
        self.state.observers.len()
    }

    /// Send a message.
    ///
    /// Strings become `Text`, byte buffers become `Binary`, JSON values are
    /// validated with [`Message::from_value`]. Invalid input fails with
    /// [`SendError::Validation`] before the transport is touched.
    pub async fn send(&self, message: impl IntoMessage) -> Result<(), SendError> {
        let message = message.into_message()?;
        if self.is_closed() {
            return Err(SendError::Closed(self.id));
        }

        tracing::trace!(connection = %self.id, kind = message.kind(), len = message.len(), "send");
        self.transport.transmit(self.id, message).await
    }

    /// Ask the server to close the connection with a normal closure.
    ///
    /// The session stays usable until the transport reports the close; that
    /// report reaches listeners like any other event.
    pub async fn disconnect(&self) -> Result<(), SendError> {
        tracing::debug!(connection = %self.id, "disconnect requested");
        self.send(Message::Close(Some(CloseFrame::client_disconnect()))).await
    }

    pub(crate) fn state(&self) -> &Arc<SessionState> {
        &self.state
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("transport", &self.transport.name())
            .field("listeners", &self.listener_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
