//! In-memory transport for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, SendError};
use crate::message::{DispatchEvent, Message};
use crate::transport::{ConnectionId, EventHandler, Transport};

#[derive(Default)]
pub(crate) struct MockTransport {
    next_id: AtomicU32,
    fail_open: Option<String>,
    on_open: Vec<DispatchEvent>,
    reuse_ids: bool,
    fail_send: Mutex<Option<String>>,
    handlers: Mutex<HashMap<ConnectionId, EventHandler>>,
    opened: Mutex<Vec<(String, ConnectionConfig)>>,
    sent: Mutex<Vec<(ConnectionId, Message)>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self {
            fail_open: Some(reason.to_owned()),
            ..Self::default()
        }
    }

    /// Reports `Closed` from inside `open`, before the id is returned.
    pub(crate) fn closing_on_open() -> Self {
        Self::emitting_on_open(vec![DispatchEvent::Closed])
    }

    /// Delivers `events` from inside `open`, before the id is returned.
    pub(crate) fn emitting_on_open(events: Vec<DispatchEvent>) -> Self {
        Self {
            on_open: events,
            ..Self::default()
        }
    }

    /// Hands out the same id for every connection.
    pub(crate) fn reusing_ids() -> Self {
        Self {
            reuse_ids: true,
            ..Self::default()
        }
    }

    pub(crate) fn fail_sends(&self, reason: &str) {
        *self.fail_send.lock().unwrap() = Some(reason.to_owned());
    }

    /// Deliver `event` the way a real transport would.
    pub(crate) fn emit(&self, id: ConnectionId, event: DispatchEvent) {
        let handler = self.handlers.lock().unwrap().get(&id).cloned();
        if let Some(handler) = handler {
            handler(id, event);
        }
    }

    pub(crate) fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    pub(crate) fn opened(&self) -> Vec<(String, ConnectionConfig)> {
        self.opened.lock().unwrap().clone()
    }

    pub(crate) fn sent(&self) -> Vec<(ConnectionId, Message)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        url: &str,
        config: ConnectionConfig,
        handler: EventHandler,
    ) -> Result<ConnectionId, ConnectionError> {
        self.opened.lock().unwrap().push((url.to_owned(), config));
        if let Some(reason) = &self.fail_open {
            return Err(ConnectionError::Transport(reason.clone()));
        }

        let id = if self.reuse_ids {
            ConnectionId(1)
        } else {
            ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
        };
        self.handlers.lock().unwrap().insert(id, handler.clone());
        for event in &self.on_open {
            handler(id, event.clone());
        }
        Ok(id)
    }

    async fn transmit(&self, id: ConnectionId, message: Message) -> Result<(), SendError> {
        if let Some(reason) = self.fail_send.lock().unwrap().clone() {
            return Err(SendError::Transport(reason));
        }
        self.sent.lock().unwrap().push((id, message));
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
