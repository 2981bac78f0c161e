//! `ConnectionRegistry` — maps connection identifiers to live sessions.
//!
//! Entries are inserted by [`ConnectionRegistry::connect`] and removed when
//! the transport reports a terminal event for that connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::config::ConnectionConfig;
use crate::error::ConnectionError;
use crate::listener::Listener;
use crate::message::DispatchEvent;
use crate::session::{Session, SessionState};
use crate::transport::{ConnectionId, EventHandler, Transport};

type SessionMap = Mutex<HashMap<ConnectionId, Session>>;

/// Opens connections through a [`Transport`] and tracks the resulting
/// sessions.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct ConnectionRegistry {
    transport: Arc<dyn Transport>,
    sessions: Arc<SessionMap>,
}

impl ConnectionRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Connect to `url` and return the bound session with no listeners.
    ///
    /// Events the server sends before listeners are added after this call
    /// returns reach nobody. Use
    /// [`connect_with_listeners`](Self::connect_with_listeners) when the
    /// first frames matter.
    pub async fn connect(
        &self,
        url: &str,
        config: Option<ConnectionConfig>,
    ) -> Result<Session, ConnectionError> {
        self.connect_with_listeners(url, config, &[]).await
    }

    /// Connect to `url` with `listeners` already registered on the session.
    ///
    /// Headers in `config` are normalized before the transport sees them.
    /// The listeners are in place before the transport opens the socket, so
    /// they receive every event, including frames sent right after the
    /// handshake.
    pub async fn connect_with_listeners(
        &self,
        url: &str,
        config: Option<ConnectionConfig>,
        listeners: &[Listener],
    ) -> Result<Session, ConnectionError> {
        if url.trim().is_empty() {
            return Err(ConnectionError::InvalidUrl("url is empty".into()));
        }
        let config = config.unwrap_or_default().normalized()?;

        let state = Arc::new(SessionState::with_listeners(listeners));
        let handler = self.event_handler(Arc::clone(&state));

        tracing::debug!(url, transport = self.transport.name(), "opening connection");
        let id = self
            .transport
            .open(url, config, handler)
            .await
            .map_err(|e| {
                tracing::warn!(url, error = %e, "connect failed");
                e
            })?;

        let session = Session::new(id, state, Arc::clone(&self.transport));
        let stale = {
            let mut sessions = lock(&self.sessions);
            // A terminal event may already have been handled while `open` was
            // still resolving; never bind a dead session.
            if session.is_closed() {
                None
            } else {
                sessions.insert(id, session.clone())
            }
        };
        if let Some(stale) = stale {
            tracing::warn!(connection = %id, "transport reused a live connection id");
            if stale.state().close() {
                stale.state().fan_out(id, &DispatchEvent::Closed);
            }
        }

        tracing::info!(connection = %id, url, "session connected");
        Ok(session)
    }

    /// Route an event to the session bound to `id`.
    ///
    /// Returns `false` (and drops the event) when no session is bound.
    pub fn dispatch(&self, id: ConnectionId, event: DispatchEvent) -> bool {
        let session = lock(&self.sessions).get(&id).cloned();
        match session {
            Some(session) => {
                deliver(&self.sessions, id, session.state(), &event);
                true
            }
            None => {
                tracing::debug!(connection = %id, "no session bound, dropping event");
                false
            }
        }
    }

    pub fn session(&self, id: ConnectionId) -> Option<Session> {
        lock(&self.sessions).get(&id).cloned()
    }

    /// Identifiers of all live sessions, ascending.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = lock(&self.sessions).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn event_handler(&self, state: Arc<SessionState>) -> EventHandler {
        let sessions = Arc::downgrade(&self.sessions);
        Arc::new(move |id, event| {
            deliver_weak(&sessions, id, &state, &event);
        })
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("transport", &self.transport.name())
            .field("sessions", &self.ids())
            .finish()
    }
}

fn deliver_weak(sessions: &Weak<SessionMap>, id: ConnectionId, state: &Arc<SessionState>, event: &DispatchEvent) {
    match sessions.upgrade() {
        Some(sessions) => deliver(&sessions, id, state, event),
        // Registry dropped: the session handles still get their events.
        None => deliver_detached(id, state, event),
    }
}

/// Tear down first on a terminal event, then fan out, so listeners observe a
/// closed session while handling the close.
fn deliver(sessions: &SessionMap, id: ConnectionId, state: &Arc<SessionState>, event: &DispatchEvent) {
    if event.is_terminal() {
        if !state.close() {
            tracing::debug!(connection = %id, "session already closed, dropping event");
            return;
        }
        unbind(sessions, id, state);
        tracing::info!(connection = %id, reason = ?event, "session closed");
    } else if state.is_closed() {
        tracing::debug!(connection = %id, "session already closed, dropping event");
        return;
    }

    let outcome = state.fan_out(id, event);
    tracing::trace!(connection = %id, delivered = outcome.delivered, failed = outcome.failures.len(), "dispatched");
}

fn deliver_detached(id: ConnectionId, state: &SessionState, event: &DispatchEvent) {
    if event.is_terminal() {
        if !state.close() {
            return;
        }
    } else if state.is_closed() {
        return;
    }
    state.fan_out(id, event);
}

fn unbind(sessions: &SessionMap, id: ConnectionId, state: &Arc<SessionState>) {
    let mut sessions = lock(sessions);
    if sessions
        .get(&id)
        .is_some_and(|bound| Arc::ptr_eq(bound.state(), state))
    {
        sessions.remove(&id);
    }
}

fn lock(sessions: &SessionMap) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, Session>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CloseFrame, Message};
    use crate::testing::MockTransport;

    fn collector(session: &Session) -> Arc<Mutex<Vec<DispatchEvent>>> {
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&seen);
        session.listen(move |event| sink.lock().unwrap().push(event.clone()));
        seen
    }

    #[tokio::test]
    async fn connect_binds_session_and_normalizes_headers() {
        let transport = Arc::new(MockTransport::new());
        let registry = ConnectionRegistry::new(transport.clone());

        let config = ConnectionConfig::new()
            .with_header("X-Token", " secret ")
            .with_header("x-token", "other");
        let session = registry.connect("ws://example.test", Some(config)).await.unwrap();

        assert_eq!(registry.ids(), vec![session.id()]);
        assert_eq!(session.listener_count(), 0);
        assert_eq!(transport.handler_count(), 1);

        let (url, config) = transport.opened().remove(0);
        assert_eq!(url, "ws://example.test");
        let pairs: Vec<_> = config.headers.as_ref().unwrap().iter().collect();
        assert_eq!(pairs, vec![("x-token", "secret"), ("x-token", "other")]);
    }

    #[tokio::test]
    async fn connect_failure_produces_no_session() {
        let transport = Arc::new(MockTransport::failing("connection refused"));
        let registry = ConnectionRegistry::new(transport.clone());

        let err = registry.connect("ws://down.test", None).await.unwrap_err();
        assert_eq!(err, ConnectionError::Transport("connection refused".into()));
        assert!(registry.is_empty());
        assert_eq!(transport.handler_count(), 0);
    }

    #[tokio::test]
    async fn connect_rejects_empty_url_and_bad_headers() {
        let transport = Arc::new(MockTransport::new());
        let registry = ConnectionRegistry::new(transport.clone());

        let err = registry.connect("  ", None).await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidUrl(_)));

        let config = ConnectionConfig::new().with_header("bad header", "v");
        let err = registry.connect("ws://x", Some(config)).await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidHeader { .. }));

        assert!(transport.opened().is_empty());
    }

    #[tokio::test]
    async fn events_reach_only_their_own_session() {
        let transport = Arc::new(MockTransport::new());
        let registry = ConnectionRegistry::new(transport.clone());
        let first = registry.connect("ws://a", None).await.unwrap();
        let second = registry.connect("ws://b", None).await.unwrap();
        assert_ne!(first.id(), second.id());

        let first_seen = collector(&first);
        let second_seen = collector(&second);

        let event = DispatchEvent::Message(Message::Text("for first".into()));
        transport.emit(first.id(), event.clone());

        assert_eq!(*first_seen.lock().unwrap(), vec![event]);
        assert!(second_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_event_tears_down_exactly_once() {
        let transport = Arc::new(MockTransport::new());
        let registry = ConnectionRegistry::new(transport.clone());
        let session = registry.connect("ws://a", None).await.unwrap();
        let seen = collector(&session);

        let close = DispatchEvent::Message(Message::Close(Some(CloseFrame::new(1001, "going away"))));
        transport.emit(session.id(), close.clone());
        transport.emit(session.id(), DispatchEvent::Closed);
        transport.emit(session.id(), DispatchEvent::Message(Message::Text("late".into())));

        assert_eq!(*seen.lock().unwrap(), vec![close]);
        assert!(session.is_closed());
        assert!(registry.is_empty());
        assert!(registry.session(session.id()).is_none());
    }

    #[tokio::test]
    async fn listeners_see_closed_session_during_close_event() {
        let transport = Arc::new(MockTransport::new());
        let registry = ConnectionRegistry::new(transport.clone());
        let session = registry.connect("ws://a", None).await.unwrap();

        let observed = Arc::new(Mutex::new(None));
        {
            let observed = Arc::clone(&observed);
            let probe = session.clone();
            let registry = registry.clone();
            session.listen(move |_| {
                *observed.lock().unwrap() = Some((probe.is_closed(), registry.len()));
            });
        }

        transport.emit(session.id(), DispatchEvent::Error("connection reset".into()));
        assert_eq!(*observed.lock().unwrap(), Some((true, 0)));
    }

    #[tokio::test]
    async fn registry_dispatch_routes_by_id() {
        let transport = Arc::new(MockTransport::new());
        let registry = ConnectionRegistry::new(transport.clone());
        let session = registry.connect("ws://a", None).await.unwrap();
        let seen = collector(&session);

        assert!(registry.dispatch(session.id(), DispatchEvent::Message(Message::Pong(vec![1]))));
        assert!(!registry.dispatch(ConnectionId(999), DispatchEvent::Closed));
        assert!(registry.dispatch(session.id(), DispatchEvent::Closed));
        assert!(!registry.dispatch(session.id(), DispatchEvent::Closed));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![DispatchEvent::Message(Message::Pong(vec![1])), DispatchEvent::Closed]
        );
    }

    #[tokio::test]
    async fn close_during_open_never_binds() {
        let transport = Arc::new(MockTransport::closing_on_open());
        let registry = ConnectionRegistry::new(transport.clone());

        let session = registry.connect("ws://flaky", None).await.unwrap();
        assert!(session.is_closed());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn initial_listeners_see_events_sent_during_open() {
        let welcome = DispatchEvent::Message(Message::Text("welcome".into()));
        let transport = Arc::new(MockTransport::emitting_on_open(vec![welcome.clone()]));
        let registry = ConnectionRegistry::new(transport.clone());

        let seen = Arc::new(Mutex::new(vec![]));
        let listener = {
            let seen = Arc::clone(&seen);
            Listener::new(move |event| seen.lock().unwrap().push(event.clone()))
        };
        let session = registry
            .connect_with_listeners("ws://greeter", None, &[listener.clone(), listener])
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![welcome]);
        assert_eq!(session.listener_count(), 1);
        assert_eq!(registry.ids(), vec![session.id()]);
    }

    #[tokio::test]
    async fn reused_id_closes_the_stale_session() {
        let transport = Arc::new(MockTransport::reusing_ids());
        let registry = ConnectionRegistry::new(transport.clone());

        let first = registry.connect("ws://a", None).await.unwrap();
        let first_seen = collector(&first);
        let second = registry.connect("ws://b", None).await.unwrap();
        let second_seen = collector(&second);
        assert_eq!(first.id(), second.id());

        assert!(first.is_closed());
        assert_eq!(*first_seen.lock().unwrap(), vec![DispatchEvent::Closed]);
        assert!(!second.is_closed());
        assert_eq!(registry.len(), 1);

        // The id now routes to the new session only.
        let event = DispatchEvent::Message(Message::Text("b".into()));
        assert!(registry.dispatch(second.id(), event.clone()));
        assert_eq!(*first_seen.lock().unwrap(), vec![DispatchEvent::Closed]);
        assert_eq!(*second_seen.lock().unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn failing_listener_does_not_block_the_rest() {
        let transport = Arc::new(MockTransport::new());
        let registry = ConnectionRegistry::new(transport.clone());
        let session = registry.connect("ws://a", None).await.unwrap();

        let first = collector(&session);
        session.add_listener(&Listener::new(|_| panic!("boom")));
        let third = collector(&session);

        let event = DispatchEvent::Message(Message::Text("e".into()));
        transport.emit(session.id(), event.clone());

        assert_eq!(*first.lock().unwrap(), vec![event.clone()]);
        assert_eq!(*third.lock().unwrap(), vec![event]);
        assert!(!session.is_closed());
    }
}
