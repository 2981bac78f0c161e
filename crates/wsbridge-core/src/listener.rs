//! Listener handles and the per-session observer list.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::DispatchError;
use crate::message::DispatchEvent;
use crate::transport::ConnectionId;

type Callback = dyn Fn(&DispatchEvent) + Send + Sync;

/// A registered callback.
///
/// Identity is the underlying allocation: clones of one `Listener` are the
/// same listener, two `Listener::new` calls with the same closure are not.
#[derive(Clone)]
pub struct Listener {
    callback: Arc<Callback>,
}

impl Listener {
    pub fn new(callback: impl Fn(&DispatchEvent) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Returns `true` if both handles refer to the same callback.
    pub fn same(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.callback, &other.callback)
    }

    fn call(&self, event: &DispatchEvent) {
        (self.callback)(event);
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Listener")
            .field(&Arc::as_ptr(&self.callback).cast::<()>())
            .finish()
    }
}

/// Result of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Listeners in the snapshot, including the ones that failed.
    pub delivered: usize,
    pub failures: Vec<DispatchError>,
}

/// Ordered set of listeners. Insertion order is delivery order.
#[derive(Default)]
pub struct ObserverList {
    entries: Mutex<Vec<Listener>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `listener` unless it is already registered. Returns `true` if
    /// it was added.
    pub fn add(&self, listener: &Listener) -> bool {
        let mut entries = self.lock();
        if entries.iter().any(|l| l.same(listener)) {
            return false;
        }
        entries.push(listener.clone());
        true
    }

    /// Remove `listener` if present. Returns `true` if it was removed.
    pub fn remove(&self, listener: &Listener) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|l| l.same(listener)) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current listeners, in delivery order.
    pub fn snapshot(&self) -> Vec<Listener> {
        self.lock().clone()
    }

    /// Deliver `event` to every listener registered right now, in order.
    ///
    /// The lock is released before the first callback runs, so callbacks may
    /// add or remove listeners (themselves included); those changes apply
    /// from the next event on. A panicking callback is logged and skipped.
    pub fn dispatch(&self, connection: ConnectionId, event: &DispatchEvent) -> DispatchOutcome {
        let snapshot = self.snapshot();
        let mut failures = Vec::new();

        for (position, listener) in snapshot.iter().enumerate() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener.call(event))) {
                let err = DispatchError {
                    connection,
                    position,
                    message: panic_message(payload.as_ref()),
                };
                tracing::warn!(connection = %connection, position, error = %err, "listener failed");
                failures.push(err);
            }
        }

        DispatchOutcome {
            delivered: snapshot.len(),
            failures,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Listener>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
