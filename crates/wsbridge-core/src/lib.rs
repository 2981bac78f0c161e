//! wsbridge-core — sessions, listeners and the message model for websocket
//! clients.
//!
//! # Overview
//!
//! The core crate sits between application code and whatever performs the
//! actual websocket I/O. It defines:
//!
//! - [`Transport`] — the async trait a socket owner implements
//! - [`ConnectionRegistry`] — opens connections and maps ids to sessions
//! - [`Session`] — send / disconnect / listener management for one connection
//! - [`Message`] / [`DispatchEvent`] — wire types
//! - [`ConnectionConfig`] / [`Headers`] — per-connection options
//! - [`error`] module — validation, connection, send and dispatch errors
//!
//! ```text
//! caller ── connect ──▶ ConnectionRegistry ── open(url, config, handler) ──▶ Transport
//!   │                         │                                                 │
//!   └── send / disconnect ──▶ Session ─────────── transmit(id, message) ───────▶│
//!                             ▲                                                 │
//!                listeners ◀──┴──────────── handler(id, DispatchEvent) ◀────────┘
//! ```

pub mod config;
pub mod error;
pub mod listener;
pub mod message;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{ConnectionConfig, Headers};
pub use error::{ConnectionError, DispatchError, SendError, ValidationError};
pub use listener::{DispatchOutcome, Listener, ObserverList};
pub use message::{CloseFrame, DispatchEvent, IntoMessage, Message};
pub use registry::ConnectionRegistry;
pub use session::Session;
pub use transport::{ConnectionId, EventHandler, Transport};
