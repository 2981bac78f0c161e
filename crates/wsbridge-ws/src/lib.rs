//! wsbridge-ws — websocket transport for wsbridge sessions.
//!
//! # Features
//! - Handshake headers and frame/message limits from `ConnectionConfig`
//! - One Tokio task per connection owning the socket
//! - Sends acknowledged once the frame is written to the socket
//! - Exactly one terminal event per connection (close frame, error or EOF)

pub mod convert;
pub mod transport;

pub use transport::{WsTransport, WsTransportConfig};
