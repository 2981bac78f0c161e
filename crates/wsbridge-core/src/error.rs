//! Error taxonomy for sessions, sends and dispatch.

use thiserror::Error;

use crate::transport::ConnectionId;

/// Malformed input handed to [`Session::send`](crate::Session::send).
///
/// Always raised locally, before the transport is involved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The value is neither a tagged message, a string nor a byte array.
    #[error(
        "invalid message: expected a `{{ type, data }}` object, a string or a byte array, got {found}"
    )]
    UnsupportedInput { found: &'static str },

    /// A tagged object named a message type that does not exist.
    #[error("unknown message type: {0:?}")]
    UnknownType(String),

    /// The payload does not match the shape required by its tag.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },

    /// A byte array contained something other than an integer in `0..=255`.
    #[error("byte array element {index} is not in 0..=255: {value}")]
    ByteOutOfRange { index: usize, value: String },
}

/// Failure to establish a connection. No session is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    /// The transport could not open the socket.
    #[error("connection failed: {0}")]
    Transport(String),
}

/// Failure to hand an outbound message to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The session was torn down before the message could be sent.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// The transport has no live socket under this identifier.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The transport rejected the frame (size limit, socket error, ...).
    #[error("send failed: {0}")]
    Transport(String),
}

impl SendError {
    /// Returns `true` if the message was rejected before reaching the transport.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns `true` if the connection is gone and further sends will fail too.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_) | Self::UnknownConnection(_))
    }
}

/// A listener panicked while an event was being fanned out.
///
/// Never propagated: delivery continues with the next listener and the
/// failure is logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("listener #{position} on connection {connection} panicked: {message}")]
pub struct DispatchError {
    pub connection: ConnectionId,
    /// Index of the listener in the snapshot taken for this fan-out.
    pub position: usize,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_converts_into_send_error() {
        let err: SendError = ValidationError::UnknownType("Frame".into()).into();
        assert!(err.is_validation());
        assert!(!err.is_closed());
        assert_eq!(err.to_string(), "unknown message type: \"Frame\"");
    }

    #[test]
    fn closed_errors_are_terminal() {
        assert!(SendError::Closed(ConnectionId(3)).is_closed());
        assert!(SendError::UnknownConnection(ConnectionId(3)).is_closed());
        assert!(!SendError::Transport("boom".into()).is_closed());
    }
}
