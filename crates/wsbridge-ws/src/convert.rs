//! Conversions between `wsbridge-core` types and `tungstenite` types.

use std::borrow::Cow;

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame as WsCloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use wsbridge_core::{CloseFrame, ConnectionConfig, ConnectionError, Message};

/// Build the handshake request for `url`, carrying the configured headers.
pub fn build_request(url: &str, config: &ConnectionConfig) -> Result<Request, ConnectionError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ConnectionError::InvalidUrl(format!("{url}: {e}")))?;

    if let Some(headers) = &config.headers {
        for (name, value) in headers.iter() {
            let invalid = |reason: String| ConnectionError::InvalidHeader {
                name: name.to_owned(),
                reason,
            };
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            request.headers_mut().append(header, value);
        }
    }

    Ok(request)
}

/// Translate connection limits; unset fields keep tungstenite's defaults.
pub fn websocket_config(config: &ConnectionConfig) -> WebSocketConfig {
    let mut ws = WebSocketConfig::default();
    if let Some(bytes) = config.write_buffer_size {
        ws.write_buffer_size = bytes;
    }
    if let Some(bytes) = config.max_write_buffer_size {
        ws.max_write_buffer_size = bytes;
    }
    if let Some(bytes) = config.max_message_size {
        ws.max_message_size = Some(bytes);
    }
    if let Some(bytes) = config.max_frame_size {
        ws.max_frame_size = Some(bytes);
    }
    if let Some(accept) = config.accept_unmasked_frames {
        ws.accept_unmasked_frames = accept;
    }
    ws
}

pub fn to_ws_message(message: Message) -> WsMessage {
    match message {
        Message::Text(text) => WsMessage::Text(text),
        Message::Binary(data) => WsMessage::Binary(data),
        Message::Ping(data) => WsMessage::Ping(data),
        Message::Pong(data) => WsMessage::Pong(data),
        Message::Close(frame) => WsMessage::Close(frame.map(|f| WsCloseFrame {
            code: CloseCode::from(f.code),
            reason: Cow::Owned(f.reason),
        })),
    }
}

/// `None` for raw frames, which never surface while reading.
pub fn from_ws_message(message: WsMessage) -> Option<Message> {
    Some(match message {
        WsMessage::Text(text) => Message::Text(text),
        WsMessage::Binary(data) => Message::Binary(data),
        WsMessage::Ping(data) => Message::Ping(data),
        WsMessage::Pong(data) => Message::Pong(data),
        WsMessage::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.into_owned(),
        })),
        WsMessage::Frame(_) => return None,
    })
}
