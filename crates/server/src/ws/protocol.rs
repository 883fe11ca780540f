use axum::extract::ws::{Message, WebSocket};
use coedit_common::protocol::ws::{
    encode_frame, is_supported_protocol_version, Frame, CURRENT_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
use serde_json::json;

use crate::error::{ErrorCode, ServerError};

/// Check the `protocol` query parameter of an upgrade request. A missing
/// parameter means the current version.
pub fn require_supported(requested: Option<&str>) -> Result<(), ServerError> {
    match requested {
        None => Ok(()),
        Some(version) if is_supported_protocol_version(version) => Ok(()),
        Some(version) => Err(ServerError::new(
            ErrorCode::UpgradeRequired,
            format!("unsupported protocol version `{version}`, expected `{CURRENT_PROTOCOL_VERSION}`"),
        )
        .with_details(json!({
            "requested": version,
            "supported": SUPPORTED_PROTOCOL_VERSIONS,
        }))),
    }
}

pub fn error_frame(code: ErrorCode, message: impl Into<String>) -> Frame {
    Frame::Error { code: code.as_str().to_string(), message: message.into() }
}

pub async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let encoded = encode_frame(frame).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}
