// Frame envelope and event vocabulary for the coedit-collab.v1 protocol.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const CURRENT_PROTOCOL_VERSION: &str = "coedit-collab.v1";
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[CURRENT_PROTOCOL_VERSION];

#[must_use]
pub fn is_supported_protocol_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Event names exchanged over a document channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventName {
    #[serde(rename = "join-document")]
    JoinDocument,
    #[serde(rename = "leave-document")]
    LeaveDocument,
    #[serde(rename = "presence")]
    Presence,
    #[serde(rename = "doc-change-client")]
    DocChangeClient,
    #[serde(rename = "doc-change-server")]
    DocChangeServer,
    #[serde(rename = "position-update")]
    PositionUpdate,
    #[serde(rename = "chat:new-message")]
    ChatNewMessage,
    #[serde(rename = "chat:reaction")]
    ChatReaction,
}

impl EventName {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JoinDocument => "join-document",
            Self::LeaveDocument => "leave-document",
            Self::Presence => "presence",
            Self::DocChangeClient => "doc-change-client",
            Self::DocChangeServer => "doc-change-server",
            Self::PositionUpdate => "position-update",
            Self::ChatNewMessage => "chat:new-message",
            Self::ChatReaction => "chat:reaction",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One WebSocket text frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Client -> Server: request expecting an [`Frame::Ack`] with the same id.
    Request { id: u64, event: EventName, payload: Value },

    /// Client -> Server: fire-and-forget notification.
    Notify { event: EventName, payload: Value },

    /// Server -> Client: acknowledgement of a request.
    Ack { id: u64, body: AckBody },

    /// Server -> Client: broadcast event.
    Event { event: EventName, payload: Value },

    /// Server -> Client: frame-level error not tied to a request.
    Error { code: String, message: String },
}

impl Frame {
    pub fn request<T: Serialize>(id: u64, event: EventName, payload: &T) -> Result<Self, FrameError> {
        Ok(Self::Request { id, event, payload: serde_json::to_value(payload)? })
    }

    pub fn notify<T: Serialize>(event: EventName, payload: &T) -> Result<Self, FrameError> {
        Ok(Self::Notify { event, payload: serde_json::to_value(payload)? })
    }

    pub fn event<T: Serialize>(event: EventName, payload: &T) -> Result<Self, FrameError> {
        Ok(Self::Event { event, payload: serde_json::to_value(payload)? })
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ack result is not a JSON object")]
    NonObjectResult,
}

pub fn decode_frame(raw: &str) -> Result<Frame, FrameError> {
    Ok(serde_json::from_str(raw)?)
}

pub fn encode_frame(frame: &Frame) -> Result<String, FrameError> {
    Ok(serde_json::to_string(frame)?)
}

/// Acknowledgement body: `{ ok, reason?, code?, ...result }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckBody {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(flatten)]
    pub result: Map<String, Value>,
}

impl AckBody {
    pub fn success<T: Serialize>(result: &T) -> Result<Self, FrameError> {
        match serde_json::to_value(result)? {
            Value::Object(result) => Ok(Self { ok: true, reason: None, code: None, result }),
            Value::Null => Ok(Self { ok: true, reason: None, code: None, result: Map::new() }),
            _ => Err(FrameError::NonObjectResult),
        }
    }

    pub fn rejected(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { ok: false, reason: Some(reason.into()), code: Some(code.into()), result: Map::new() }
    }

    /// Decode the flattened result into `T` when `ok`, or a rejection otherwise.
    pub fn into_outcome<T: DeserializeOwned>(self) -> Result<AckOutcome<T>, FrameError> {
        if !self.ok {
            return Ok(AckOutcome::Rejected {
                reason: self.reason.unwrap_or_else(|| "request rejected".to_string()),
                code: self.code,
            });
        }
        let result = serde_json::from_value(Value::Object(self.result))?;
        Ok(AckOutcome::Confirmed(result))
    }
}

/// Settled state of a request that expected an acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome<T> {
    /// The server accepted the request and returned its authoritative result.
    Confirmed(T),
    /// The server explicitly refused the request.
    Rejected { reason: String, code: Option<String> },
    /// No acknowledgement arrived in time.
    Missing,
}

impl<T> AckOutcome<T> {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AckOutcome<U> {
        match self {
            Self::Confirmed(value) => AckOutcome::Confirmed(f(value)),
            Self::Rejected { reason, code } => AckOutcome::Rejected { reason, code },
            Self::Missing => AckOutcome::Missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn event_names_match_wire_vocabulary() {
        let names = [
            (EventName::JoinDocument, "join-document"),
            (EventName::LeaveDocument, "leave-document"),
            (EventName::Presence, "presence"),
            (EventName::DocChangeClient, "doc-change-client"),
            (EventName::DocChangeServer, "doc-change-server"),
            (EventName::PositionUpdate, "position-update"),
            (EventName::ChatNewMessage, "chat:new-message"),
            (EventName::ChatReaction, "chat:reaction"),
        ];

        for (name, wire) in names {
            assert_eq!(serde_json::to_value(name).expect("name should serialize"), json!(wire));
            assert_eq!(name.as_str(), wire);
        }
    }

    #[test]
    fn ack_body_flattens_result_fields() {
        let body = AckBody::success(&json!({ "delta": { "x": 1 } })).expect("ack should build");
        let value = serde_json::to_value(&body).expect("ack should serialize");

        assert_eq!(value, json!({ "ok": true, "delta": { "x": 1 } }));
    }

    #[test]
    fn rejected_ack_becomes_rejected_outcome() {
        let raw = json!({ "ok": false, "reason": "read only", "code": "READ_ONLY" });
        let body: AckBody = serde_json::from_value(raw).expect("ack should parse");
        let outcome = body.into_outcome::<Value>().expect("outcome should decode");

        assert_eq!(
            outcome,
            AckOutcome::Rejected { reason: "read only".into(), code: Some("READ_ONLY".into()) }
        );
    }

    #[test]
    fn unknown_frame_type_fails_to_decode() {
        assert!(decode_frame(r#"{"type":"bogus"}"#).is_err());
        assert!(decode_frame(r#"{"type":"request","id":1,"event":"nope","payload":{}}"#).is_err());
    }
}
