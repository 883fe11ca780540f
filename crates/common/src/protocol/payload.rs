// Typed request, acknowledgement, and broadcast payloads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reactions::ReactionMap;
use crate::types::{Delta, Participant, PresenceKind, Selection, SelectionDirection};

/// `join-document` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinDocument {
    pub document_id: String,
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Authoritative snapshot handed to a joining client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InitialState {
    #[serde(default)]
    pub content: String,
}

/// `join-document` acknowledgement result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct JoinAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<InitialState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<HashMap<String, ReactionMap>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<usize>,
}

/// `leave-document` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeaveDocument {
    pub document_id: String,
    pub user_id: String,
}

/// `presence` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    pub document_id: String,
    pub kind: PresenceKind,
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    pub member_count: usize,
}

/// `doc-change-client` request and `doc-change-server` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocChange {
    pub document_id: String,
    pub delta: Delta,
}

/// `doc-change-client` acknowledgement result: the server-confirmed delta.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocChangeAck {
    pub delta: Delta,
}

/// `position-update` request, acknowledgement result, and broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub document_id: String,
    pub user_id: String,
    pub start: usize,
    pub end: usize,
    #[serde(default)]
    pub direction: SelectionDirection,
}

impl PositionUpdate {
    pub fn selection(&self) -> Selection {
        Selection { start: self.start, end: self.end, direction: self.direction }
    }
}

/// `position-update` acknowledgement result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PositionAck {
    pub position: PositionUpdate,
}

/// `chat:new-message` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSend {
    pub document_id: String,
    pub content: String,
    pub fallback_id: String,
}

/// `chat:new-message` acknowledgement result. The message stays loosely
/// typed until the receiver normalizes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSendAck {
    pub message: Value,
}

/// `chat:new-message` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatBroadcast {
    pub document_id: String,
    pub message: Value,
}

/// `chat:reaction` toggle request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionToggle {
    pub document_id: String,
    pub message_id: String,
    pub emoji: String,
}

/// `chat:reaction` acknowledgement result and broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUpdate {
    pub document_id: String,
    pub message_id: String,
    pub emoji: String,
    pub user_ids: Vec<String>,
}

/// `GET /v1/documents/{documentId}/participants` response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantsResponse {
    pub document_id: String,
    #[serde(default)]
    pub participants: Vec<Participant>,
}
