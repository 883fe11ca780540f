use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use chrono::Utc;
use coedit_common::normalize::normalize_chat_message;
use coedit_common::protocol::payload::{
    ChatBroadcast, ChatSend, ChatSendAck, DocChange, DocChangeAck, InitialState, JoinAck,
    JoinDocument, LeaveDocument, PositionAck, PositionUpdate, PresenceNotice, ReactionToggle,
    ReactionUpdate,
};
use coedit_common::protocol::ws::{decode_frame, AckBody, EventName, Frame};
use coedit_common::types::PresenceKind;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::{error_frame, require_supported, send_frame};
use super::{HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, MAX_FRAME_BYTES};
use crate::app::AppState;
use crate::error::{
    current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ErrorCode,
};
use crate::rooms::{ConnectionId, Member, Peers, RoomError};
use crate::store::{DocumentStore, MessageAuthor, StoreError};

type Reply = Result<AckBody, AckBody>;

pub async fn ws_upgrade<S: DocumentStore>(
    Path(document_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> impl IntoResponse {
    if let Err(upgrade_error) = require_supported(params.get("protocol").map(String::as_str)) {
        return upgrade_error.into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_FRAME_BYTES).on_upgrade(move |socket| async move {
        with_request_id_scope(request_id, handle_socket(state, document_id, socket)).await;
    })
}

fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason().into(),
        })))
        .await;
}

async fn handle_socket<S: DocumentStore>(state: AppState<S>, document_id: String, mut socket: WebSocket) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<Frame>();
    let mut connection = Connection {
        state,
        document_id,
        connection_id: Uuid::new_v4(),
        outbound: outbound_sender,
        joined: false,
    };
    debug!(
        document_id = %connection.document_id,
        connection_id = %connection.connection_id,
        request_id = %request_id,
        "channel opened"
    );

    // Ping every HEARTBEAT_INTERVAL_MS; disconnect when a ping stays
    // unanswered for longer than HEARTBEAT_TIMEOUT_MS.
    let mut heartbeat_interval = tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset();
    let heartbeat_timeout = Duration::from_millis(HEARTBEAT_TIMEOUT_MS);
    let mut awaiting_pong_since: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if awaiting_pong_since.is_some_and(|since| since.elapsed() > heartbeat_timeout) {
                    warn!(
                        document_id = %connection.document_id,
                        connection_id = %connection.connection_id,
                        "heartbeat timeout, disconnecting"
                    );
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong_since.get_or_insert_with(Instant::now);
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(frame) => {
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        awaiting_pong_since = None;
                        if raw_message.len() > MAX_FRAME_BYTES {
                            close_frame_too_large(&mut socket).await;
                            break;
                        }

                        let reply = match decode_frame(&raw_message) {
                            Ok(Frame::Request { id, event, payload }) => {
                                let body = connection.handle_request(event, payload).await;
                                Some(Frame::Ack { id, body })
                            }
                            Ok(Frame::Notify { event, payload }) => connection.handle_notify(event, payload).await,
                            Ok(_) => Some(error_frame(
                                ErrorCode::InvalidMessage,
                                "only request and notify frames are accepted",
                            )),
                            Err(error) => {
                                debug!(error = %error, "undecodable frame");
                                Some(error_frame(ErrorCode::InvalidMessage, "invalid websocket frame payload"))
                            }
                        };

                        if let Some(reply) = reply {
                            if send_frame(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        let frame = error_frame(ErrorCode::InvalidMessage, "binary frames are not supported");
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        awaiting_pong_since = None;
                    }
                    Ok(Message::Close(_)) => break,
                    Err(error) => {
                        if is_frame_size_violation(&error) {
                            close_frame_too_large(&mut socket).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    connection.leave().await;
    debug!(
        document_id = %connection.document_id,
        connection_id = %connection.connection_id,
        "channel closed"
    );
}

/// Per-socket state. A channel serves exactly one document.
struct Connection<S> {
    state: AppState<S>,
    document_id: String,
    connection_id: ConnectionId,
    outbound: mpsc::UnboundedSender<Frame>,
    joined: bool,
}

impl<S: DocumentStore> Connection<S> {
    async fn handle_request(&mut self, event: EventName, payload: Value) -> AckBody {
        let reply = match event {
            EventName::JoinDocument => self.join(payload).await,
            EventName::LeaveDocument => self.leave_request(payload).await,
            EventName::DocChangeClient => self.doc_change(payload).await,
            EventName::PositionUpdate => self.position_update(payload).await,
            EventName::ChatNewMessage => self.chat_message(payload).await,
            EventName::ChatReaction => self.chat_reaction(payload).await,
            EventName::Presence | EventName::DocChangeServer => {
                Err(ErrorCode::InvalidMessage.reject(format!("`{event}` is sent by the server only")))
            }
        };

        if let Err(rejection) = &reply {
            debug!(
                document_id = %self.document_id,
                event = %event,
                code = ?rejection.code,
                reason = ?rejection.reason,
                "request rejected"
            );
        }
        reply.unwrap_or_else(|rejection| rejection)
    }

    async fn handle_notify(&mut self, event: EventName, payload: Value) -> Option<Frame> {
        match event {
            EventName::LeaveDocument => match self.leave_request(payload).await {
                Ok(_) => None,
                Err(rejection) => Some(Frame::Error {
                    code: rejection.code.unwrap_or_else(|| ErrorCode::ValidationFailed.as_str().to_string()),
                    message: rejection.reason.unwrap_or_default(),
                }),
            },
            _ => Some(error_frame(
                ErrorCode::InvalidMessage,
                format!("`{event}` must be sent as a request"),
            )),
        }
    }

    fn check_document(&self, document_id: &str) -> Result<(), AckBody> {
        if document_id == self.document_id {
            Ok(())
        } else {
            Err(ErrorCode::ValidationFailed.reject(format!(
                "document `{document_id}` does not match channel document `{}`",
                self.document_id
            )))
        }
    }

    async fn member(&self) -> Result<Member, AckBody> {
        self.state.rooms.member(&self.document_id, self.connection_id).await.map_err(room_rejection)
    }

    async fn join(&mut self, payload: Value) -> Reply {
        let request: JoinDocument = parse(EventName::JoinDocument, payload)?;
        self.check_document(&request.document_id)?;
        if request.user_id.trim().is_empty() {
            return Err(ErrorCode::ValidationFailed.reject("userId is required"));
        }

        let permission = self
            .state
            .store
            .permission_for(&self.document_id, &request.user_id)
            .await
            .map_err(|error| store_rejection(&self.document_id, &error))?;
        if !permission.can_read() {
            info!(document_id = %self.document_id, user_id = %request.user_id, "join refused");
            return Err(ErrorCode::Forbidden.reject_default());
        }

        let member = Member {
            connection_id: self.connection_id,
            user_id: request.user_id.clone(),
            display_name: request.display_name.clone(),
            email: request.email.clone(),
            permission,
            selection: None,
            outbound: self.outbound.clone(),
        };

        let store = Arc::clone(&self.state.store);
        let autosave = self.state.autosave.clone();
        let document_id = self.document_id.clone();
        let joined = self
            .state
            .rooms
            .join(&self.document_id, member, || async move {
                // Content not yet persisted is newer than the stored copy.
                if let Some(content) = autosave.pending_content(&document_id).await {
                    return Ok(content);
                }
                store.fetch_document(&document_id).await.map(|record| record.content)
            })
            .await
            .map_err(|error: StoreError| store_rejection(&self.document_id, &error))?;
        self.joined = true;

        broadcast(
            &joined.peers,
            EventName::Presence,
            &PresenceNotice {
                document_id: self.document_id.clone(),
                kind: PresenceKind::Joined,
                user_id: request.user_id.clone(),
                display_name: request.display_name.clone(),
                member_count: joined.member_count,
            },
        );
        info!(
            document_id = %self.document_id,
            user_id = %request.user_id,
            members = joined.member_count,
            "member joined"
        );

        success(&JoinAck {
            initial_state: Some(InitialState { content: joined.content }),
            reactions: Some(joined.reactions),
            member_count: Some(joined.member_count),
        })
    }

    async fn leave_request(&mut self, payload: Value) -> Reply {
        let request: LeaveDocument = parse(EventName::LeaveDocument, payload)?;
        self.check_document(&request.document_id)?;
        self.leave().await;
        success(&())
    }

    /// Drop this connection's membership, telling the remaining members.
    async fn leave(&mut self) {
        if !std::mem::take(&mut self.joined) {
            return;
        }
        let Some(left) = self.state.rooms.leave(&self.document_id, self.connection_id).await else {
            return;
        };

        broadcast(
            &left.peers,
            EventName::Presence,
            &PresenceNotice {
                document_id: self.document_id.clone(),
                kind: PresenceKind::Left,
                user_id: left.member.user_id.clone(),
                display_name: left.member.display_name.clone(),
                member_count: left.member_count,
            },
        );
        info!(
            document_id = %self.document_id,
            user_id = %left.member.user_id,
            members = left.member_count,
            room_closed = left.room_closed,
            "member left"
        );
    }

    async fn doc_change(&mut self, payload: Value) -> Reply {
        let mut change: DocChange = parse(EventName::DocChangeClient, payload)?;
        self.check_document(&change.document_id)?;
        let member = self.member().await?;
        change.delta.user_id = member.user_id.clone();

        let content = change.delta.new_text.text.clone();
        let peers = self
            .state
            .rooms
            .apply_content(&self.document_id, self.connection_id, &content, change.delta.resulting_selection())
            .await
            .map_err(room_rejection)?;

        broadcast(&peers, EventName::DocChangeServer, &change);
        self.state.autosave.record_edit(&member.user_id, &self.document_id, &content).await;

        success(&DocChangeAck { delta: change.delta })
    }

    async fn position_update(&mut self, payload: Value) -> Reply {
        let update: PositionUpdate = parse(EventName::PositionUpdate, payload)?;
        self.check_document(&update.document_id)?;
        let member = self.member().await?;

        let (selection, peers) = self
            .state
            .rooms
            .update_selection(&self.document_id, self.connection_id, update.selection())
            .await
            .map_err(room_rejection)?;
        let position = PositionUpdate {
            document_id: self.document_id.clone(),
            user_id: member.user_id,
            start: selection.start,
            end: selection.end,
            direction: selection.direction,
        };

        broadcast(&peers, EventName::PositionUpdate, &position);
        success(&PositionAck { position })
    }

    async fn chat_message(&mut self, payload: Value) -> Reply {
        let request: ChatSend = parse(EventName::ChatNewMessage, payload)?;
        self.check_document(&request.document_id)?;
        if request.content.trim().is_empty() {
            return Err(ErrorCode::ValidationFailed.reject("message content is empty"));
        }
        let member = self.member().await?;

        let author = MessageAuthor {
            user_id: member.user_id.clone(),
            display_name: member.display_name.clone(),
            email: member.email.clone(),
        };
        let stored = self
            .state
            .store
            .persist_message(&self.document_id, &author, &request.content)
            .await
            .map_err(|error| store_rejection(&self.document_id, &error))?;
        let message = normalize_chat_message(&stored, Utc::now()).map_err(|error| {
            warn!(document_id = %self.document_id, error = %error, "storage returned a malformed message");
            ErrorCode::StorageFailed.reject(format!("stored message is malformed: {error}"))
        })?;

        let (rendered, peers) = self
            .state
            .rooms
            .render_message(&self.document_id, self.connection_id, &message)
            .await
            .map_err(room_rejection)?;
        let message = serde_json::to_value(&rendered).map_err(|error| {
            error!(error = %error, "failed to encode chat message");
            ErrorCode::InternalError.reject_default()
        })?;

        broadcast(
            &peers,
            EventName::ChatNewMessage,
            &ChatBroadcast { document_id: self.document_id.clone(), message: message.clone() },
        );
        debug!(document_id = %self.document_id, message_id = %rendered.id, "chat message stored");

        success(&ChatSendAck { message })
    }

    async fn chat_reaction(&mut self, payload: Value) -> Reply {
        let toggle: ReactionToggle = parse(EventName::ChatReaction, payload)?;
        self.check_document(&toggle.document_id)?;
        if toggle.message_id.trim().is_empty() || toggle.emoji.trim().is_empty() {
            return Err(ErrorCode::ValidationFailed.reject("messageId and emoji are required"));
        }

        let (user_ids, peers) = self
            .state
            .rooms
            .toggle_reaction(&self.document_id, self.connection_id, &toggle.message_id, &toggle.emoji)
            .await
            .map_err(room_rejection)?;
        let update = ReactionUpdate {
            document_id: self.document_id.clone(),
            message_id: toggle.message_id,
            emoji: toggle.emoji,
            user_ids,
        };

        broadcast(&peers, EventName::ChatReaction, &update);
        success(&update)
    }
}

fn parse<T: DeserializeOwned>(event: EventName, payload: Value) -> Result<T, AckBody> {
    serde_json::from_value(payload)
        .map_err(|error| ErrorCode::ValidationFailed.reject(format!("invalid `{event}` payload: {error}")))
}

fn success<T: Serialize>(result: &T) -> Reply {
    AckBody::success(result).map_err(|error| {
        error!(error = %error, "failed to encode ack result");
        ErrorCode::InternalError.reject_default()
    })
}

fn room_rejection(error: RoomError) -> AckBody {
    match error {
        RoomError::NotJoined => ErrorCode::NotJoined.reject_default(),
        RoomError::ReadOnly => ErrorCode::ReadOnly.reject_default(),
    }
}

fn store_rejection(document_id: &str, error: &StoreError) -> AckBody {
    match error {
        StoreError::NotFound(_) => ErrorCode::NotFound.reject(format!("document `{document_id}` not found")),
        _ => {
            warn!(document_id = %document_id, error = %error, "document storage call failed");
            ErrorCode::StorageFailed.reject_default()
        }
    }
}

fn broadcast<T: Serialize>(peers: &Peers, event: EventName, payload: &T) {
    if peers.is_empty() {
        return;
    }
    match Frame::event(event, payload) {
        Ok(frame) => {
            let delivered = peers.send(&frame);
            debug!(event = %event, delivered, "broadcast queued");
        }
        Err(error) => error!(event = %event, error = %error, "failed to encode broadcast"),
    }
}
