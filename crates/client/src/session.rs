// Collaboration session for one document.
//
// Wires membership, delta sync, presence and chat to a shared channel. One
// dispatcher task consumes channel events; caller operations await their
// acks without blocking it. Observers read a `SessionView` published
// through a watch channel after every state change.

use std::sync::Arc;

use chrono::Utc;
use coedit_common::protocol::payload::{
    ChatBroadcast, ChatSend, ChatSendAck, DocChange, DocChangeAck, JoinAck, JoinDocument, PositionAck,
    PositionUpdate, PresenceNotice, ReactionToggle, ReactionUpdate,
};
use coedit_common::protocol::ws::{AckOutcome, EventName};
use coedit_common::types::{ChatMessage, Participant, Selection, SelectionDirection};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::channel::{Channel, ChannelEvent};
use crate::chat::ChatLog;
use crate::config::LocalUser;
use crate::cue::{play_best_effort, SoundCue};
use crate::delta::{DeltaEngine, Settlement};
use crate::directory::ParticipantDirectory;
use crate::error::SessionError;
use crate::membership::{Membership, MembershipState};
use crate::presence::ParticipantList;

/// Read-only snapshot of a session, republished after every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    pub document_id: String,
    pub membership: MembershipState,
    pub joined: bool,
    pub content: String,
    pub selection: Selection,
    pub participants: Vec<Participant>,
    pub messages: Vec<ChatMessage>,
    pub member_count: usize,
    pub last_presence: Option<PresenceNotice>,
    pub join_error: Option<String>,
}

struct SessionState {
    membership: Membership,
    delta: DeltaEngine,
    participants: ParticipantList,
    chat: ChatLog,
}

impl SessionState {
    fn view(&self, document_id: &str) -> SessionView {
        SessionView {
            document_id: document_id.to_string(),
            membership: self.membership.state(),
            joined: self.membership.is_joined(),
            content: self.delta.content().to_string(),
            selection: self.delta.selection(),
            participants: self.participants.participants().to_vec(),
            messages: self.chat.rendered(),
            member_count: self.membership.member_count(),
            last_presence: self.membership.last_presence().cloned(),
            join_error: self.membership.join_error().map(str::to_string),
        }
    }
}

struct SessionInner<D> {
    channel: Channel,
    document_id: String,
    user: LocalUser,
    directory: D,
    cue: Box<dyn SoundCue>,
    state: Mutex<SessionState>,
    view: watch::Sender<SessionView>,
}

pub struct CollabSession<D: ParticipantDirectory> {
    inner: Arc<SessionInner<D>>,
    dispatcher: JoinHandle<()>,
}

impl<D: ParticipantDirectory> CollabSession<D> {
    /// Attach a session to `channel` and start processing its events. The
    /// session joins as soon as the channel is connected.
    pub fn start(channel: Channel, user: LocalUser, directory: D, cue: Box<dyn SoundCue>) -> Self {
        let document_id = channel.document_id().to_string();
        let state = SessionState {
            membership: Membership::new(Some(document_id.clone())),
            delta: DeltaEngine::new(document_id.clone(), user.id.clone()),
            participants: ParticipantList::new(document_id.clone()),
            chat: ChatLog::new(),
        };
        let (view, _) = watch::channel(state.view(&document_id));

        let events = channel.subscribe();
        let already_connected = channel.is_connected();
        let inner = Arc::new(SessionInner {
            channel,
            document_id,
            user,
            directory,
            cue,
            state: Mutex::new(state),
            view,
        });

        let dispatcher = tokio::spawn(dispatch(Arc::clone(&inner), events, already_connected));
        Self { inner, dispatcher }
    }

    pub fn document_id(&self) -> &str {
        &self.inner.document_id
    }

    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    /// Subscribe to view updates.
    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.inner.view.subscribe()
    }

    pub fn snapshot(&self) -> SessionView {
        self.inner.view.borrow().clone()
    }

    /// (Re)join the document. While disconnected the join is deferred to the
    /// next connect.
    pub async fn join(&self) -> Result<(), SessionError> {
        if !self.inner.channel.is_connected() {
            let mut state = self.inner.state.lock().await;
            state.membership.resume();
            self.inner.publish(&state);
            return Ok(());
        }

        let join = {
            let mut state = self.inner.state.lock().await;
            let join = state.membership.request_join(&self.inner.user);
            self.inner.publish(&state);
            join
        };
        match join {
            Some(join) => self.inner.run_join(join).await,
            None => Ok(()),
        }
    }

    /// Leave the document. Reconnects will not rejoin until [`Self::join`].
    pub async fn leave(&self) -> Result<(), SessionError> {
        let leave = {
            let mut state = self.inner.state.lock().await;
            let leave = state.membership.leave(&self.inner.user);
            self.inner.publish(&state);
            leave
        };
        if let Some(leave) = leave {
            self.inner.channel.notify(EventName::LeaveDocument, &leave)?;
        }
        Ok(())
    }

    /// Send a local edit and settle the buffer with the server's answer.
    pub async fn update_content(
        &self,
        new_text: &str,
        selection_start: usize,
        selection_end: usize,
        direction: SelectionDirection,
    ) -> Result<Settlement, SessionError> {
        let change = {
            let state = self.inner.state.lock().await;
            if !state.membership.is_joined() {
                return Err(SessionError::NotJoined);
            }
            state.delta.local_edit(new_text, selection_start, selection_end, direction)
        };

        let outcome: AckOutcome<DocChangeAck> =
            self.inner.channel.request(EventName::DocChangeClient, &change).await?;

        let settlement = {
            let mut state = self.inner.state.lock().await;
            let settlement = state.delta.apply_ack(outcome);
            if let Settlement::Applied { selection } = settlement {
                state.participants.set_selection(&self.inner.user.id, Some(selection));
            }
            self.inner.publish(&state);
            settlement
        };

        match settlement {
            Settlement::Rejected { reason, code } => Err(SessionError::rejected(reason, code)),
            other => Ok(other),
        }
    }

    /// Move the local caret or selection. Applied optimistically; the ack
    /// may adjust it and a rejection rolls it back.
    pub async fn update_selection(
        &self,
        start: usize,
        end: usize,
        direction: SelectionDirection,
    ) -> Result<Selection, SessionError> {
        let update = PositionUpdate {
            document_id: self.inner.document_id.clone(),
            user_id: self.inner.user.id.clone(),
            start,
            end,
            direction,
        };

        let (pending, previous_local) = {
            let mut state = self.inner.state.lock().await;
            let previous_local = state.delta.selection();
            let pending = state.participants.optimistic(&update);
            state.delta.set_selection(update.selection());
            self.inner.publish(&state);
            (pending, previous_local)
        };

        let outcome: AckOutcome<PositionAck> =
            self.inner.channel.request(EventName::PositionUpdate, &update).await?;

        let mut state = self.inner.state.lock().await;
        let settled = state.participants.settle(pending, outcome);
        let result = match settled {
            AckOutcome::Confirmed(selection) => {
                state.delta.set_selection(selection);
                Ok(selection)
            }
            AckOutcome::Rejected { reason, code } => {
                state.delta.set_selection(previous_local);
                Err(SessionError::rejected(reason, code))
            }
            AckOutcome::Missing => Ok(update.selection()),
        };
        self.inner.publish(&state);
        result
    }

    /// Send a chat message. It shows up immediately under `fallback_id` (or
    /// a generated one) and is reconciled with the server's answer.
    pub async fn send_message(&self, content: &str, fallback_id: Option<String>) -> Result<ChatMessage, SessionError> {
        let fallback_id = fallback_id.unwrap_or_else(|| format!("local-{}", Uuid::new_v4()));
        let provisional = {
            let mut state = self.inner.state.lock().await;
            let message = state.chat.insert_provisional(&fallback_id, content, &self.inner.user, Utc::now());
            self.inner.publish(&state);
            message
        };

        let request = ChatSend {
            document_id: self.inner.document_id.clone(),
            content: content.to_string(),
            fallback_id: fallback_id.clone(),
        };
        let outcome = self.inner.channel.request::<_, ChatSendAck>(EventName::ChatNewMessage, &request).await;

        let mut state = self.inner.state.lock().await;
        let result = match outcome {
            Ok(AckOutcome::Confirmed(ack)) => match state.chat.confirm(&fallback_id, &ack.message, Utc::now()) {
                Ok(message) => Ok(message),
                Err(error) => {
                    warn!(document_id = %self.inner.document_id, error = %error, "unusable chat ack; keeping provisional message");
                    Ok(provisional)
                }
            },
            Ok(AckOutcome::Rejected { reason, code }) => {
                state.chat.reject(&fallback_id);
                Err(SessionError::rejected(reason, code))
            }
            Ok(AckOutcome::Missing) => Ok(provisional),
            Err(error) => {
                state.chat.reject(&fallback_id);
                Err(error.into())
            }
        };
        self.inner.publish(&state);
        result
    }

    /// Toggle the local user's `emoji` reaction on a message. Returns the
    /// authoritative user list.
    pub async fn toggle_reaction(&self, message_id: &str, emoji: &str) -> Result<Vec<String>, SessionError> {
        let request = ReactionToggle {
            document_id: self.inner.document_id.clone(),
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
        };
        let outcome: AckOutcome<ReactionUpdate> =
            self.inner.channel.request(EventName::ChatReaction, &request).await?;

        let mut state = self.inner.state.lock().await;
        let result = match outcome {
            AckOutcome::Confirmed(update) => {
                state.chat.apply_reaction(&update);
                Ok(update.user_ids)
            }
            AckOutcome::Rejected { reason, code } => Err(SessionError::rejected(reason, code)),
            AckOutcome::Missing => Ok(state.chat.reactions().users_for(message_id, emoji)),
        };
        self.inner.publish(&state);
        result
    }

    /// Pull the participant list from the directory.
    pub async fn refresh_participants(&self) {
        self.inner.refresh_participants().await;
    }
}

impl<D: ParticipantDirectory> Drop for CollabSession<D> {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

impl<D: ParticipantDirectory> SessionInner<D> {
    fn publish(&self, state: &SessionState) {
        self.view.send_replace(state.view(&self.document_id));
    }

    async fn run_join(&self, join: JoinDocument) -> Result<(), SessionError> {
        let outcome = match self.channel.request::<_, JoinAck>(EventName::JoinDocument, &join).await {
            Ok(outcome) => outcome,
            Err(error) => AckOutcome::Rejected { reason: error.to_string(), code: None },
        };
        let rejection = match &outcome {
            AckOutcome::Rejected { reason, code } => Some(SessionError::rejected(reason.clone(), code.clone())),
            _ => None,
        };

        let joined = {
            let mut state = self.state.lock().await;
            let joined = match state.membership.on_join_outcome(outcome) {
                Some(ack) => {
                    if let Some(initial) = ack.initial_state {
                        state.delta.reset(initial.content);
                    }
                    if let Some(reactions) = ack.reactions {
                        state.chat.replace_reactions(reactions);
                    }
                    state.participants.ensure(&self.user.id, &self.user.display_name);
                    true
                }
                None => false,
            };
            self.publish(&state);
            joined
        };

        if joined {
            self.refresh_participants().await;
        }
        match rejection {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn refresh_participants(&self) {
        match self.directory.participants(&self.document_id).await {
            Ok(participants) => {
                let mut state = self.state.lock().await;
                state.participants.replace_all(participants);
                self.publish(&state);
            }
            Err(error) => {
                warn!(document_id = %self.document_id, error = %error, "participant refresh failed");
            }
        }
    }

    async fn on_connected(self: &Arc<Self>) {
        let join = {
            let mut state = self.state.lock().await;
            let join = state.membership.on_connect(&self.user);
            self.publish(&state);
            join
        };
        if let Some(join) = join {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(error) = inner.run_join(join).await {
                    debug!(document_id = %inner.document_id, error = %error, "automatic join failed");
                }
            });
        }
    }

    async fn on_disconnected(&self, reason: &str) {
        let mut state = self.state.lock().await;
        state.membership.on_disconnect(reason);
        self.publish(&state);
    }

    async fn on_message(self: &Arc<Self>, event: EventName, payload: Value) {
        match event {
            EventName::Presence => {
                let Some(notice) = parse::<PresenceNotice>(event, payload) else {
                    return;
                };
                let refresh = {
                    let mut state = self.state.lock().await;
                    let refresh = state.membership.on_presence(notice);
                    self.publish(&state);
                    refresh
                };
                if refresh {
                    let inner = Arc::clone(self);
                    tokio::spawn(async move { inner.refresh_participants().await });
                }
            }
            EventName::DocChangeServer => {
                let Some(change) = parse::<DocChange>(event, payload) else {
                    return;
                };
                let mut state = self.state.lock().await;
                if let Some(selection) = state.delta.apply_remote(&change) {
                    state.participants.set_selection(&change.delta.user_id, Some(selection));
                    self.publish(&state);
                }
            }
            EventName::PositionUpdate => {
                let Some(update) = parse::<PositionUpdate>(event, payload) else {
                    return;
                };
                let mut state = self.state.lock().await;
                if state.participants.apply_remote(&update) {
                    self.publish(&state);
                }
            }
            EventName::ChatNewMessage => {
                let Some(incoming) = parse::<ChatBroadcast>(event, payload) else {
                    return;
                };
                if incoming.document_id != self.document_id {
                    return;
                }
                let received = {
                    let mut state = self.state.lock().await;
                    let received = state.chat.upsert_remote(&incoming.message, Utc::now());
                    self.publish(&state);
                    received
                };
                match received {
                    Ok(message) if message.author_id != self.user.id => play_best_effort(self.cue.as_ref()),
                    Ok(_) => {}
                    Err(error) => warn!(document_id = %self.document_id, error = %error, "dropping malformed chat message"),
                }
            }
            EventName::ChatReaction => {
                let Some(update) = parse::<ReactionUpdate>(event, payload) else {
                    return;
                };
                if update.document_id != self.document_id {
                    return;
                }
                let mut state = self.state.lock().await;
                state.chat.apply_reaction(&update);
                self.publish(&state);
            }
            EventName::JoinDocument | EventName::LeaveDocument | EventName::DocChangeClient => {
                debug!(document_id = %self.document_id, event = %event, "ignoring client-only event");
            }
        }
    }
}

fn parse<T: DeserializeOwned>(event: EventName, payload: Value) -> Option<T> {
    match serde_json::from_value(payload) {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            warn!(event = %event, error = %error, "dropping malformed event payload");
            None
        }
    }
}

async fn dispatch<D: ParticipantDirectory>(
    inner: Arc<SessionInner<D>>,
    mut events: broadcast::Receiver<ChannelEvent>,
    already_connected: bool,
) {
    if already_connected {
        inner.on_connected().await;
    }

    loop {
        match events.recv().await {
            Ok(ChannelEvent::Connected) => inner.on_connected().await,
            Ok(ChannelEvent::Disconnected { reason }) => inner.on_disconnected(&reason).await,
            Ok(ChannelEvent::Message { event, payload }) => inner.on_message(event, payload).await,
            Ok(ChannelEvent::Closed) | Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(document_id = %inner.document_id, skipped, "session fell behind channel events");
            }
        }
    }
    debug!(document_id = %inner.document_id, "session dispatcher stopped");
}
