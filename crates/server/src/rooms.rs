// Live collaboration rooms, one per document with at least one member.
//
// A room is created on the first join from the stored (or still pending)
// content and destroyed when its last member leaves or disconnects.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use coedit_common::protocol::ws::Frame;
use coedit_common::reactions::{ReactionMap, ReactionStore};
use coedit_common::types::{ChatMessage, Participant, PermissionLevel, Selection};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("connection has not joined the document")]
    NotJoined,
    #[error("connection has read-only access")]
    ReadOnly,
}

/// One connection's membership in a room.
#[derive(Debug, Clone)]
pub struct Member {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub permission: PermissionLevel,
    pub selection: Option<Selection>,
    pub outbound: mpsc::UnboundedSender<Frame>,
}

/// Outbound queues of the other members of a room.
#[derive(Debug, Default)]
pub struct Peers(Vec<mpsc::UnboundedSender<Frame>>);

impl Peers {
    /// Queue `frame` for every peer. Returns how many accepted it.
    pub fn send(&self, frame: &Frame) -> usize {
        self.0.iter().filter(|peer| peer.send(frame.clone()).is_ok()).count()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug)]
pub struct Joined {
    pub content: String,
    pub reactions: HashMap<String, ReactionMap>,
    pub member_count: usize,
    pub peers: Peers,
}

#[derive(Debug)]
pub struct Left {
    pub member: Member,
    pub member_count: usize,
    pub peers: Peers,
    pub room_closed: bool,
}

#[derive(Debug)]
struct Room {
    content: String,
    members: HashMap<ConnectionId, Member>,
    reactions: ReactionStore,
}

impl Room {
    fn new(content: String) -> Self {
        Self { content, members: HashMap::new(), reactions: ReactionStore::new() }
    }

    /// Distinct users; one user may hold several connections.
    fn member_count(&self) -> usize {
        let mut users: Vec<&str> = self.members.values().map(|m| m.user_id.as_str()).collect();
        users.sort_unstable();
        users.dedup();
        users.len()
    }

    fn peers_of(&self, connection_id: ConnectionId) -> Peers {
        Peers(
            self.members
                .values()
                .filter(|member| member.connection_id != connection_id)
                .map(|member| member.outbound.clone())
                .collect(),
        )
    }

    fn admit(&mut self, member: Member) -> Joined {
        let connection_id = member.connection_id;
        self.members.insert(connection_id, member);
        Joined {
            content: self.content.clone(),
            reactions: self.reactions.snapshot(),
            member_count: self.member_count(),
            peers: self.peers_of(connection_id),
        }
    }

    fn member(&self, connection_id: ConnectionId) -> Result<&Member, RoomError> {
        self.members.get(&connection_id).ok_or(RoomError::NotJoined)
    }

    fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `member` to the room for `document_id`, creating the room from
    /// `load` when it does not exist yet.
    pub async fn join<F, Fut, E>(&self, document_id: &str, member: Member, load: F) -> Result<Joined, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        {
            let mut rooms = self.rooms.write().await;
            if let Some(room) = rooms.get_mut(document_id) {
                return Ok(room.admit(member));
            }
        }

        let content = load().await?;
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(document_id.to_string()).or_insert_with(|| {
            info!(document_id = %document_id, "room created");
            Room::new(content)
        });
        Ok(room.admit(member))
    }

    /// Remove a connection from a room. The room is destroyed once empty.
    pub async fn leave(&self, document_id: &str, connection_id: ConnectionId) -> Option<Left> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(document_id)?;
        let member = room.members.remove(&connection_id)?;
        let member_count = room.member_count();
        let peers = room.peers_of(connection_id);
        let room_closed = room.members.is_empty();
        if room_closed {
            rooms.remove(document_id);
            info!(document_id = %document_id, "room closed");
        }
        Some(Left { member, member_count, peers, room_closed })
    }

    pub async fn member(&self, document_id: &str, connection_id: ConnectionId) -> Result<Member, RoomError> {
        let rooms = self.rooms.read().await;
        let room = rooms.get(document_id).ok_or(RoomError::NotJoined)?;
        room.member(connection_id).cloned()
    }

    /// Replace the room content with an edit from a writing member and move
    /// that member's selection to where the edit left it. Other members keep
    /// the selections they last reported.
    pub async fn apply_content(
        &self,
        document_id: &str,
        connection_id: ConnectionId,
        content: &str,
        selection: Selection,
    ) -> Result<Peers, RoomError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(document_id).ok_or(RoomError::NotJoined)?;
        if !room.member(connection_id)?.permission.can_write() {
            return Err(RoomError::ReadOnly);
        }
        room.content = content.to_string();
        let len = room.char_len();
        if let Some(member) = room.members.get_mut(&connection_id) {
            member.selection = Some(selection.clamped(len));
        }
        debug!(document_id = %document_id, chars = len, "room content replaced");
        Ok(room.peers_of(connection_id))
    }

    /// Store a member's selection clamped to the room content.
    pub async fn update_selection(
        &self,
        document_id: &str,
        connection_id: ConnectionId,
        selection: Selection,
    ) -> Result<(Selection, Peers), RoomError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(document_id).ok_or(RoomError::NotJoined)?;
        let clamped = selection.clamped(room.char_len());
        let member = room.members.get_mut(&connection_id).ok_or(RoomError::NotJoined)?;
        member.selection = Some(clamped);
        Ok((clamped, room.peers_of(connection_id)))
    }

    /// Toggle the member's user on a (message, emoji) pair.
    pub async fn toggle_reaction(
        &self,
        document_id: &str,
        connection_id: ConnectionId,
        message_id: &str,
        emoji: &str,
    ) -> Result<(Vec<String>, Peers), RoomError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(document_id).ok_or(RoomError::NotJoined)?;
        let user_id = room.member(connection_id)?.user_id.clone();
        let user_ids = room.reactions.toggle(message_id, emoji, &user_id);
        Ok((user_ids, room.peers_of(connection_id)))
    }

    /// `message` with the room's reactions merged on, plus the peers to
    /// broadcast it to.
    pub async fn render_message(
        &self,
        document_id: &str,
        connection_id: ConnectionId,
        message: &ChatMessage,
    ) -> Result<(ChatMessage, Peers), RoomError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(document_id).ok_or(RoomError::NotJoined)?;
        room.member(connection_id)?;
        room.reactions.absorb(&message.id, &message.reactions);
        Ok((room.reactions.render(message), room.peers_of(connection_id)))
    }

    /// One entry per user, carrying that user's latest known selection.
    pub async fn participants(&self, document_id: &str) -> Vec<Participant> {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(document_id) else {
            return Vec::new();
        };

        let mut by_user: HashMap<&str, Participant> = HashMap::new();
        for member in room.members.values() {
            let entry = by_user
                .entry(member.user_id.as_str())
                .or_insert_with(|| Participant::new(member.user_id.clone(), member.display_name.clone()));
            if member.selection.is_some() {
                entry.selection = member.selection;
            }
        }

        let mut participants: Vec<Participant> = by_user.into_values().collect();
        participants.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        participants
    }

    pub async fn content(&self, document_id: &str) -> Option<String> {
        self.rooms.read().await.get(document_id).map(|room| room.content.clone())
    }

    pub async fn contains(&self, document_id: &str) -> bool {
        self.rooms.read().await.contains_key(document_id)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
