// Chat message list with optimistic sends and a reaction side-store.
//
// Messages are stored without reactions and kept sorted by creation time.
// Rendering merges the reaction store onto each message, so replacing a
// message never clobbers reaction state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use coedit_common::normalize::{normalize_chat_message, NormalizeError};
use coedit_common::protocol::payload::ReactionUpdate;
use coedit_common::reactions::{ReactionMap, ReactionStore};
use coedit_common::types::ChatMessage;
use serde_json::Value;

use crate::config::LocalUser;

#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    reactions: ReactionStore,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn reactions(&self) -> &ReactionStore {
        &self.reactions
    }

    /// Insert a provisional message under `fallback_id` ahead of the ack.
    pub fn insert_provisional(
        &mut self,
        fallback_id: &str,
        content: &str,
        author: &LocalUser,
        created_at: DateTime<Utc>,
    ) -> ChatMessage {
        let message = ChatMessage {
            id: fallback_id.to_string(),
            content: content.to_string(),
            author_id: author.id.clone(),
            author_name: author.display_name.clone(),
            author_email: author.email.clone(),
            created_at,
            reactions: ReactionMap::new(),
        };
        self.upsert(message.clone());
        message
    }

    /// Replace the provisional entry with the server-confirmed message.
    ///
    /// Reactions recorded under the fallback id move to the real id, and
    /// reactions carried by the payload fill in emoji the store lacks.
    pub fn confirm(&mut self, fallback_id: &str, raw: &Value, received_at: DateTime<Utc>) -> Result<ChatMessage, NormalizeError> {
        let message = normalize_chat_message(raw, received_at)?;
        if message.id != fallback_id {
            self.messages.retain(|existing| existing.id != fallback_id);
        }
        self.reactions.rekey(fallback_id, &message.id);
        self.reactions.absorb(&message.id, &message.reactions);
        self.upsert(message.clone());
        Ok(self.reactions.render(&message))
    }

    /// Drop a rejected provisional message along with its reactions.
    pub fn reject(&mut self, fallback_id: &str) {
        self.messages.retain(|existing| existing.id != fallback_id);
        self.reactions.remove_message(fallback_id);
    }

    /// Normalize and upsert a message received from another participant.
    pub fn upsert_remote(&mut self, raw: &Value, received_at: DateTime<Utc>) -> Result<ChatMessage, NormalizeError> {
        let message = normalize_chat_message(raw, received_at)?;
        self.reactions.absorb(&message.id, &message.reactions);
        self.upsert(message.clone());
        Ok(self.reactions.render(&message))
    }

    /// Install the authoritative user list for one (message, emoji) pair.
    pub fn apply_reaction(&mut self, update: &ReactionUpdate) {
        self.reactions.set(&update.message_id, &update.emoji, update.user_ids.clone());
    }

    /// Replace all reaction state with a join snapshot.
    pub fn replace_reactions(&mut self, snapshot: HashMap<String, ReactionMap>) {
        self.reactions.replace_all(snapshot);
    }

    pub fn get(&self, message_id: &str) -> Option<ChatMessage> {
        self.messages.iter().find(|message| message.id == message_id).map(|message| self.reactions.render(message))
    }

    /// Messages sorted by creation time with reactions merged in.
    pub fn rendered(&self) -> Vec<ChatMessage> {
        self.messages.iter().map(|message| self.reactions.render(message)).collect()
    }

    fn upsert(&mut self, mut message: ChatMessage) {
        message.reactions = ReactionMap::new();
        match self.messages.iter_mut().find(|existing| existing.id == message.id) {
            Some(existing) => *existing = message,
            None => self.messages.push(message),
        }
        self.messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid timestamp") + Duration::seconds(seconds)
    }

    fn ada() -> LocalUser {
        LocalUser { id: "u1".into(), display_name: "Ada".into(), email: Some("ada@example.com".into()) }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn reaction(message_id: &str, emoji: &str, user_ids: &[&str]) -> ReactionUpdate {
        ReactionUpdate {
            document_id: "D1".into(),
            message_id: message_id.into(),
            emoji: emoji.into(),
            user_ids: ids(user_ids),
        }
    }

    #[test]
    fn confirmed_send_replaces_provisional_entry() {
        let mut log = ChatLog::new();
        log.insert_provisional("tmp-1", "hi", &ada(), at(0));
        log.apply_reaction(&reaction("tmp-1", "👍", &["u2"]));

        let raw = json!({ "id": 42, "content": "hi", "authorId": "u1", "createdAt": at(0).to_rfc3339() });
        let confirmed = log.confirm("tmp-1", &raw, at(1)).expect("ack should normalize");

        assert_eq!(confirmed.id, "42");
        assert_eq!(log.len(), 1);
        assert!(log.get("tmp-1").is_none());
        assert_eq!(confirmed.reactions.get("👍"), Some(&ids(&["u2"])));
    }

    #[test]
    fn rejected_send_leaves_no_residue() {
        let mut log = ChatLog::new();
        log.insert_provisional("tmp-1", "spam", &ada(), at(0));
        log.apply_reaction(&reaction("tmp-1", "🎉", &["u1"]));

        log.reject("tmp-1");

        assert!(log.is_empty());
        assert!(log.reactions().get("tmp-1").is_none());
        assert!(log.rendered().is_empty());
    }

    #[test]
    fn remote_messages_sort_by_creation_time_not_id() {
        let mut log = ChatLog::new();
        log.upsert_remote(&json!({ "id": "1", "content": "later", "createdAt": at(10).to_rfc3339() }), at(20))
            .expect("message should normalize");
        log.upsert_remote(&json!({ "id": "9", "content": "earlier", "createdAt": at(5).to_rfc3339() }), at(20))
            .expect("message should normalize");

        let contents: Vec<_> = log.rendered().into_iter().map(|message| message.content).collect();
        assert_eq!(contents, vec!["earlier", "later"]);
    }

    #[test]
    fn duplicate_ids_overwrite_in_place() {
        let mut log = ChatLog::new();
        log.upsert_remote(&json!({ "id": "7", "content": "v1", "createdAt": at(1).to_rfc3339() }), at(2))
            .expect("message should normalize");
        log.upsert_remote(&json!({ "id": "7", "content": "v2", "createdAt": at(1).to_rfc3339() }), at(3))
            .expect("message should normalize");

        assert_eq!(log.len(), 1);
        assert_eq!(log.get("7").map(|message| message.content), Some("v2".to_string()));
    }

    #[test]
    fn later_reaction_ack_wins() {
        let mut log = ChatLog::new();
        log.upsert_remote(&json!({ "id": "42", "content": "ship it" }), at(0)).expect("message should normalize");

        log.apply_reaction(&reaction("42", "👍", &["u1"]));
        log.apply_reaction(&reaction("42", "👍", &["u1", "u2"]));

        let rendered = log.get("42").expect("message should exist");
        let mut expected = ReactionMap::new();
        expected.insert("👍".into(), ids(&["u1", "u2"]));
        assert_eq!(rendered.reactions, expected);
    }

    #[test]
    fn message_payload_does_not_override_store() {
        let mut log = ChatLog::new();
        log.apply_reaction(&reaction("5", "👍", &["u1", "u2"]));
        log.upsert_remote(
            &json!({ "id": "5", "content": "x", "reactions": { "👍": ["u1"], "❤️": ["u3"] } }),
            at(0),
        )
        .expect("message should normalize");

        let rendered = log.get("5").expect("message should exist");
        assert_eq!(rendered.reactions.get("👍"), Some(&ids(&["u1", "u2"])));
        assert_eq!(rendered.reactions.get("❤️"), Some(&ids(&["u3"])));
    }

    #[test]
    fn malformed_remote_message_is_rejected() {
        let mut log = ChatLog::new();
        assert!(log.upsert_remote(&json!({ "content": "no id" }), at(0)).is_err());
        assert!(log.is_empty());
    }

    proptest! {
        #[test]
        fn rendered_reactions_match_latest_ack(
            acks in proptest::collection::vec(
                (prop_oneof![Just("👍"), Just("🎉")], proptest::collection::vec(prop_oneof![Just("u1"), Just("u2"), Just("u3")], 0..3)),
                1..16,
            )
        ) {
            let mut log = ChatLog::new();
            log.upsert_remote(&json!({ "id": "42", "content": "hi" }), at(0)).expect("message should normalize");
            let mut latest: HashMap<&str, Vec<String>> = HashMap::new();

            for (emoji, users) in &acks {
                log.apply_reaction(&reaction("42", emoji, users));
                latest.insert(*emoji, ids(users));
            }

            let rendered = log.get("42").expect("message should exist");
            for (emoji, users) in latest {
                let mut deduped: Vec<String> = Vec::new();
                for user in users {
                    if !deduped.contains(&user) {
                        deduped.push(user);
                    }
                }
                if deduped.is_empty() {
                    prop_assert!(!rendered.reactions.contains_key(emoji));
                } else {
                    prop_assert_eq!(rendered.reactions.get(emoji), Some(&deduped));
                }
            }
        }
    }
}
