// Emoji reaction side-store keyed by message id.
//
// Reactions live apart from message objects so a message can be replaced
// or re-sorted without losing reaction state, and a reaction update never
// needs the whole message resent.

use std::collections::{BTreeMap, HashMap};

use crate::types::ChatMessage;

/// Emoji -> reacting user ids.
pub type ReactionMap = BTreeMap<String, Vec<String>>;

/// Reaction state for every message of one document.
///
/// Empty user lists and empty emoji maps are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionStore {
    entries: HashMap<String, ReactionMap>,
}

impl ReactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot, dropping empty entries.
    pub fn from_snapshot(snapshot: HashMap<String, ReactionMap>) -> Self {
        let mut store = Self::new();
        store.replace_all(snapshot);
        store
    }

    /// Replace the whole store with an authoritative snapshot.
    pub fn replace_all(&mut self, snapshot: HashMap<String, ReactionMap>) {
        self.entries.clear();
        for (message_id, reactions) in snapshot {
            for (emoji, user_ids) in reactions {
                self.set(&message_id, &emoji, user_ids);
            }
        }
    }

    /// Set the authoritative user list for one (message, emoji) pair.
    pub fn set(&mut self, message_id: &str, emoji: &str, user_ids: Vec<String>) {
        if user_ids.is_empty() {
            let now_empty = match self.entries.get_mut(message_id) {
                Some(reactions) => {
                    reactions.remove(emoji);
                    reactions.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.entries.remove(message_id);
            }
            return;
        }

        self.entries
            .entry(message_id.to_string())
            .or_default()
            .insert(emoji.to_string(), dedupe(user_ids));
    }

    /// Toggle `user_id` on a (message, emoji) pair and return the resulting list.
    pub fn toggle(&mut self, message_id: &str, emoji: &str, user_id: &str) -> Vec<String> {
        let mut user_ids = self.users_for(message_id, emoji);
        if let Some(position) = user_ids.iter().position(|id| id == user_id) {
            user_ids.remove(position);
        } else {
            user_ids.push(user_id.to_string());
        }
        self.set(message_id, emoji, user_ids.clone());
        user_ids
    }

    /// Seed emoji entries the store does not know yet from a message payload.
    pub fn absorb(&mut self, message_id: &str, reactions: &ReactionMap) {
        for (emoji, user_ids) in reactions {
            let known = self.entries.get(message_id).is_some_and(|map| map.contains_key(emoji));
            if !known {
                self.set(message_id, emoji, user_ids.clone());
            }
        }
    }

    pub fn users_for(&self, message_id: &str, emoji: &str) -> Vec<String> {
        self.entries
            .get(message_id)
            .and_then(|reactions| reactions.get(emoji))
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, message_id: &str) -> Option<&ReactionMap> {
        self.entries.get(message_id)
    }

    pub fn remove_message(&mut self, message_id: &str) {
        self.entries.remove(message_id);
    }

    /// Move reactions recorded under a provisional id to the confirmed id.
    pub fn rekey(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        if let Some(reactions) = self.entries.remove(from) {
            let target = self.entries.entry(to.to_string()).or_default();
            for (emoji, user_ids) in reactions {
                target.entry(emoji).or_insert(user_ids);
            }
        }
    }

    /// Copy of `message` with its reaction map derived from this store.
    pub fn render(&self, message: &ChatMessage) -> ChatMessage {
        let mut rendered = message.clone();
        rendered.reactions = self.get(&message.id).cloned().unwrap_or_default();
        rendered
    }

    pub fn snapshot(&self) -> HashMap<String, ReactionMap> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn dedupe(user_ids: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(user_ids.len());
    for user_id in user_ids {
        if !seen.contains(&user_id) {
            seen.push(user_id);
        }
    }
    seen
}
