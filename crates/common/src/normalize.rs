// Normalization of loosely-typed inbound records at the trust boundary.
//
// Chat messages arrive from the storage collaborator and from other
// clients with varying field spellings. Everything past this module works
// with strict `ChatMessage` values.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::reactions::ReactionMap;
use crate::types::ChatMessage;

const ID_KEYS: &[&str] = &["id", "_id", "messageId", "message_id"];
const CONTENT_KEYS: &[&str] = &["content", "text", "body", "message"];
const AUTHOR_ID_KEYS: &[&str] = &["authorId", "author_id", "userId", "user_id"];
const AUTHOR_NAME_KEYS: &[&str] = &["authorName", "author_name", "displayName", "display_name"];
const AUTHOR_EMAIL_KEYS: &[&str] = &["authorEmail", "author_email", "email"];
const CREATED_AT_KEYS: &[&str] = &["createdAt", "created_at", "timestamp", "sentAt"];
const NESTED_AUTHOR_KEYS: &[&str] = &["author", "user", "sender"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("chat record is not a JSON object")]
    NotAnObject,
    #[error("chat record has no id")]
    MissingId,
    #[error("chat record has no content")]
    MissingContent,
}

/// Map an inbound chat record to a [`ChatMessage`].
///
/// Missing id or content is rejected. Missing author fields default to empty,
/// a missing or unparseable timestamp defaults to `received_at`, and malformed
/// reactions are dropped.
pub fn normalize_chat_message(
    raw: &Value,
    received_at: DateTime<Utc>,
) -> Result<ChatMessage, NormalizeError> {
    let object = raw.as_object().ok_or(NormalizeError::NotAnObject)?;

    let id = first_scalar(raw, ID_KEYS).ok_or(NormalizeError::MissingId)?;
    let content = first_string(raw, CONTENT_KEYS).ok_or(NormalizeError::MissingContent)?;

    let nested_author = NESTED_AUTHOR_KEYS.iter().find_map(|key| object.get(*key));
    let nested = |keys: &[&str]| nested_author.and_then(|author| first_scalar(author, keys));

    let author_id = first_scalar(raw, AUTHOR_ID_KEYS)
        .or_else(|| nested(&["id", "_id", "userId"]))
        .or_else(|| nested_author.and_then(|author| author.as_str().map(str::to_string)))
        .unwrap_or_default();
    let author_name = first_string(raw, AUTHOR_NAME_KEYS)
        .or_else(|| nested(&["name", "displayName", "display_name", "username"]))
        .unwrap_or_default();
    let author_email = first_string(raw, AUTHOR_EMAIL_KEYS).or_else(|| nested(&["email"]));

    let created_at = CREATED_AT_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(parse_timestamp))
        .unwrap_or(received_at);

    let reactions = object.get("reactions").map(normalize_reactions).unwrap_or_default();

    Ok(ChatMessage { id, content, author_id, author_name, author_email, created_at, reactions })
}

/// Parse a reaction map, keeping only non-empty lists of string-like user ids.
pub fn normalize_reactions(raw: &Value) -> ReactionMap {
    let mut reactions = ReactionMap::new();
    let Some(object) = raw.as_object() else {
        return reactions;
    };

    for (emoji, users) in object {
        let Some(users) = users.as_array() else {
            continue;
        };
        let user_ids: Vec<String> = users.iter().filter_map(scalar_to_string).collect();
        if !user_ids.is_empty() {
            reactions.insert(emoji.clone(), user_ids);
        }
    }

    reactions
}

fn first_string(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| raw.get(*key).and_then(Value::as_str).map(str::to_string))
}

fn first_scalar(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| raw.get(*key).and_then(scalar_to_string))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|parsed| parsed.with_timezone(&Utc))
            .ok()
            .or_else(|| text.parse::<i64>().ok().and_then(from_millis)),
        Value::Number(number) => number.as_i64().and_then(from_millis),
        _ => None,
    }
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
