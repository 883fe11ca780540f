// Core domain types shared by the collaboration client and server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reactions::ReactionMap;

/// Direction of a text selection, as reported by the editor widget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionDirection {
    #[default]
    Forward,
    Backward,
    None,
}

/// A caret or selection range measured in characters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
    #[serde(default)]
    pub direction: SelectionDirection,
}

impl Selection {
    pub fn new(start: usize, end: usize, direction: SelectionDirection) -> Self {
        Self { start, end, direction }
    }

    pub fn caret(offset: usize) -> Self {
        Self { start: offset, end: offset, direction: SelectionDirection::Forward }
    }

    /// Clamp both boundaries to `len` characters.
    pub fn clamped(self, len: usize) -> Self {
        Self { start: self.start.min(len), end: self.end.min(len), direction: self.direction }
    }
}

/// One side of a [`Delta`]: the selection boundaries and the full text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Before/after descriptor for a single edit.
///
/// Deltas ship whole texts rather than character operations; the span
/// boundaries only exist so receivers can reposition carets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub old_text: TextSpan,
    pub new_text: TextSpan,
    pub user_id: String,
}

impl Delta {
    /// Build a delta for a local edit.
    ///
    /// `old_text` carries the previous selection and previous text. `new_text`
    /// carries the new boundaries ordered by `direction` (backward selections
    /// swap start and end) and the new text.
    pub fn from_local_edit(
        user_id: impl Into<String>,
        previous_text: impl Into<String>,
        previous_selection: Selection,
        new_text: impl Into<String>,
        selection_start: usize,
        selection_end: usize,
        direction: SelectionDirection,
    ) -> Self {
        let (start, end) = match direction {
            SelectionDirection::Backward => (selection_end, selection_start),
            SelectionDirection::Forward | SelectionDirection::None => {
                (selection_start, selection_end)
            }
        };

        Self {
            old_text: TextSpan {
                start: previous_selection.start,
                end: previous_selection.end,
                text: previous_text.into(),
            },
            new_text: TextSpan { start, end, text: new_text.into() },
            user_id: user_id.into(),
        }
    }

    /// Selection the acting user ends up with once this delta is applied.
    pub fn resulting_selection(&self) -> Selection {
        let direction = if self.new_text.start > self.new_text.end {
            SelectionDirection::Backward
        } else {
            SelectionDirection::Forward
        };
        Selection { start: self.new_text.start, end: self.new_text.end, direction }
    }
}

/// A user's presence within a document room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
}

impl Participant {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), display_name: display_name.into(), selection: None }
    }
}

/// A chat message in a document's side channel.
///
/// `id` is server-assigned once persisted; before that it is the client's
/// fallback id. `reactions` is only populated on rendered copies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub author_id: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reactions: ReactionMap,
}

/// Presence transitions broadcast to the other members of a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceKind {
    Joined,
    Left,
}

/// Access level returned by the document-storage collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    None,
    Read,
    Write,
    Owner,
}

impl PermissionLevel {
    pub fn can_read(self) -> bool {
        self >= Self::Read
    }

    pub fn can_write(self) -> bool {
        self >= Self::Write
    }
}

/// A stored document as returned by the document-storage collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}
