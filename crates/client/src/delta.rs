// Delta synchronization engine.
//
// The local buffer only ever holds server-confirmed text: local edits are
// sent as deltas and the buffer changes when the ack (or a remote
// broadcast) lands. Concurrent edits resolve last-applied-wins.

use coedit_common::protocol::payload::{DocChange, DocChangeAck};
use coedit_common::protocol::ws::AckOutcome;
use coedit_common::types::{Delta, Selection, SelectionDirection};
use tracing::{debug, warn};

/// How one local edit settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The confirmed text replaced the buffer; the caret moved to `selection`.
    Applied { selection: Selection },
    /// The server refused the edit; the buffer keeps its last confirmed text.
    Rejected { reason: String, code: Option<String> },
    /// No ack arrived; the buffer is unchanged.
    Unacknowledged,
}

#[derive(Debug, Clone)]
pub struct DeltaEngine {
    document_id: String,
    user_id: String,
    content: String,
    selection: Selection,
}

impl DeltaEngine {
    pub fn new(document_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            user_id: user_id.into(),
            content: String::new(),
            selection: Selection::default(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    /// Seed the buffer from an authoritative snapshot.
    pub fn reset(&mut self, content: String) {
        self.content = content;
        self.selection = self.selection.clamped(char_len(&self.content));
    }

    /// Record a caret move that did not change the text.
    pub fn set_selection(&mut self, selection: Selection) {
        self.selection = selection.clamped(char_len(&self.content));
    }

    /// Build the outgoing change for a local edit. The buffer is not touched.
    pub fn local_edit(
        &self,
        new_text: &str,
        selection_start: usize,
        selection_end: usize,
        direction: SelectionDirection,
    ) -> DocChange {
        let delta = Delta::from_local_edit(
            self.user_id.clone(),
            self.content.clone(),
            self.selection,
            new_text,
            selection_start,
            selection_end,
            direction,
        );
        DocChange { document_id: self.document_id.clone(), delta }
    }

    /// Settle the ack of a local edit.
    pub fn apply_ack(&mut self, outcome: AckOutcome<DocChangeAck>) -> Settlement {
        match outcome {
            AckOutcome::Confirmed(DocChangeAck { delta }) => {
                let selection = delta.resulting_selection();
                self.content = delta.new_text.text;
                self.selection = selection;
                Settlement::Applied { selection }
            }
            AckOutcome::Rejected { reason, code } => {
                warn!(document_id = %self.document_id, reason = %reason, code = ?code, "edit rejected");
                Settlement::Rejected { reason, code }
            }
            AckOutcome::Missing => {
                debug!(document_id = %self.document_id, "edit was not acknowledged");
                Settlement::Unacknowledged
            }
        }
    }

    /// Apply a broadcast change. Returns the acting user's selection when
    /// the change was applied; changes for other documents are ignored.
    ///
    /// The server never echoes a change to the connection that sent it, so
    /// a change carrying this user's id comes from another of the user's
    /// connections and is applied like any other.
    pub fn apply_remote(&mut self, change: &DocChange) -> Option<Selection> {
        if change.document_id != self.document_id {
            return None;
        }
        self.content.clone_from(&change.delta.new_text.text);
        self.selection = self.selection.clamped(char_len(&self.content));
        Some(change.delta.resulting_selection())
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
