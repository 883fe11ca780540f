// Participant list with per-user selections.
//
// Local selection changes are applied optimistically and reconciled with
// the server's ack; remote selection broadcasts update the named user.

use coedit_common::protocol::payload::{PositionAck, PositionUpdate};
use coedit_common::protocol::ws::AckOutcome;
use coedit_common::types::{Participant, Selection};
use tracing::debug;

/// Optimistic selection awaiting its ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSelection {
    pub user_id: String,
    pub previous: Option<Selection>,
}

#[derive(Debug, Clone, Default)]
pub struct ParticipantList {
    document_id: String,
    participants: Vec<Participant>,
}

impl ParticipantList {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self { document_id: document_id.into(), participants: Vec::new() }
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn get(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|participant| participant.user_id == user_id)
    }

    /// Replace the list with a directory snapshot. Selections already known
    /// locally survive when the snapshot carries none.
    pub fn replace_all(&mut self, snapshot: Vec<Participant>) {
        let previous = std::mem::take(&mut self.participants);
        self.participants = snapshot
            .into_iter()
            .map(|mut participant| {
                if participant.selection.is_none() {
                    participant.selection = previous
                        .iter()
                        .find(|known| known.user_id == participant.user_id)
                        .and_then(|known| known.selection);
                }
                participant
            })
            .collect();
    }

    /// Make sure `user_id` is listed, filling in the display name if known.
    pub fn ensure(&mut self, user_id: &str, display_name: &str) {
        match self.participants.iter_mut().find(|participant| participant.user_id == user_id) {
            Some(participant) => {
                if participant.display_name.is_empty() {
                    participant.display_name = display_name.to_string();
                }
            }
            None => self.participants.push(Participant::new(user_id, display_name)),
        }
    }

    pub fn remove(&mut self, user_id: &str) {
        self.participants.retain(|participant| participant.user_id != user_id);
    }

    /// Set a user's selection, returning the previous value.
    pub fn set_selection(&mut self, user_id: &str, selection: Option<Selection>) -> Option<Selection> {
        match self.participants.iter_mut().find(|participant| participant.user_id == user_id) {
            Some(participant) => std::mem::replace(&mut participant.selection, selection),
            None => {
                let mut participant = Participant::new(user_id, "");
                participant.selection = selection;
                self.participants.push(participant);
                None
            }
        }
    }

    /// Apply a local selection change ahead of its ack.
    pub fn optimistic(&mut self, update: &PositionUpdate) -> PendingSelection {
        let previous = self.set_selection(&update.user_id, Some(update.selection()));
        PendingSelection { user_id: update.user_id.clone(), previous }
    }

    /// Reconcile an optimistic selection with the ack. A confirmation
    /// replaces it with the server's (possibly clamped) value, a rejection
    /// restores the previous value, a missing ack keeps the optimistic one.
    pub fn settle(&mut self, pending: PendingSelection, outcome: AckOutcome<PositionAck>) -> AckOutcome<Selection> {
        match outcome {
            AckOutcome::Confirmed(PositionAck { position }) => {
                let selection = position.selection();
                self.set_selection(&position.user_id, Some(selection));
                AckOutcome::Confirmed(selection)
            }
            AckOutcome::Rejected { reason, code } => {
                self.set_selection(&pending.user_id, pending.previous);
                AckOutcome::Rejected { reason, code }
            }
            AckOutcome::Missing => {
                debug!(document_id = %self.document_id, user_id = %pending.user_id, "selection ack missing; keeping optimistic value");
                AckOutcome::Missing
            }
        }
    }

    /// Apply a broadcast selection. Returns `false` for other documents.
    pub fn apply_remote(&mut self, update: &PositionUpdate) -> bool {
        if update.document_id != self.document_id {
            return false;
        }
        self.set_selection(&update.user_id, Some(update.selection()));
        true
    }
}
