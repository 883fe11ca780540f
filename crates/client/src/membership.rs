// Session membership state machine.
//
// disconnected -> joining -> joined, back to disconnected on transport loss
// and into joining again on reconnect. Without a document id the machine
// stays disconnected. The machine only decides; the session performs I/O.

use coedit_common::protocol::payload::{JoinAck, JoinDocument, LeaveDocument, PresenceNotice};
use coedit_common::protocol::ws::AckOutcome;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::LocalUser;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MembershipState {
    #[default]
    Disconnected,
    Joining,
    Joined,
}

#[derive(Debug, Clone, Default)]
pub struct Membership {
    document_id: Option<String>,
    state: MembershipState,
    /// Cleared by an explicit leave so a reconnect does not rejoin.
    wants_membership: bool,
    member_count: usize,
    join_error: Option<String>,
    last_presence: Option<PresenceNotice>,
}

impl Membership {
    pub fn new(document_id: Option<String>) -> Self {
        let wants_membership = document_id.is_some();
        Self { document_id, wants_membership, ..Self::default() }
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn state(&self) -> MembershipState {
        self.state
    }

    pub fn is_joined(&self) -> bool {
        self.state == MembershipState::Joined
    }

    pub fn member_count(&self) -> usize {
        self.member_count
    }

    pub fn join_error(&self) -> Option<&str> {
        self.join_error.as_deref()
    }

    pub fn last_presence(&self) -> Option<&PresenceNotice> {
        self.last_presence.as_ref()
    }

    /// Transport came up (initially or after a reconnect). Returns the join
    /// request to send, if this machine has a document to join and is not
    /// already joining or joined on the current link.
    pub fn on_connect(&mut self, user: &LocalUser) -> Option<JoinDocument> {
        if !self.wants_membership || self.state != MembershipState::Disconnected {
            return None;
        }
        self.begin_join(user)
    }

    /// Caller-triggered (re)join, e.g. after a rejected join.
    pub fn request_join(&mut self, user: &LocalUser) -> Option<JoinDocument> {
        self.wants_membership = self.document_id.is_some();
        self.begin_join(user)
    }

    /// Rejoin on the next transport connect without joining now.
    pub fn resume(&mut self) {
        self.wants_membership = self.document_id.is_some();
    }

    fn begin_join(&mut self, user: &LocalUser) -> Option<JoinDocument> {
        let document_id = self.document_id.clone()?;
        self.state = MembershipState::Joining;
        debug!(document_id = %document_id, user_id = %user.id, "joining document");
        Some(JoinDocument {
            document_id,
            user_id: user.id.clone(),
            display_name: user.display_name.clone(),
            email: user.email.clone(),
        })
    }

    /// Settle the outstanding join. Returns the ack on success so the caller
    /// can seed content and reactions from it.
    pub fn on_join_outcome(&mut self, outcome: AckOutcome<JoinAck>) -> Option<JoinAck> {
        if self.state != MembershipState::Joining {
            debug!(state = ?self.state, "ignoring join outcome outside joining state");
            return None;
        }

        match outcome {
            AckOutcome::Confirmed(ack) => {
                self.state = MembershipState::Joined;
                self.join_error = None;
                if let Some(count) = ack.member_count {
                    self.member_count = count;
                }
                info!(document_id = ?self.document_id, members = self.member_count, "joined document");
                Some(ack)
            }
            AckOutcome::Rejected { reason, code } => {
                warn!(document_id = ?self.document_id, reason = %reason, code = ?code, "join rejected");
                self.state = MembershipState::Disconnected;
                self.join_error = Some(reason);
                None
            }
            AckOutcome::Missing => {
                warn!(document_id = ?self.document_id, "join was not acknowledged");
                self.join_error = Some("join not acknowledged".to_string());
                None
            }
        }
    }

    /// Transport dropped. Nothing is sent: the link is already gone and the
    /// server drops a connection's membership when its socket closes.
    pub fn on_disconnect(&mut self, reason: &str) {
        self.state = MembershipState::Disconnected;
        if self.document_id.is_some() && self.wants_membership {
            self.join_error = Some(reason.to_string());
        }
    }

    /// Explicit leave. A later reconnect will not rejoin until
    /// [`Membership::request_join`] is called.
    pub fn leave(&mut self, user: &LocalUser) -> Option<LeaveDocument> {
        let was_member = self.state != MembershipState::Disconnected;
        self.wants_membership = false;
        self.state = MembershipState::Disconnected;
        self.member_count = 0;
        if !was_member {
            return None;
        }
        self.leave_notice(user)
    }

    fn leave_notice(&self, user: &LocalUser) -> Option<LeaveDocument> {
        let document_id = self.document_id.clone()?;
        Some(LeaveDocument { document_id, user_id: user.id.clone() })
    }

    /// Record a presence notice. Returns `true` when the participant list
    /// should be refreshed from the directory.
    pub fn on_presence(&mut self, notice: PresenceNotice) -> bool {
        if self.document_id.as_deref() != Some(notice.document_id.as_str()) {
            return false;
        }
        self.member_count = notice.member_count;
        self.last_presence = Some(notice);
        true
    }
}

#[cfg(test)]
mod tests {
    use coedit_common::protocol::payload::InitialState;
    use coedit_common::types::PresenceKind;

    use super::*;

    fn user() -> LocalUser {
        LocalUser { id: "u1".into(), display_name: "Ada".into(), email: None }
    }

    fn presence(document_id: &str, kind: PresenceKind, count: usize) -> PresenceNotice {
        PresenceNotice {
            document_id: document_id.into(),
            kind,
            user_id: "u2".into(),
            display_name: "Lin".into(),
            member_count: count,
        }
    }

    #[test]
    fn no_document_stays_idle() {
        let mut membership = Membership::new(None);
        assert!(membership.on_connect(&user()).is_none());
        assert_eq!(membership.state(), MembershipState::Disconnected);
    }

    #[test]
    fn connect_then_ack_joins() {
        let mut membership = Membership::new(Some("D1".into()));
        let join = membership.on_connect(&user()).expect("join should be requested");
        assert_eq!(join.document_id, "D1");
        assert_eq!(membership.state(), MembershipState::Joining);

        let ack = JoinAck {
            initial_state: Some(InitialState { content: "hello".into() }),
            reactions: None,
            member_count: Some(3),
        };
        let settled = membership.on_join_outcome(AckOutcome::Confirmed(ack));

        assert!(settled.is_some());
        assert!(membership.is_joined());
        assert_eq!(membership.member_count(), 3);
        assert_eq!(membership.join_error(), None);
    }

    #[test]
    fn repeated_connect_notice_joins_once() {
        let mut membership = Membership::new(Some("D1".into()));
        assert!(membership.on_connect(&user()).is_some());
        assert!(membership.on_connect(&user()).is_none());
        assert_eq!(membership.state(), MembershipState::Joining);

        let ack = JoinAck { initial_state: None, reactions: None, member_count: Some(2) };
        membership.on_join_outcome(AckOutcome::Confirmed(ack));
        assert!(membership.on_connect(&user()).is_none());
        assert!(membership.is_joined());
        assert_eq!(membership.member_count(), 2);
    }

    #[test]
    fn rejected_join_records_reason_without_retry() {
        let mut membership = Membership::new(Some("D1".into()));
        membership.on_connect(&user());
        let settled = membership.on_join_outcome(AckOutcome::Rejected { reason: "forbidden".into(), code: None });

        assert!(settled.is_none());
        assert!(!membership.is_joined());
        assert_eq!(membership.state(), MembershipState::Disconnected);
        assert_eq!(membership.join_error(), Some("forbidden"));
    }

    #[test]
    fn disconnect_records_reason_and_reconnect_rejoins() {
        let mut membership = Membership::new(Some("D1".into()));
        membership.on_connect(&user());
        membership.on_join_outcome(AckOutcome::Confirmed(JoinAck::default()));

        membership.on_disconnect("network lost");
        assert_eq!(membership.state(), MembershipState::Disconnected);
        assert_eq!(membership.join_error(), Some("network lost"));

        assert!(membership.on_connect(&user()).is_some());
        assert_eq!(membership.state(), MembershipState::Joining);
    }

    #[test]
    fn explicit_leave_suppresses_rejoin_until_requested() {
        let mut membership = Membership::new(Some("D1".into()));
        membership.on_connect(&user());
        membership.on_join_outcome(AckOutcome::Confirmed(JoinAck::default()));

        assert!(membership.leave(&user()).is_some());
        assert!(membership.on_connect(&user()).is_none());
        assert!(membership.request_join(&user()).is_some());
    }

    #[test]
    fn presence_for_other_documents_is_ignored() {
        let mut membership = Membership::new(Some("D1".into()));
        assert!(!membership.on_presence(presence("D2", PresenceKind::Joined, 9)));
        assert_eq!(membership.member_count(), 0);

        assert!(membership.on_presence(presence("D1", PresenceKind::Joined, 2)));
        assert_eq!(membership.member_count(), 2);
        assert_eq!(membership.last_presence().map(|notice| notice.kind), Some(PresenceKind::Joined));
    }

    #[test]
    fn late_join_outcome_after_disconnect_is_ignored() {
        let mut membership = Membership::new(Some("D1".into()));
        membership.on_connect(&user());
        membership.on_disconnect("gone");

        assert!(membership.on_join_outcome(AckOutcome::Confirmed(JoinAck::default())).is_none());
        assert!(!membership.is_joined());
    }
}
