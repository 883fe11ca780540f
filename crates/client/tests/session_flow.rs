use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coedit_client::cue::{SilentCue, SoundCue};
use coedit_client::delta::Settlement;
use coedit_client::directory::StaticDirectory;
use coedit_client::transport::{LoopbackConnector, ServerEnd};
use coedit_client::{Channel, CollabSession, LocalUser, ReconnectPolicy, SessionError, SessionView};
use coedit_common::protocol::payload::{
    DocChange, DocChangeAck, InitialState, JoinAck, PositionAck, PositionUpdate, ReactionUpdate,
};
use coedit_common::protocol::ws::{AckBody, EventName, Frame};
use coedit_common::types::{Participant, Selection, SelectionDirection};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct CountingCue(Arc<AtomicUsize>);

impl SoundCue for CountingCue {
    fn play(&self) -> std::io::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn ada() -> LocalUser {
    LocalUser { id: "u1".into(), display_name: "Ada".into(), email: None }
}

struct Harness {
    session: CollabSession<StaticDirectory>,
    server: ServerEnd,
    accepted: mpsc::UnboundedReceiver<ServerEnd>,
}

async fn expect_request(server: &mut ServerEnd, expected: EventName) -> (u64, Value) {
    match timeout(WAIT, server.next_frame()).await.expect("frame should arrive in time") {
        Some(Frame::Request { id, event, payload }) => {
            assert_eq!(event, expected);
            (id, payload)
        }
        other => panic!("expected {expected} request, got {other:?}"),
    }
}

async fn wait_view<F>(session: &CollabSession<StaticDirectory>, mut predicate: F) -> SessionView
where
    F: FnMut(&SessionView) -> bool,
{
    let mut view = session.view();
    let matched = timeout(WAIT, view.wait_for(|current| predicate(current)))
        .await
        .expect("view should update in time")
        .expect("session should be alive");
    matched.clone()
}

async fn joined(content: &str, directory: StaticDirectory, cue: Box<dyn SoundCue>) -> Harness {
    let (connector, mut accepted) = LoopbackConnector::new();
    let channel = Channel::open(Arc::new(connector), "D1", ReconnectPolicy::default(), WAIT);
    let session = CollabSession::start(channel, ada(), directory, cue);

    let mut server = accepted.recv().await.expect("session should connect");
    let (id, payload) = expect_request(&mut server, EventName::JoinDocument).await;
    assert_eq!(payload["documentId"], "D1");
    assert_eq!(payload["userId"], "u1");

    let ack = JoinAck {
        initial_state: Some(InitialState { content: content.to_string() }),
        reactions: None,
        member_count: Some(1),
    };
    server.ack(id, AckBody::success(&ack).expect("ack should build"));
    wait_view(&session, |view| view.joined).await;

    Harness { session, server, accepted }
}

#[tokio::test]
async fn join_and_edit_settle_to_confirmed_text() {
    let Harness { session, mut server, .. } = joined("hello", StaticDirectory::default(), Box::new(SilentCue)).await;
    assert_eq!(session.snapshot().content, "hello");

    let edit = session.update_content("hello world", 11, 11, SelectionDirection::Forward);
    let serve = async {
        let (id, payload) = expect_request(&mut server, EventName::DocChangeClient).await;
        let change: DocChange = serde_json::from_value(payload).expect("change should parse");
        assert_eq!(change.delta.old_text.text, "hello");
        assert_eq!(change.delta.new_text.text, "hello world");
        assert_eq!((change.delta.new_text.start, change.delta.new_text.end), (11, 11));
        assert_eq!(session.snapshot().content, "hello", "edit must not apply before the ack");

        server.ack(id, AckBody::success(&DocChangeAck { delta: change.delta }).expect("ack should build"));
    };
    let (settlement, ()) = tokio::join!(edit, serve);

    assert_eq!(settlement.expect("edit should settle"), Settlement::Applied { selection: Selection::caret(11) });
    let view = session.snapshot();
    assert_eq!(view.content, "hello world");
    assert_eq!(view.selection, Selection::caret(11));
}

#[tokio::test]
async fn rejected_edit_keeps_confirmed_text() {
    let Harness { session, mut server, .. } = joined("base", StaticDirectory::default(), Box::new(SilentCue)).await;

    let edit = session.update_content("base!", 5, 5, SelectionDirection::Forward);
    let serve = async {
        let (id, _) = expect_request(&mut server, EventName::DocChangeClient).await;
        server.ack(id, AckBody::rejected("READ_ONLY", "document is read-only"));
    };
    let (result, ()) = tokio::join!(edit, serve);

    let error = result.expect_err("edit should be rejected");
    assert_eq!(error.code(), Some("READ_ONLY"));
    assert_eq!(session.snapshot().content, "base");
}

#[tokio::test]
async fn rejected_chat_message_is_rolled_back() {
    let Harness { session, mut server, .. } = joined("", StaticDirectory::default(), Box::new(SilentCue)).await;

    let send = session.send_message("spam", Some("tmp-1".into()));
    let serve = async {
        let (id, payload) = expect_request(&mut server, EventName::ChatNewMessage).await;
        assert_eq!(payload["fallbackId"], "tmp-1");
        assert_eq!(session.snapshot().messages.len(), 1, "message should be inserted optimistically");
        server.ack(id, AckBody::rejected("VALIDATION_FAILED", "message rejected"));
    };
    let (result, ()) = tokio::join!(send, serve);

    assert!(matches!(result, Err(SessionError::Rejected { .. })));
    assert!(session.snapshot().messages.is_empty());
}

#[tokio::test]
async fn confirmed_chat_message_takes_server_id() {
    let Harness { session, mut server, .. } = joined("", StaticDirectory::default(), Box::new(SilentCue)).await;

    let send = session.send_message("hi all", Some("tmp-2".into()));
    let serve = async {
        let (id, _) = expect_request(&mut server, EventName::ChatNewMessage).await;
        let stored = json!({ "message": { "id": 42, "content": "hi all", "authorId": "u1", "authorName": "Ada" } });
        server.ack(id, AckBody::success(&stored).expect("ack should build"));
    };
    let (result, ()) = tokio::join!(send, serve);

    let message = result.expect("send should succeed");
    assert_eq!(message.id, "42");
    let messages = session.snapshot().messages;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "42");
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_chat_message_is_kept() {
    let Harness { session, mut server, .. } = joined("", StaticDirectory::default(), Box::new(SilentCue)).await;

    let send = session.send_message("anyone?", Some("tmp-3".into()));
    let serve = async {
        expect_request(&mut server, EventName::ChatNewMessage).await;
    };
    let (result, ()) = tokio::join!(send, serve);

    assert_eq!(result.expect("missing ack is a soft success").id, "tmp-3");
    assert_eq!(session.snapshot().messages.len(), 1);
}

#[tokio::test]
async fn reactions_follow_latest_authoritative_list() {
    let cue = CountingCue::default();
    let Harness { session, mut server, .. } = joined("", StaticDirectory::default(), Box::new(cue.clone())).await;

    server.send(Frame::Event {
        event: EventName::ChatNewMessage,
        payload: json!({ "documentId": "D1", "message": { "id": "42", "content": "ship it", "authorId": "u2" } }),
    });
    wait_view(&session, |view| view.messages.len() == 1).await;
    assert_eq!(cue.0.load(Ordering::SeqCst), 1);

    let toggle = session.toggle_reaction("42", "👍");
    let serve = async {
        let (id, payload) = expect_request(&mut server, EventName::ChatReaction).await;
        assert_eq!(payload["messageId"], "42");
        let update = ReactionUpdate {
            document_id: "D1".into(),
            message_id: "42".into(),
            emoji: "👍".into(),
            user_ids: vec!["u1".into()],
        };
        server.ack(id, AckBody::success(&update).expect("ack should build"));
    };
    let (users, ()) = tokio::join!(toggle, serve);
    assert_eq!(users.expect("toggle should succeed"), vec!["u1".to_string()]);

    let update = ReactionUpdate {
        document_id: "D1".into(),
        message_id: "42".into(),
        emoji: "👍".into(),
        user_ids: vec!["u1".into(), "u2".into()],
    };
    server.send(Frame::event(EventName::ChatReaction, &update).expect("event should build"));

    let view = wait_view(&session, |view| {
        view.messages.first().and_then(|message| message.reactions.get("👍")).is_some_and(|users| users.len() == 2)
    })
    .await;
    let reactions = &view.messages[0].reactions;
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions["👍"], vec!["u1".to_string(), "u2".to_string()]);
}

#[tokio::test]
async fn remote_activity_updates_the_view() {
    let directory = StaticDirectory::new(vec![Participant::new("u1", "Ada"), Participant::new("u2", "Lin")]);
    let Harness { session, server, .. } = joined("abc", directory, Box::new(SilentCue)).await;

    server.send(Frame::Event {
        event: EventName::Presence,
        payload: json!({ "documentId": "D1", "kind": "joined", "userId": "u2", "displayName": "Lin", "memberCount": 2 }),
    });
    let view = wait_view(&session, |view| view.member_count == 2 && view.participants.len() == 2).await;
    assert_eq!(view.last_presence.map(|notice| notice.user_id), Some("u2".to_string()));

    let change = DocChange {
        document_id: "D1".into(),
        delta: coedit_common::types::Delta::from_local_edit(
            "u2",
            "abc",
            Selection::caret(3),
            "abcd",
            4,
            4,
            SelectionDirection::Forward,
        ),
    };
    server.send(Frame::event(EventName::DocChangeServer, &change).expect("event should build"));
    wait_view(&session, |view| view.content == "abcd").await;

    let position = PositionUpdate {
        document_id: "D1".into(),
        user_id: "u2".into(),
        start: 1,
        end: 2,
        direction: SelectionDirection::Forward,
    };
    server.send(Frame::event(EventName::PositionUpdate, &position).expect("event should build"));
    let view = wait_view(&session, |view| {
        view.participants.iter().any(|p| p.user_id == "u2" && p.selection == Some(position.selection()))
    })
    .await;
    assert_eq!(view.selection, Selection::caret(0), "remote activity must not move the local caret");
}

#[tokio::test]
async fn selection_ack_replaces_optimistic_value() {
    let Harness { session, mut server, .. } = joined("short", StaticDirectory::default(), Box::new(SilentCue)).await;

    let update = session.update_selection(2, 40, SelectionDirection::Forward);
    let serve = async {
        let (id, payload) = expect_request(&mut server, EventName::PositionUpdate).await;
        let mut position: PositionUpdate = serde_json::from_value(payload).expect("position should parse");
        position.end = 5;
        server.ack(id, AckBody::success(&PositionAck { position }).expect("ack should build"));
    };
    let (selection, ()) = tokio::join!(update, serve);

    let expected = Selection::new(2, 5, SelectionDirection::Forward);
    assert_eq!(selection.expect("selection should settle"), expected);
    let view = session.snapshot();
    assert_eq!(view.selection, expected);
    assert_eq!(view.participants.iter().find(|p| p.user_id == "u1").and_then(|p| p.selection), Some(expected));
}

#[tokio::test]
async fn transport_loss_records_reason_and_rejoins() {
    let Harness { session, server, mut accepted } = joined("v1", StaticDirectory::default(), Box::new(SilentCue)).await;

    server.close("network lost");
    let view = wait_view(&session, |view| !view.joined).await;
    assert_eq!(view.join_error.as_deref(), Some("network lost"));

    let mut server = timeout(WAIT, accepted.recv()).await.expect("reconnect in time").expect("server end");
    let (id, _) = expect_request(&mut server, EventName::JoinDocument).await;
    let ack = JoinAck { initial_state: Some(InitialState { content: "v2".into() }), ..JoinAck::default() };
    server.ack(id, AckBody::success(&ack).expect("ack should build"));

    let view = wait_view(&session, |view| view.joined).await;
    assert_eq!(view.content, "v2");
    assert_eq!(view.join_error, None);
}

#[tokio::test]
async fn chat_while_disconnected_fails_fast_and_rolls_back() {
    let (connector, _accepted) = LoopbackConnector::new();
    connector.refuse_next(100);
    let channel = Channel::open(Arc::new(connector), "D1", ReconnectPolicy::default(), WAIT);
    let session = CollabSession::start(channel, ada(), StaticDirectory::default(), Box::new(SilentCue));

    let result = session.send_message("hello?", None).await;

    assert!(matches!(result, Err(SessionError::NotConnected)));
    assert!(session.snapshot().messages.is_empty());
}

#[tokio::test]
async fn explicit_leave_reaches_the_server_and_suppresses_rejoin() {
    let Harness { session, mut server, mut accepted } =
        joined("v1", StaticDirectory::default(), Box::new(SilentCue)).await;

    session.leave().await.expect("leave should be queued");
    match timeout(WAIT, server.next_frame()).await.expect("frame should arrive in time") {
        Some(Frame::Notify { event, payload }) => {
            assert_eq!(event, EventName::LeaveDocument);
            assert_eq!(payload["documentId"], "D1");
            assert_eq!(payload["userId"], "u1");
        }
        other => panic!("expected leave notice, got {other:?}"),
    }
    assert!(!session.snapshot().joined);

    session.channel().reconnect();
    let mut server = timeout(WAIT, accepted.recv()).await.expect("reconnect in time").expect("server end");
    assert!(timeout(Duration::from_millis(200), server.next_frame()).await.is_err(), "no rejoin after leave");

    session.channel().close();
    assert!(timeout(WAIT, server.next_frame()).await.expect("link should drop in time").is_none());
}
