use std::sync::Arc;
use std::time::Duration;

use coedit_client::cue::SilentCue;
use coedit_client::delta::Settlement;
use coedit_client::directory::HttpParticipantDirectory;
use coedit_client::transport::WsConnector;
use coedit_client::{Channel, ClientConfig, CollabSession, LocalUser, SessionView};
use coedit_common::types::{PermissionLevel, SelectionDirection};
use coedit_server::events::DocEvent;
use coedit_server::{build_router, AppState, MemoryDocumentStore};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

type Session = CollabSession<HttpParticipantDirectory>;

struct TestServer {
    base_url: String,
    store: MemoryDocumentStore,
    state: AppState<MemoryDocumentStore>,
}

async fn spawn_server(autosave_quiet: Duration) -> TestServer {
    let store = MemoryDocumentStore::new();
    let state = AppState::new(Arc::new(store.clone()), autosave_quiet);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have an address");
    let app = build_router(state.clone(), None);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server should run");
    });

    TestServer { base_url: format!("http://{addr}"), store, state }
}

fn user(id: &str, name: &str) -> LocalUser {
    LocalUser { id: id.into(), display_name: name.into(), email: None }
}

fn open_session(server: &TestServer, user: LocalUser) -> Session {
    let config = Arc::new(ClientConfig {
        server_url: server.base_url.clone(),
        user,
        ack_timeout_ms: 2_000,
        ..ClientConfig::default()
    });
    let connector = Arc::new(WsConnector::new(Arc::clone(&config)));
    let channel = Channel::open(connector, "D1", config.reconnect, config.ack_timeout());
    let directory =
        HttpParticipantDirectory::new(Arc::clone(&config)).expect("directory client should build");
    CollabSession::start(channel, config.user.clone(), directory, Box::new(SilentCue))
}

async fn wait_view<F>(session: &Session, mut predicate: F) -> SessionView
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

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    timeout(WAIT, async {
        while !check().await {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition should hold in time");
}

#[tokio::test]
async fn edits_reach_the_other_participant() {
    let server = spawn_server(Duration::from_secs(60)).await;
    server.store.insert_document("D1", "hello").await;

    let ada = open_session(&server, user("u1", "Ada"));
    let view = wait_view(&ada, |view| view.joined).await;
    assert_eq!(view.content, "hello");

    let lin = open_session(&server, user("u2", "Lin"));
    wait_view(&lin, |view| view.joined && view.content == "hello").await;
    wait_view(&lin, |view| view.participants.iter().any(|p| p.user_id == "u1")).await;
    wait_view(&ada, |view| view.member_count == 2).await;

    let settlement = ada
        .update_content("hello world", 11, 11, SelectionDirection::Forward)
        .await
        .expect("edit should be acknowledged");
    assert!(matches!(settlement, Settlement::Applied { .. }));
    assert_eq!(ada.snapshot().content, "hello world");
    assert_eq!((ada.snapshot().selection.start, ada.snapshot().selection.end), (11, 11));

    let view = wait_view(&lin, |view| view.content == "hello world").await;
    let ada_seen_by_lin = view.participants.iter().find(|participant| participant.user_id == "u1");
    assert_eq!(ada_seen_by_lin.and_then(|p| p.selection).map(|s| (s.start, s.end)), Some((11, 11)));
}

#[tokio::test]
async fn two_connections_of_one_user_converge() {
    let server = spawn_server(Duration::from_secs(60)).await;
    server.store.insert_document("D1", "hello").await;

    let laptop = open_session(&server, user("u1", "Ada"));
    let phone = open_session(&server, user("u1", "Ada"));
    wait_view(&laptop, |view| view.joined).await;
    wait_view(&phone, |view| view.joined && view.content == "hello").await;

    laptop
        .update_content("hello world", 11, 11, SelectionDirection::Forward)
        .await
        .expect("edit should be acknowledged");

    let view = wait_view(&phone, |view| view.content == "hello world").await;
    assert_eq!(view.content, laptop.snapshot().content);
    assert_eq!(server.state.rooms.content("D1").await.as_deref(), Some("hello world"));
}

#[tokio::test]
async fn caret_from_an_edit_survives_a_participant_refresh() {
    let server = spawn_server(Duration::from_secs(60)).await;
    server.store.insert_document("D1", "hello").await;

    let ada = open_session(&server, user("u1", "Ada"));
    let lin = open_session(&server, user("u2", "Lin"));
    wait_view(&ada, |view| view.joined).await;
    wait_view(&lin, |view| view.joined).await;
    wait_view(&ada, |view| view.member_count == 2).await;

    ada.update_selection(1, 1, SelectionDirection::Forward).await.expect("selection should be acknowledged");
    ada.update_content("hello world", 11, 11, SelectionDirection::Forward)
        .await
        .expect("edit should be acknowledged");
    wait_view(&lin, |view| view.content == "hello world").await;

    let kim = open_session(&server, user("u3", "Kim"));
    wait_view(&kim, |view| view.joined).await;

    let view = wait_view(&lin, |view| view.participants.iter().any(|p| p.user_id == "u3")).await;
    let ada_seen_by_lin = view.participants.iter().find(|participant| participant.user_id == "u1");
    assert_eq!(ada_seen_by_lin.and_then(|p| p.selection).map(|s| (s.start, s.end)), Some((11, 11)));
}

#[tokio::test]
async fn chat_and_reactions_round_trip() {
    let server = spawn_server(Duration::from_secs(60)).await;
    let ada = open_session(&server, user("u1", "Ada"));
    let lin = open_session(&server, user("u2", "Lin"));
    wait_view(&ada, |view| view.joined).await;
    wait_view(&lin, |view| view.joined).await;

    let message = ada.send_message("hi there", None).await.expect("message should be stored");
    assert_eq!(message.id, "1");
    assert_eq!(message.author_name, "Ada");
    wait_view(&lin, |view| view.messages.iter().any(|m| m.id == "1" && m.content == "hi there")).await;

    let users = lin.toggle_reaction("1", "👍").await.expect("reaction should be acknowledged");
    assert_eq!(users, vec!["u2".to_string()]);
    let users = ada.toggle_reaction("1", "👍").await.expect("reaction should be acknowledged");
    assert_eq!(users, vec!["u2".to_string(), "u1".to_string()]);

    let view = wait_view(&lin, |view| {
        view.messages.iter().any(|m| m.id == "1" && m.reactions.get("👍").is_some_and(|u| u.len() == 2))
    })
    .await;
    let reacted = view.messages.iter().find(|m| m.id == "1").expect("message should be listed");
    assert_eq!(reacted.reactions["👍"], vec!["u2".to_string(), "u1".to_string()]);
    assert_eq!(server.store.messages("D1").await.len(), 1);
}

#[tokio::test]
async fn read_only_members_cannot_edit() {
    let server = spawn_server(Duration::from_secs(60)).await;
    server.store.insert_document("D1", "locked").await;
    server.store.grant("D1", "u2", PermissionLevel::Read).await;

    let lin = open_session(&server, user("u2", "Lin"));
    wait_view(&lin, |view| view.joined).await;

    let error = lin
        .update_content("changed", 7, 7, SelectionDirection::Forward)
        .await
        .expect_err("read-only edit should be rejected");
    assert_eq!(error.code(), Some("READ_ONLY"));
    assert_eq!(lin.snapshot().content, "locked");
    assert_eq!(server.state.rooms.content("D1").await.as_deref(), Some("locked"));
}

#[tokio::test]
async fn join_without_access_reports_the_reason() {
    let server = spawn_server(Duration::from_secs(60)).await;
    server.store.set_default_permission(PermissionLevel::None).await;

    let ada = open_session(&server, user("u1", "Ada"));
    let view = wait_view(&ada, |view| view.join_error.is_some()).await;

    assert!(!view.joined);
    assert_eq!(view.join_error.as_deref(), Some("caller lacks access to the document"));
    assert!(!server.state.rooms.contains("D1").await);
}

#[tokio::test]
async fn edits_are_autosaved_after_the_quiet_period() {
    let server = spawn_server(Duration::from_millis(200)).await;
    let mut events = server.state.events.subscribe();

    let ada = open_session(&server, user("u1", "Ada"));
    wait_view(&ada, |view| view.joined).await;
    ada.update_content("draft v1", 8, 8, SelectionDirection::Forward).await.expect("first edit");
    ada.update_content("draft v2", 8, 8, SelectionDirection::Forward).await.expect("second edit");

    let event = timeout(WAIT, events.recv()).await.expect("save should happen").expect("bus open");
    assert!(matches!(&event, DocEvent::Saved { user_id, .. } if user_id == "u1"));

    let writes = server.store.content_writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].content, "draft v2");
    assert_eq!(server.store.document("D1").await.map(|d| d.content).as_deref(), Some("draft v2"));
}

#[tokio::test]
async fn rejoining_an_emptied_room_sees_unsaved_content() {
    let server = spawn_server(Duration::from_secs(60)).await;
    let ada = open_session(&server, user("u1", "Ada"));
    wait_view(&ada, |view| view.joined).await;
    ada.update_content("not yet saved", 0, 0, SelectionDirection::Forward).await.expect("edit");

    ada.leave().await.expect("leave should be sent");
    let rooms = server.state.rooms.clone();
    eventually(|| {
        let rooms = rooms.clone();
        async move { !rooms.contains("D1").await }
    })
    .await;

    let lin = open_session(&server, user("u2", "Lin"));
    let view = wait_view(&lin, |view| view.joined).await;
    assert_eq!(view.content, "not yet saved");
    assert!(server.state.autosave.has_pending("D1").await);
}
