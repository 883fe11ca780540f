// `coedit watch`: follow a document until interrupted.
//
// Each view update is reduced to the changes since the previous view and
// printed one per line (or one JSON object per line).

use clap::Args;
use coedit_client::SessionView;
use coedit_common::protocol::payload::PresenceNotice;
use coedit_common::reactions::ReactionMap;
use coedit_common::types::{ChatMessage, PresenceKind};
use serde::Serialize;
use tracing::info;

use crate::connect::{self, ConnectionArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Document id.
    pub document: String,

    /// Ring the terminal bell on incoming chat messages.
    #[arg(long)]
    bell: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatchEvent {
    Snapshot { content: String, member_count: usize },
    Content { content: String },
    Chat { message: ChatMessage },
    Reactions { message_id: String, reactions: ReactionMap },
    Presence { notice: PresenceNotice },
    Connection { joined: bool },
}

pub async fn run(args: WatchArgs, connection: &ConnectionArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(connection.json);
    let session = connect::join(connection, &args.document, args.bell).await?;
    let mut view = session.view();
    let mut previous = view.borrow_and_update().clone();

    let initial = WatchEvent::Snapshot {
        content: previous.content.clone(),
        member_count: previous.member_count,
    };
    output::print_output(format, &initial, format_human)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(document_id = %args.document, "interrupted, leaving document");
                break;
            }
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                for event in changes(&previous, &current) {
                    output::print_output(format, &event, format_human)?;
                }
                previous = current;
            }
        }
    }

    connect::finish(session).await
}

/// Events describing how `next` differs from `prev`.
pub fn changes(prev: &SessionView, next: &SessionView) -> Vec<WatchEvent> {
    let mut events = Vec::new();

    if prev.joined != next.joined {
        events.push(WatchEvent::Connection { joined: next.joined });
    }
    if prev.content != next.content {
        events.push(WatchEvent::Content { content: next.content.clone() });
    }
    if prev.last_presence != next.last_presence {
        if let Some(notice) = &next.last_presence {
            events.push(WatchEvent::Presence { notice: notice.clone() });
        }
    }

    for message in &next.messages {
        match prev.messages.iter().find(|seen| seen.id == message.id) {
            None => events.push(WatchEvent::Chat { message: message.clone() }),
            Some(seen) if seen.reactions != message.reactions => events.push(WatchEvent::Reactions {
                message_id: message.id.clone(),
                reactions: message.reactions.clone(),
            }),
            Some(_) => {}
        }
    }

    events
}

fn format_human(event: &WatchEvent) -> String {
    match event {
        WatchEvent::Snapshot { content, member_count } => {
            format!("── {member_count} here ──\n{content}")
        }
        WatchEvent::Content { content } => format!("── content ──\n{content}"),
        WatchEvent::Chat { message } => format!("[{}] {}: {}", message.id, message.author_name, message.content),
        WatchEvent::Reactions { message_id, reactions } => {
            let summary = reactions
                .iter()
                .map(|(emoji, users)| format!("{emoji} {}", users.len()))
                .collect::<Vec<_>>()
                .join("  ");
            format!("[{message_id}] reactions: {summary}")
        }
        WatchEvent::Presence { notice } => {
            let verb = match notice.kind {
                PresenceKind::Joined => "joined",
                PresenceKind::Left => "left",
            };
            let name = if notice.display_name.is_empty() { &notice.user_id } else { &notice.display_name };
            format!("* {name} {verb} ({} here)", notice.member_count)
        }
        WatchEvent::Connection { joined: true } => "* reconnected".to_string(),
        WatchEvent::Connection { joined: false } => "* connection lost, retrying".to_string(),
    }
}
