// `coedit say`: post a chat message to a document.

use clap::Args;
use coedit_common::types::ChatMessage;

use crate::connect::{self, ConnectionArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct SayArgs {
    /// Document id.
    pub document: String,

    /// Message text.
    pub message: String,
}

pub async fn run(args: SayArgs, connection: &ConnectionArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(connection.json);
    let session = connect::join(connection, &args.document, false).await?;
    let sent = session.send_message(&args.message, None).await;
    connect::finish(session).await?;

    output::print_output(format, &sent?, format_human)?;
    Ok(())
}

fn format_human(message: &ChatMessage) -> String {
    format!("[{}] {}: {}", message.id, message.author_name, message.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn human_format_shows_id_author_and_text() {
        let message = ChatMessage {
            id: "7".into(),
            content: "ship it".into(),
            author_id: "u1".into(),
            author_name: "Ada".into(),
            author_email: None,
            created_at: chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            reactions: Default::default(),
        };
        assert_eq!(format_human(&message), "[7] Ada: ship it");
    }
}
