// `coedit react`: toggle an emoji reaction on a chat message.

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::connect::{self, ConnectionArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ReactArgs {
    /// Document id.
    pub document: String,

    /// Id of the chat message to react to.
    pub message_id: String,

    /// Emoji to toggle.
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactResult {
    pub message_id: String,
    pub emoji: String,
    pub user_ids: Vec<String>,
}

pub async fn run(args: ReactArgs, connection: &ConnectionArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(connection.json);
    let session = connect::join(connection, &args.document, false).await?;
    let toggled = session.toggle_reaction(&args.message_id, &args.emoji).await;
    connect::finish(session).await?;

    let result = ReactResult { message_id: args.message_id, emoji: args.emoji, user_ids: toggled? };
    output::print_output(format, &result, format_human)?;
    Ok(())
}

fn format_human(result: &ReactResult) -> String {
    if result.user_ids.is_empty() {
        format!("{} on [{}]: nobody", result.emoji, result.message_id)
    } else {
        format!("{} on [{}]: {}", result.emoji, result.message_id, result.user_ids.join(", "))
    }
}
