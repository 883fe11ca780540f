// `coedit who`: list participants without joining.

use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use coedit_client::directory::{HttpParticipantDirectory, ParticipantDirectory};
use coedit_common::types::Participant;
use serde::Serialize;

use crate::connect::ConnectionArgs;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct WhoArgs {
    /// Document id.
    pub document: String,
}

#[derive(Debug, Serialize)]
struct WhoResult {
    document_id: String,
    participants: Vec<Participant>,
}

pub async fn run(args: WhoArgs, connection: &ConnectionArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(connection.json);
    let config = Arc::new(connection.client_config()?);
    let directory = HttpParticipantDirectory::new(config)?;
    let participants = directory
        .participants(&args.document)
        .await
        .with_context(|| format!("failed to list participants of `{}`", args.document))?;

    let result = WhoResult { document_id: args.document, participants };
    output::print_output(format, &result, format_human)?;
    Ok(())
}

fn format_human(result: &WhoResult) -> String {
    if result.participants.is_empty() {
        return format!("Nobody is in {}", result.document_id);
    }
    result
        .participants
        .iter()
        .map(|participant| match participant.selection {
            Some(selection) => format!(
                "{} ({}) at {}..{}",
                participant.display_name, participant.user_id, selection.start, selection.end
            ),
            None => format!("{} ({})", participant.display_name, participant.user_id),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
