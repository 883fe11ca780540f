// `coedit edit`: replace or append to a document's content.

use anyhow::{bail, Context};
use clap::Args;
use coedit_client::delta::Settlement;
use coedit_common::types::SelectionDirection;
use serde::{Deserialize, Serialize};

use crate::connect::{self, ConnectionArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct EditArgs {
    /// Document id.
    pub document: String,

    /// New content for the whole document.
    #[arg(long, group = "content_source")]
    content: Option<String>,

    /// Read the new content from a file.
    #[arg(long, group = "content_source")]
    file: Option<String>,

    /// Text to append to the current content.
    #[arg(long, group = "content_source")]
    append: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditResult {
    pub document_id: String,
    pub applied: bool,
    pub chars: usize,
    pub caret: usize,
}

enum NewContent {
    Replace(String),
    Append(String),
}

pub async fn run(args: EditArgs, connection: &ConnectionArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(connection.json);

    let new_content = match (args.content, args.file, args.append) {
        (Some(content), _, _) => NewContent::Replace(content),
        (_, Some(path), _) => NewContent::Replace(
            std::fs::read_to_string(&path).with_context(|| format!("failed to read content file `{path}`"))?,
        ),
        (_, _, Some(tail)) => NewContent::Append(tail),
        (None, None, None) => bail!("one of --content, --file or --append is required"),
    };

    let session = connect::join(connection, &args.document, false).await?;
    let text = match new_content {
        NewContent::Replace(text) => text,
        NewContent::Append(tail) => format!("{}{tail}", session.snapshot().content),
    };
    let caret = text.chars().count();

    let settlement = session.update_content(&text, caret, caret, SelectionDirection::Forward).await;
    connect::finish(session).await?;

    let result = EditResult {
        document_id: args.document,
        applied: matches!(settlement?, Settlement::Applied { .. }),
        chars: caret,
        caret,
    };
    if !result.applied {
        output::print_warning(format, "EDIT_UNACKNOWLEDGED", "the server did not acknowledge the edit in time");
    }
    output::print_output(format, &result, format_human)?;
    Ok(())
}

fn format_human(result: &EditResult) -> String {
    if result.applied {
        format!("Edited {} ({} chars, caret at {})", result.document_id, result.chars, result.caret)
    } else {
        format!("Edit to {} was not acknowledged; the server copy is unchanged", result.document_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> EditResult {
        EditResult { document_id: "D1".into(), applied: true, chars: 11, caret: 11 }
    }

    #[test]
    fn human_format_shows_edit_confirmation() {
        let output = format_human(&sample_result());
        assert!(output.contains("Edited D1"));
        assert!(output.contains("11 chars"));
    }

    #[test]
    fn human_format_reports_missing_ack() {
        let result = EditResult { applied: false, ..sample_result() };
        assert!(format_human(&result).contains("not acknowledged"));
    }

    #[test]
    fn json_format_roundtrips() {
        let mut buf = Vec::new();
        output::write_output(&mut buf, OutputFormat::Json, &sample_result(), format_human).unwrap();
        let parsed: EditResult = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed.document_id, "D1");
        assert!(parsed.applied);
    }
}
