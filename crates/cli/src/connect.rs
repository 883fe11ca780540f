// Session setup shared by every subcommand.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use coedit_client::cue::{SilentCue, SoundCue, TerminalBell};
use coedit_client::directory::HttpParticipantDirectory;
use coedit_client::transport::WsConnector;
use coedit_client::{Channel, ClientConfig, CollabSession};
use tokio::time::timeout;
use tracing::debug;

pub type Session = CollabSession<HttpParticipantDirectory>;

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, Args)]
pub struct ConnectionArgs {
    /// Collaboration server URL (overrides `server_url` in the config file).
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Config file to use instead of `~/.coedit/client.toml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// User id to join as.
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Display name shown to other participants.
    #[arg(long, global = true)]
    pub name: Option<String>,

    /// Force JSON output.
    #[arg(long, global = true)]
    pub json: bool,
}

impl ConnectionArgs {
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load_from(path)
                .with_context(|| format!("failed to load config `{}`", path.display()))?,
            None => ClientConfig::load(),
        };
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        if let Some(user) = &self.user {
            config.user.id = user.clone();
        }
        if let Some(name) = &self.name {
            config.user.display_name = name.clone();
        }
        Ok(config)
    }
}

/// The server refused the join.
#[derive(Debug)]
pub struct JoinRefused {
    pub document_id: String,
    pub reason: String,
}

impl fmt::Display for JoinRefused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not join document `{}`: {}", self.document_id, self.reason)
    }
}

impl std::error::Error for JoinRefused {}

/// The server never confirmed the join.
#[derive(Debug)]
pub struct JoinTimedOut {
    pub document_id: String,
}

impl fmt::Display for JoinTimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timed out joining document `{}`", self.document_id)
    }
}

impl std::error::Error for JoinTimedOut {}

/// Open a session on `document_id` and wait until it is joined.
pub async fn join(args: &ConnectionArgs, document_id: &str, audible: bool) -> Result<Session> {
    let config = Arc::new(args.client_config()?);
    let connector = Arc::new(WsConnector::new(Arc::clone(&config)));
    let channel = Channel::open(connector, document_id, config.reconnect, config.ack_timeout());
    let directory = HttpParticipantDirectory::new(Arc::clone(&config))
        .context("failed to build participant directory client")?;
    let cue: Box<dyn SoundCue> = if audible { Box::new(TerminalBell) } else { Box::new(SilentCue) };
    let session = CollabSession::start(channel, config.user.clone(), directory, cue);

    let mut view = session.view();
    let settled = timeout(JOIN_TIMEOUT, view.wait_for(|view| view.joined || view.join_error.is_some()))
        .await
        .map_err(|_| JoinTimedOut { document_id: document_id.to_string() })?
        .context("session stopped before joining")?
        .clone();

    if let Some(reason) = settled.join_error {
        session.channel().close();
        return Err(JoinRefused { document_id: document_id.to_string(), reason }.into());
    }
    debug!(document_id = %document_id, member_count = settled.member_count, "joined document");
    Ok(session)
}

/// Leave the document and stop the channel.
pub async fn finish(session: Session) -> Result<()> {
    session.leave().await.context("failed to leave document")?;
    session.channel().close();
    Ok(())
}
