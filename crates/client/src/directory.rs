// Session-membership collaborator: the authoritative participant list.
//
// Presence events only say that membership changed; the list itself is
// pulled from here.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use coedit_common::protocol::payload::ParticipantsResponse;
use coedit_common::types::Participant;
use reqwest::Client;
use thiserror::Error;

use crate::config::{ClientConfig, ConfigError};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("participant request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub trait ParticipantDirectory: Send + Sync + 'static {
    fn participants(&self, document_id: &str) -> impl Future<Output = Result<Vec<Participant>, DirectoryError>> + Send;
}

/// Calls `GET {server_url}/v1/documents/{id}/participants`.
#[derive(Debug, Clone)]
pub struct HttpParticipantDirectory {
    client: Client,
    config: Arc<ClientConfig>,
}

impl HttpParticipantDirectory {
    pub fn new(config: Arc<ClientConfig>) -> Result<Self, DirectoryError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, config })
    }
}

impl ParticipantDirectory for HttpParticipantDirectory {
    fn participants(&self, document_id: &str) -> impl Future<Output = Result<Vec<Participant>, DirectoryError>> + Send {
        let url = self.config.participants_url(document_id);
        let client = self.client.clone();

        async move {
            let response: ParticipantsResponse =
                client.get(url?).send().await?.error_for_status()?.json().await?;
            Ok(response.participants)
        }
    }
}

/// Fixed participant list, for offline use and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    participants: Vec<Participant>,
}

impl StaticDirectory {
    pub fn new(participants: Vec<Participant>) -> Self {
        Self { participants }
    }
}

impl ParticipantDirectory for StaticDirectory {
    fn participants(&self, _document_id: &str) -> impl Future<Output = Result<Vec<Participant>, DirectoryError>> + Send {
        std::future::ready(Ok(self.participants.clone()))
    }
}
