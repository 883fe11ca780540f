// Client-side error types. None of these is fatal to a session.

use coedit_common::protocol::ws::FrameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,
    #[error("channel is closed")]
    Closed,
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// The server answered `ok: false`.
    #[error("rejected by server: {reason}")]
    Rejected { reason: String, code: Option<String> },
    #[error("not joined to a document")]
    NotJoined,
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Channel(ChannelError),
}

impl From<ChannelError> for SessionError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::NotConnected => Self::NotConnected,
            other => Self::Channel(other),
        }
    }
}

impl SessionError {
    pub fn rejected(reason: impl Into<String>, code: Option<String>) -> Self {
        Self::Rejected { reason: reason.into(), code }
    }

    /// Machine code attached to a server rejection, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
