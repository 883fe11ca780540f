// Consistent exit codes for the coedit CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   11 = access denied (join refused, read-only)
//   13 = network error (server unreachable, join timeout, connection lost)

use std::process;

use coedit_client::SessionError;

use crate::connect::{JoinRefused, JoinTimedOut};

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Denied = 11,
    Network = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<JoinRefused>().is_some() {
                return Self::Denied;
            }
            if cause.downcast_ref::<JoinTimedOut>().is_some() {
                return Self::Network;
            }
            if let Some(session_error) = cause.downcast_ref::<SessionError>() {
                return match session_error {
                    SessionError::Rejected { code, .. } => {
                        code.as_deref().map_or(Self::Error, Self::from_server_code)
                    }
                    SessionError::NotJoined => Self::Error,
                    SessionError::NotConnected | SessionError::Channel(_) => Self::Network,
                };
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                return match io_err.kind() {
                    std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::TimedOut => {
                        Self::Network
                    }
                    _ => Self::Error,
                };
            }
        }

        Self::Error
    }

    /// Map a server rejection code to an exit code.
    pub fn from_server_code(code: &str) -> Self {
        match code {
            "FORBIDDEN" | "READ_ONLY" => Self::Denied,
            "VALIDATION_FAILED" => Self::Usage,
            "STORAGE_FAILED" => Self::Network,
            _ => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
