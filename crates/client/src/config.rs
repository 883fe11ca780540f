// Client configuration file.
//
// Location: `~/.coedit/client.toml`. Every field has a default so a missing
// or partial file still yields a usable configuration.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Root directory for coedit client state: `~/.coedit/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".coedit"))
}

/// Path to the client config file: `~/.coedit/client.toml`.
pub fn client_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("client.toml"))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid server_url `{url}`: {reason}")]
    InvalidServerUrl { url: String, reason: String },
}

/// Identity of the local user attached to every outgoing request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LocalUser {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
}

impl Default for LocalUser {
    fn default() -> Self {
        Self { id: "anonymous".to_string(), display_name: "Anonymous".to_string(), email: None }
    }
}

/// Reconnection parameters for a document channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay_ms: 250, max_delay_ms: 30_000, max_attempts: 10 }
    }
}

impl ReconnectPolicy {
    /// Backoff before reconnect attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(7);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Client configuration at `~/.coedit/client.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Collaboration server base URL (e.g. `https://collab.example.com`).
    pub server_url: String,
    pub user: LocalUser,
    /// How long to wait for a server acknowledgement before treating it as missing.
    pub ack_timeout_ms: u64,
    /// Grace period before an unreferenced channel is torn down.
    pub teardown_grace_ms: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            user: LocalUser::default(),
            ack_timeout_ms: 5_000,
            teardown_grace_ms: 300,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load from `~/.coedit/client.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        client_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    /// WebSocket endpoint for one document channel.
    pub fn channel_url(&self, document_id: &str) -> Result<Url, ConfigError> {
        let mut url = self.validated_server_url()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|_| ConfigError::InvalidServerUrl {
            url: self.server_url.clone(),
            reason: "cannot derive websocket scheme".to_string(),
        })?;
        url.path_segments_mut()
            .map_err(|_| ConfigError::InvalidServerUrl {
                url: self.server_url.clone(),
                reason: "url cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(["v1", "ws", document_id]);
        url.query_pairs_mut()
            .append_pair("protocol", coedit_common::protocol::ws::CURRENT_PROTOCOL_VERSION);
        Ok(url)
    }

    /// REST endpoint listing the participants of one document room.
    pub fn participants_url(&self, document_id: &str) -> Result<Url, ConfigError> {
        let mut url = self.validated_server_url()?;
        url.path_segments_mut()
            .map_err(|_| ConfigError::InvalidServerUrl {
                url: self.server_url.clone(),
                reason: "url cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(["v1", "documents", document_id, "participants"]);
        Ok(url)
    }

    fn validated_server_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidServerUrl {
            url: self.server_url.clone(),
            reason,
        };
        let parsed = Url::parse(&self.server_url).map_err(|error| invalid(error.to_string()))?;
        match parsed.scheme() {
            "https" => Ok(parsed),
            "http" if is_loopback_host(parsed.host_str()) => Ok(parsed),
            _ => Err(invalid("must use https (http is allowed only for localhost)".to_string())),
        }
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.parse::<IpAddr>().is_ok_and(|addr| addr.is_loopback())
}
