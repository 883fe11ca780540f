// Collaboration server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Without a storage URL the server runs on the in-memory
// document store.

use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_AUTOSAVE_QUIET_MS: u64 = 5_000;

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Base URL of the document-storage collaborator.
    pub storage_url: Option<String>,
    /// Bearer token sent to the document-storage collaborator.
    pub storage_token: Option<String>,
    /// Inactivity window before a pending edit is persisted.
    pub autosave_quiet: Duration,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `coedit_server=debug`).
    pub log_filter: String,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `COEDIT_HOST` | `0.0.0.0` |
    /// | `COEDIT_PORT` | `8080` |
    /// | `COEDIT_STORAGE_URL` | *(none, in-memory store)* |
    /// | `COEDIT_STORAGE_TOKEN` | *(none)* |
    /// | `COEDIT_AUTOSAVE_QUIET_MS` | `5000` |
    /// | `COEDIT_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `COEDIT_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("COEDIT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("COEDIT_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let storage_url = env("COEDIT_STORAGE_URL")
            .ok()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        let storage_token = env("COEDIT_STORAGE_TOKEN").ok().filter(|token| !token.is_empty());

        let quiet_ms = env("COEDIT_AUTOSAVE_QUIET_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_AUTOSAVE_QUIET_MS);

        let cors_origins = env("COEDIT_CORS_ORIGINS").ok();
        let log_filter = env("COEDIT_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self {
            listen_addr,
            storage_url,
            storage_token,
            autosave_quiet: Duration::from_millis(quiet_ms),
            cors_origins,
            log_filter,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env_fn(|_| Err(std::env::VarError::NotPresent))
    }
}
