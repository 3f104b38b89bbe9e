//! Client configuration
//!
//! Loaded from `~/.config/quickpoll/config.json5` (or `$QUICKPOLL_CONFIG`),
//! then overridden by environment variables.

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at an alternative config file
pub const CONFIG_PATH_ENV: &str = "QUICKPOLL_CONFIG";
pub const API_URL_ENV: &str = "QUICKPOLL_API_URL";
pub const WS_URL_ENV: &str = "QUICKPOLL_WS_URL";
pub const STORE_PATH_ENV: &str = "QUICKPOLL_STORE";

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_SITE_URL: &str = "http://localhost:3000";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config {path}: {message}")]
    Parse { path: String, message: String },
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// REST root of the polling API
    pub api_url: String,
    /// WebSocket root; derived from `api_url` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    /// Public site used for share links
    pub site_url: String,
    /// Local store file; defaults under the user data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    /// Request timeout; unset means the transport default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: None,
            site_url: DEFAULT_SITE_URL.to_string(),
            store_path: None,
            request_timeout_secs: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// WebSocket root, e.g. `ws://localhost:8000/api` for `http://localhost:8000/api`
    pub fn ws_url(&self) -> String {
        if let Some(ws) = &self.ws_url {
            return ws.trim_end_matches('/').to_string();
        }
        let api = self.api_url.trim_end_matches('/');
        if let Some(rest) = api.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = api.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            api.to_string()
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(default_store_path)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(api) = non_empty(API_URL_ENV) {
            self.api_url = api;
        }
        if let Some(ws) = non_empty(WS_URL_ENV) {
            self.ws_url = Some(ws);
        }
        if let Some(store) = non_empty(STORE_PATH_ENV) {
            self.store_path = Some(PathBuf::from(store));
        }
    }
}

/// Root directory for quickpoll configuration
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("quickpoll")
}

/// Resolved config file path
pub fn get_config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir().join("config.json5"))
}

pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("quickpoll")
        .join("store.json")
}

/// Load config from the resolved path and apply environment overrides
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

/// Load config from a specific file. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<ClientConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ClientConfig::default()),
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        }
    };

    json5::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
