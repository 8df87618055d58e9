//! Configuration loading and persistence.
//!
//! Reads and writes `config.json` in the pawlink config directory. The
//! session token is never written to disk; it comes from `PAWLINK_TOKEN`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::session::SessionConfig;
use crate::ws;

const CONFIG_FILE: &str = "config.json";

/// Configuration for the pawlink client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the chat backend (REST and WebSocket).
    pub server_url: String,
    /// Identity sent as the `userId` CONNECT header.
    pub user_id: String,
    /// Explicit WebSocket endpoint; derived from `server_url` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    /// Session token - NOT serialized to disk.
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            user_id: String::new(),
            ws_url: None,
            token: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `PAWLINK_CONFIG_DIR` overrides the platform config dir
    /// (macOS: ~/Library/Application Support/pawlink).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("PAWLINK_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("pawlink")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        let mut config = Self::load_from(&path).unwrap_or_else(|e| {
            log::debug!("Using default config: {:#}", e);
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    /// Reads a config file without applying overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = lookup("PAWLINK_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Some(ws_url) = lookup("PAWLINK_WS_URL") {
            self.ws_url = Some(ws_url);
        }

        if let Some(user_id) = lookup("PAWLINK_USER_ID") {
            self.user_id = user_id;
        }

        if let Some(token) = lookup("PAWLINK_TOKEN").filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }
    }

    /// Persists the current configuration to the config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Persists the configuration to `path` (owner read/write only).
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;

        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// WebSocket endpoint of the STOMP broker.
    pub fn ws_url(&self) -> String {
        match self.ws_url {
            Some(ref url) => url.clone(),
            None => ws::endpoint_url(&self.server_url),
        }
    }

    /// Session settings with the default heartbeat and reconnect timing.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.ws_url())
    }
}
