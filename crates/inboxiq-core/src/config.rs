use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, anyhow};

use crate::api::Session;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub ws_url: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
    pub log_filter: Option<String>,
    pub session: Option<Session>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    /// Web API base URL; `INBOXIQ_API_URL` wins over the file.
    pub fn api_base_url(&self) -> String {
        std::env::var("INBOXIQ_API_URL")
            .ok()
            .or_else(|| self.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    /// Assistant WebSocket endpoint; `INBOXIQ_WS_URL` wins over the file.
    pub fn ws_url(&self) -> String {
        std::env::var("INBOXIQ_WS_URL")
            .ok()
            .or_else(|| self.ws_url.clone())
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.unwrap_or(DEFAULT_RECONNECT_DELAY_MS))
    }

    /// `<config_dir>/inboxiq/config.json`
    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("inboxiq").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::new());
        assert_eq!(config.reconnect_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_session_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config {
            reconnect_delay_ms: Some(500),
            session: Some(Session {
                user_id: "17".to_string(),
                email: "me@example.com".to_string(),
                token: "jwt".to_string(),
            }),
            ..Config::new()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.reconnect_delay(), Duration::from_millis(500));
    }
}
