//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, the session storage backend, the last
//! used sign-in email and the inactivity timings.
//!
//! Configuration is stored at `~/.config/carebase/config.json`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_BASE_URL;
use crate::auth::{FileStorage, KeyringStorage, SessionStorage, SessionTimeouts};

/// Application name used for config/data directory paths
const APP_NAME: &str = "carebase";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Where the session record is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
}

/// Inactivity timings, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub inactivity_timeout_secs: u64,
    pub warning_window_secs: u64,
    pub check_interval_secs: u64,
    pub activity_throttle_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let defaults = SessionTimeouts::default();
        Self {
            inactivity_timeout_secs: defaults.inactivity.num_seconds() as u64,
            warning_window_secs: defaults.warning_window.num_seconds() as u64,
            check_interval_secs: defaults.check_interval.num_seconds() as u64,
            activity_throttle_secs: defaults.activity_throttle.num_seconds() as u64,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.inactivity_timeout_secs == 0
            || self.check_interval_secs == 0
            || self.activity_throttle_secs == 0
        {
            bail!("Session timings must be greater than zero");
        }
        if self.warning_window_secs >= self.inactivity_timeout_secs {
            bail!(
                "Warning window ({}s) must be shorter than the inactivity timeout ({}s)",
                self.warning_window_secs,
                self.inactivity_timeout_secs
            );
        }
        Ok(())
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        let secs = |s: u64| {
            i64::try_from(s)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX)
        };
        SessionTimeouts {
            inactivity: secs(self.inactivity_timeout_secs),
            warning_window: secs(self.warning_window_secs),
            check_interval: secs(self.check_interval_secs),
            activity_throttle: secs(self.activity_throttle_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub last_email: Option<String>,
    #[serde(default)]
    pub storage: StorageBackend,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let config: Self = serde_json::from_str(&contents)?;
            config.session.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the session file and logs
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Build the configured session storage backend
    pub fn session_storage(&self) -> Result<Arc<dyn SessionStorage>> {
        let storage: Arc<dyn SessionStorage> = match self.storage {
            StorageBackend::File => Arc::new(FileStorage::new(self.data_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringStorage::new()),
        };
        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let session = SessionConfig::default();
        assert_eq!(session.inactivity_timeout_secs, 900);
        assert_eq!(session.warning_window_secs, 120);
        assert_eq!(session.check_interval_secs, 60);
        assert_eq!(session.activity_throttle_secs, 30);
        assert!(session.validate().is_ok());
        assert_eq!(session.timeouts(), SessionTimeouts::default());
    }

    #[test]
    fn test_validate_rejects_bad_timings() {
        let mut session = SessionConfig {
            warning_window_secs: 900,
            ..Default::default()
        };
        assert!(session.validate().is_err());

        session.warning_window_secs = 60;
        session.check_interval_secs = 0;
        assert!(session.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"api_base_url": null, "last_email": "a@b.c", "storage": "keyring", "session": {"inactivity_timeout_secs": 600}}"#)
                .unwrap();
        assert_eq!(config.storage, StorageBackend::Keyring);
        assert_eq!(config.session.inactivity_timeout_secs, 600);
        assert_eq!(config.session.warning_window_secs, 120);
        assert_eq!(config.api_base_url(), DEFAULT_BASE_URL);
    }
}
