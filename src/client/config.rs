//! Client configuration.
//!
//! A TOML file with an `[app]` table (connection and storage) and a `[sync]`
//! table (engine options), both optional. Environment variables override
//! the file:
//!
//! - `KIOKU_API_URL`: base URL of the learning service
//! - `KIOKU_API_TOKEN`: personal API token
//! - `KIOKU_DB_PATH`: SQLite file of the local store

use crate::client::sync::SyncConfig;
use crate::shared::config::{AppConfig, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_API_URL: &str = "KIOKU_API_URL";
pub const ENV_API_TOKEN: &str = "KIOKU_API_TOKEN";
pub const ENV_DB_PATH: &str = "KIOKU_DB_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub sync: SyncConfig,
}

impl Config {
    /// Default config file location, under the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("kioku").join("config.toml"))
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Read `path` if it exists, apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                tracing::debug!("Loading config from {}", path.display());
                Self::from_toml(&std::fs::read_to_string(path)?)?
            }
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from `lookup`, normally the process environment
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.app.server_url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(token) = lookup(ENV_API_TOKEN) {
            self.app.api_token = Some(token);
        }
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.app.database_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.app.validate()?;
        self.sync.validate()
    }
}
