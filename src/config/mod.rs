//! Configuration management for wechat-channel
//!
//! This module provides configuration loading and saving.
//! Configuration is loaded from `~/.wechat-channel/config.json` with environment variable overrides.
//! The loaded [`Config`] is passed explicitly to the components that need it; there is no
//! process-wide configuration instance.

pub mod accounts;
mod types;

pub use accounts::{
    list_account_ids, normalize_account_id, resolve_account, resolve_account_with_env,
    resolve_default_account_id, resolve_token, resolve_token_with_env, ResolvedAccount,
    TokenResolution, TokenSource, TOKEN_ENV_VAR,
};
pub use types::*;

use crate::error::{Result, WeChatError};
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the configuration directory path (~/.wechat-channel)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wechat-channel")
    }

    /// Returns the path to the config file (~/.wechat-channel/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// The token fallback (`WECHAT_ROBOT_TOKEN`) is not applied here; it is
    /// consulted by the token resolver for the default account only.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("WECHAT_CHANNEL_BASE_URL") {
            self.wechat.base.base_url = Some(val);
        }
        if let Ok(val) = std::env::var("WECHAT_CHANNEL_ROBOT_ID") {
            if let Ok(v) = val.parse() {
                self.wechat.base.robot_id = Some(v);
            }
        }
        if let Ok(val) = std::env::var("WECHAT_CHANNEL_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Save configuration to a specific path, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve an account, failing with a configuration error if it is unknown.
    pub fn account(&self, account_id: Option<&str>) -> Result<ResolvedAccount> {
        if let Some(id) = account_id {
            let id = normalize_account_id(Some(id));
            if !list_account_ids(&self.wechat).contains(&id) {
                return Err(WeChatError::NotFound(format!("WeChat account '{}'", id)));
            }
        }
        Ok(resolve_account(&self.wechat, account_id))
    }
}
