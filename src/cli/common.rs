//! Shared CLI helpers used across multiple command handlers.

use std::path::Path;

use anyhow::{Context, Result};

use wechat_channel::config::Config;

/// Load the config from `path`, or from the default location.
pub(crate) fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Config::load().with_context(|| {
            format!(
                "Failed to load configuration from {}",
                Config::path().display()
            )
        }),
    }
}

/// `"yes"` / `"no"` for status tables.
pub(crate) fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
