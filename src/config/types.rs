//! Configuration type definitions for wechat-channel
//!
//! All types implement serde traits for JSON serialization and have sensible defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Account id used when no named accounts are configured.
pub const DEFAULT_ACCOUNT_ID: &str = "default";

/// Default delay between two poll cycles.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;

/// Default cap on contacts discovered in poll-all mode.
pub const DEFAULT_MAX_POLL_CONTACTS: usize = 50;

/// Default outbound chunk size in characters.
pub const DEFAULT_TEXT_CHUNK_LIMIT: usize = 2_000;

/// Default cap on uploaded media, in megabytes.
pub const DEFAULT_MEDIA_MAX_MB: u64 = 20;

/// Main configuration struct for wechat-channel
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// WeChat robot channel configuration (base fields + named accounts)
    pub wechat: WeChatConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

// ============================================================================
// WeChat Channel Configuration
// ============================================================================

/// Access policy for a chat kind (direct or group).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessPolicy {
    /// Anyone may talk to the bot; unlisted senders are treated as guests.
    Open,
    /// Only allow-listed senders are accepted.
    Allowlist,
    /// Unlisted senders receive a pairing code and must be approved.
    Pairing,
    /// All traffic of this chat kind is dropped.
    Disabled,
}

impl AccessPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Allowlist => "allowlist",
            Self::Pairing => "pairing",
            Self::Disabled => "disabled",
        }
    }
}

/// Polling sub-configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between cycles in milliseconds (default 3000)
    pub interval_ms: Option<u64>,
    /// Explicit contact ids to poll. Takes precedence over `poll_all_contacts`.
    pub contact_ids: Vec<String>,
    /// Discover contacts from the friend and chat-room lists every cycle
    pub poll_all_contacts: bool,
    /// Maximum contacts polled in poll-all mode (default 50)
    pub max_poll_contacts: Option<usize>,
}

impl PollingConfig {
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
    }

    pub fn max_poll_contacts(&self) -> usize {
        self.max_poll_contacts.unwrap_or(DEFAULT_MAX_POLL_CONTACTS)
    }
}

/// Per-account settings. Every field is optional so that a named account can
/// override only what differs from the base-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct WeChatAccountConfig {
    /// Whether the account is enabled (default true)
    pub enabled: Option<bool>,
    /// Display name
    pub name: Option<String>,
    /// Backend REST base URL
    pub base_url: Option<String>,
    /// Bearer token
    pub token: Option<String>,
    /// Path to a file holding the bearer token
    pub token_file: Option<String>,
    /// Numeric robot instance id
    pub robot_id: Option<i64>,
    /// Direct chat access policy (default pairing)
    pub dm_policy: Option<AccessPolicy>,
    /// Group chat access policy (default allowlist)
    pub group_policy: Option<AccessPolicy>,
    /// Allow-listed sender ids
    pub allow_from: Option<Vec<String>>,
    /// Drop group messages that do not mention the robot (default true)
    pub require_mention: Option<bool>,
    /// Prefix guest messages with a capability-disabling notice (default true)
    pub guest_safety_prefix: Option<bool>,
    /// Maximum media upload size in MB (default 20)
    pub media_max_mb: Option<u64>,
    /// Outbound text chunk size in characters (default 2000)
    pub text_chunk_limit: Option<usize>,
    /// Polling configuration
    pub polling: Option<PollingConfig>,
}

impl WeChatAccountConfig {
    /// Overlay `self` on top of `base`, field by field.
    ///
    /// Token fields are left out on purpose: they follow the resolver's own
    /// priority rules in [`super::accounts::resolve_token`].
    pub fn merged_over(&self, base: &WeChatAccountConfig) -> WeChatAccountConfig {
        WeChatAccountConfig {
            enabled: self.enabled.or(base.enabled),
            name: self.name.clone().or_else(|| base.name.clone()),
            base_url: self.base_url.clone().or_else(|| base.base_url.clone()),
            token: None,
            token_file: None,
            robot_id: self.robot_id.or(base.robot_id),
            dm_policy: self.dm_policy.or(base.dm_policy),
            group_policy: self.group_policy.or(base.group_policy),
            allow_from: self.allow_from.clone().or_else(|| base.allow_from.clone()),
            require_mention: self.require_mention.or(base.require_mention),
            guest_safety_prefix: self.guest_safety_prefix.or(base.guest_safety_prefix),
            media_max_mb: self.media_max_mb.or(base.media_max_mb),
            text_chunk_limit: self.text_chunk_limit.or(base.text_chunk_limit),
            polling: self.polling.clone().or_else(|| base.polling.clone()),
        }
    }
}

/// WeChat robot channel configuration: base-level fields plus named accounts.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct WeChatConfig {
    /// Base-level settings shared by every account
    #[serde(flatten)]
    pub base: WeChatAccountConfig,
    /// Named accounts, merged over the base-level settings
    pub accounts: HashMap<String, WeChatAccountConfig>,
    /// Account used when none is specified
    pub default_account: Option<String>,
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, coloured output
    Pretty,
    /// Compact `[timestamp] [LEVEL] target message {fields}` lines
    #[default]
    Component,
    /// Structured JSON lines
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Default level filter when `RUST_LOG` is unset
    pub level: String,
    /// Optional file to append logs to
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "info".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polling_defaults() {
        let polling = PollingConfig::default();
        assert_eq!(polling.interval_ms(), 3_000);
        assert_eq!(polling.max_poll_contacts(), 50);
        assert!(polling.contact_ids.is_empty());
        assert!(!polling.poll_all_contacts);
    }

    #[test]
    fn test_zero_interval_uses_default() {
        let polling = PollingConfig {
            interval_ms: Some(0),
            ..Default::default()
        };
        assert_eq!(polling.interval_ms(), 3_000);

        let polling = PollingConfig {
            interval_ms: Some(250),
            ..Default::default()
        };
        assert_eq!(polling.interval_ms(), 250);
    }

    #[test]
    fn test_access_policy_deserialize() {
        let policy: AccessPolicy = serde_json::from_str(r#""pairing""#).unwrap();
        assert_eq!(policy, AccessPolicy::Pairing);
        assert_eq!(AccessPolicy::Disabled.as_str(), "disabled");
        assert!(serde_json::from_str::<AccessPolicy>(r#""whatever""#).is_err());
    }

    #[test]
    fn test_wechat_config_flattened_base() {
        let json = r#"{
            "base_url": "http://robot.local",
            "token": "base-token",
            "robot_id": 7,
            "dm_policy": "open",
            "accounts": {
                "work": { "robot_id": 9, "allow_from": ["wxid_boss"] }
            },
            "default_account": "work"
        }"#;
        let config: WeChatConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.base.base_url.as_deref(), Some("http://robot.local"));
        assert_eq!(config.base.robot_id, Some(7));
        assert_eq!(config.base.dm_policy, Some(AccessPolicy::Open));
        assert_eq!(config.accounts["work"].robot_id, Some(9));
        assert_eq!(config.default_account.as_deref(), Some("work"));
    }

    #[test]
    fn test_merged_over_prefers_account_fields() {
        let base = WeChatAccountConfig {
            base_url: Some("http://base".into()),
            robot_id: Some(1),
            require_mention: Some(true),
            token: Some("base-token".into()),
            ..Default::default()
        };
        let account = WeChatAccountConfig {
            robot_id: Some(2),
            require_mention: Some(false),
            ..Default::default()
        };
        let merged = account.merged_over(&base);
        assert_eq!(merged.base_url.as_deref(), Some("http://base"));
        assert_eq!(merged.robot_id, Some(2));
        assert_eq!(merged.require_mention, Some(false));
        assert!(merged.token.is_none());
    }

    #[test]
    fn test_logging_config_defaults() {
        let cfg = LoggingConfig::default();
        assert_eq!(cfg.format, LogFormat::Component);
        assert_eq!(cfg.level, "info");
        assert!(cfg.file.is_none());
    }
}
