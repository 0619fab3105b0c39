//! Multi-account merging and credential resolution.
//!
//! A [`ResolvedAccount`] is a read-only snapshot recomputed on every call; it
//! is never cached, so a config reload is picked up by the next resolution.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{
    AccessPolicy, PollingConfig, WeChatAccountConfig, WeChatConfig, DEFAULT_ACCOUNT_ID,
    DEFAULT_MEDIA_MAX_MB, DEFAULT_TEXT_CHUNK_LIMIT,
};

/// Environment variable holding the fallback token for the default account.
pub const TOKEN_ENV_VAR: &str = "WECHAT_ROBOT_TOKEN";

/// Where a resolved token came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TokenSource {
    Env,
    Config,
    ConfigFile,
    None,
}

impl TokenSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::Config => "config",
            Self::ConfigFile => "configFile",
            Self::None => "none",
        }
    }
}

/// A resolved token together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResolution {
    pub token: String,
    pub source: TokenSource,
}

impl TokenResolution {
    fn none() -> Self {
        Self {
            token: String::new(),
            source: TokenSource::None,
        }
    }
}

/// Snapshot of one account: base config + account overrides + resolved credential.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAccount {
    pub account_id: String,
    pub name: Option<String>,
    pub enabled: bool,
    pub base_url: String,
    pub token: String,
    pub token_source: TokenSource,
    pub robot_id: Option<i64>,
    pub polling: PollingConfig,
    /// Merged account settings (token fields cleared)
    pub config: WeChatAccountConfig,
}

impl ResolvedAccount {
    /// An account is usable once it has a token, a base URL and a robot id.
    pub fn is_configured(&self) -> bool {
        !self.token.trim().is_empty() && !self.base_url.trim().is_empty() && self.robot_id.is_some()
    }

    pub fn dm_policy(&self) -> AccessPolicy {
        self.config.dm_policy.unwrap_or(AccessPolicy::Pairing)
    }

    pub fn group_policy(&self) -> AccessPolicy {
        self.config.group_policy.unwrap_or(AccessPolicy::Allowlist)
    }

    pub fn allow_from(&self) -> &[String] {
        self.config.allow_from.as_deref().unwrap_or(&[])
    }

    pub fn require_mention(&self) -> bool {
        self.config.require_mention.unwrap_or(true)
    }

    pub fn guest_safety_prefix(&self) -> bool {
        self.config.guest_safety_prefix.unwrap_or(true)
    }

    pub fn media_max_bytes(&self) -> u64 {
        self.config
            .media_max_mb
            .unwrap_or(DEFAULT_MEDIA_MAX_MB)
            .saturating_mul(1024 * 1024)
    }

    pub fn text_chunk_limit(&self) -> usize {
        self.config
            .text_chunk_limit
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_TEXT_CHUNK_LIMIT)
    }
}

/// Normalize an account id: trimmed, lowercased, empty → `default`.
pub fn normalize_account_id(account_id: Option<&str>) -> String {
    match account_id.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_lowercase(),
        _ => DEFAULT_ACCOUNT_ID.to_string(),
    }
}

/// All configured account ids, sorted. `["default"]` when no named accounts exist.
pub fn list_account_ids(cfg: &WeChatConfig) -> Vec<String> {
    if cfg.accounts.is_empty() {
        return vec![DEFAULT_ACCOUNT_ID.to_string()];
    }
    let mut ids: Vec<String> = cfg
        .accounts
        .keys()
        .map(|id| normalize_account_id(Some(id.as_str())))
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// The account used when the caller does not name one.
pub fn resolve_default_account_id(cfg: &WeChatConfig) -> String {
    let ids = list_account_ids(cfg);
    if let Some(preferred) = cfg.default_account.as_deref() {
        let preferred = normalize_account_id(Some(preferred));
        if ids.contains(&preferred) {
            return preferred;
        }
    }
    if ids.iter().any(|id| id == DEFAULT_ACCOUNT_ID) {
        return DEFAULT_ACCOUNT_ID.to_string();
    }
    ids.into_iter()
        .next()
        .unwrap_or_else(|| DEFAULT_ACCOUNT_ID.to_string())
}

fn account_section<'a>(cfg: &'a WeChatConfig, account_id: &str) -> Option<&'a WeChatAccountConfig> {
    cfg.accounts
        .iter()
        .find(|(id, _)| normalize_account_id(Some(id.as_str())) == account_id)
        .map(|(_, section)| section)
}

fn read_token_file(path: &str) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let token = content.trim().to_string();
            (!token.is_empty()).then_some(token)
        }
        Err(e) => {
            debug!("WeChat token file {} unreadable: {}", path, e);
            None
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolve the token for an account, reading the fallback env var from the process.
pub fn resolve_token(cfg: &WeChatConfig, account_id: Option<&str>) -> TokenResolution {
    let env_token = std::env::var(TOKEN_ENV_VAR).ok();
    resolve_token_with_env(cfg, account_id, env_token.as_deref())
}

/// Resolve the token for an account with an explicit env fallback value.
///
/// Priority: account token, account token file, then for the default account
/// only: base token, base token file, env.
pub fn resolve_token_with_env(
    cfg: &WeChatConfig,
    account_id: Option<&str>,
    env_token: Option<&str>,
) -> TokenResolution {
    let account_id = normalize_account_id(account_id);

    if let Some(section) = account_section(cfg, &account_id) {
        if let Some(token) = non_empty(section.token.as_ref()) {
            return TokenResolution {
                token,
                source: TokenSource::Config,
            };
        }
        if let Some(token) = section.token_file.as_deref().and_then(read_token_file) {
            return TokenResolution {
                token,
                source: TokenSource::ConfigFile,
            };
        }
    }

    if account_id != DEFAULT_ACCOUNT_ID {
        return TokenResolution::none();
    }

    if let Some(token) = non_empty(cfg.base.token.as_ref()) {
        return TokenResolution {
            token,
            source: TokenSource::Config,
        };
    }
    if let Some(token) = cfg.base.token_file.as_deref().and_then(read_token_file) {
        return TokenResolution {
            token,
            source: TokenSource::ConfigFile,
        };
    }
    if let Some(token) = env_token.map(str::trim).filter(|t| !t.is_empty()) {
        return TokenResolution {
            token: token.to_string(),
            source: TokenSource::Env,
        };
    }

    TokenResolution::none()
}

/// Resolve an account snapshot. `None` selects the default account.
pub fn resolve_account(cfg: &WeChatConfig, account_id: Option<&str>) -> ResolvedAccount {
    let env_token = std::env::var(TOKEN_ENV_VAR).ok();
    resolve_account_with_env(cfg, account_id, env_token.as_deref())
}

/// Same as [`resolve_account`] with an explicit env fallback token.
pub fn resolve_account_with_env(
    cfg: &WeChatConfig,
    account_id: Option<&str>,
    env_token: Option<&str>,
) -> ResolvedAccount {
    let account_id = match account_id {
        Some(id) => normalize_account_id(Some(id)),
        None => resolve_default_account_id(cfg),
    };

    let merged = match account_section(cfg, &account_id) {
        Some(section) => section.merged_over(&cfg.base),
        None => WeChatAccountConfig::default().merged_over(&cfg.base),
    };
    let token = resolve_token_with_env(cfg, Some(&account_id), env_token);

    let base_enabled = cfg.base.enabled.unwrap_or(true);
    let account_enabled = account_section(cfg, &account_id)
        .and_then(|section| section.enabled)
        .unwrap_or(true);

    ResolvedAccount {
        account_id,
        name: merged.name.clone(),
        enabled: base_enabled && account_enabled,
        base_url: merged
            .base_url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .unwrap_or_default(),
        token: token.token,
        token_source: token.source,
        robot_id: merged.robot_id,
        polling: merged.polling.clone().unwrap_or_default(),
        config: merged,
    }
}
