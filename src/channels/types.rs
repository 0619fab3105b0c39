//! Channel trait and types for wechat-channel
//!
//! This module defines the `Channel` trait that the WeChat robot channel
//! implements for the [`ChannelManager`](super::ChannelManager), along with the
//! capability flags it advertises and allow-list matching used by the
//! inbound dispatcher.

use async_trait::async_trait;
use serde::Serialize;

use crate::bus::OutboundMessage;
use crate::error::Result;

/// The `Channel` trait defines the interface for a communication channel.
///
/// Channels are responsible for:
/// - Receiving messages from users and handing them to the host runtime
/// - Sending outbound messages back to users
/// - Managing their connection lifecycle (start/stop)
///
/// Access control happens per message in the inbound dispatcher.
///
/// # Example Implementation
///
/// ```ignore
/// use async_trait::async_trait;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use wechat_channel::channels::Channel;
/// use wechat_channel::bus::OutboundMessage;
/// use wechat_channel::error::Result;
///
/// struct EchoChannel {
///     running: AtomicBool,
/// }
///
/// #[async_trait]
/// impl Channel for EchoChannel {
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     async fn start(&self) -> Result<()> {
///         self.running.store(true, Ordering::SeqCst);
///         Ok(())
///     }
///
///     async fn stop(&self) -> Result<()> {
///         self.running.store(false, Ordering::SeqCst);
///         Ok(())
///     }
///
///     async fn send(&self, msg: OutboundMessage) -> Result<()> {
///         println!("Sending: {}", msg.content);
///         Ok(())
///     }
///
///     fn is_running(&self) -> bool {
///         self.running.load(Ordering::SeqCst)
///     }
/// }
/// ```
#[async_trait]
pub trait Channel: Send + Sync {
    /// Returns the unique name of this channel (e.g., "wechat").
    ///
    /// Outbound messages are routed to the channel whose name they carry.
    fn name(&self) -> &str;

    /// Starts the channel: one inbound poller per enabled, configured account.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel fails to start.
    async fn start(&self) -> Result<()>;

    /// Stops the channel, cancelling every running poller.
    async fn stop(&self) -> Result<()>;

    /// Sends an outbound message through this channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the message fails to send (e.g., network failure,
    /// unconfigured account, backend rejection).
    async fn send(&self, msg: OutboundMessage) -> Result<()>;

    /// Returns whether the channel is currently running and accepting messages.
    fn is_running(&self) -> bool;
}

/// Capability flags a channel advertises to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelCapabilities {
    pub direct: bool,
    pub group: bool,
    pub media: bool,
    pub reactions: bool,
    pub threads: bool,
    pub polls: bool,
}

impl ChannelCapabilities {
    /// Direct and group chats with media, nothing else.
    pub const fn chat_with_media() -> Self {
        Self {
            direct: true,
            group: true,
            media: true,
            reactions: false,
            threads: false,
            polls: false,
        }
    }
}

/// Prefixes accepted in front of a WeChat id in allow-lists and targets.
const ID_PREFIXES: [&str; 2] = ["wechat:", "wx:"];

/// Strip a leading `wechat:` or `wx:` prefix (case-insensitive) and surrounding whitespace.
///
/// The remainder keeps its original case; see [`normalize_sender_id`] for matching.
pub fn strip_id_prefix(id: &str) -> &str {
    let trimmed = id.trim();
    for prefix in ID_PREFIXES {
        if let Some(head) = trimmed.get(..prefix.len()) {
            if head.eq_ignore_ascii_case(prefix) {
                return trimmed[prefix.len()..].trim();
            }
        }
    }
    trimmed
}

/// Normalized form of a sender id used for allow-list comparison.
///
/// ```
/// use wechat_channel::channels::normalize_sender_id;
///
/// assert_eq!(normalize_sender_id("  WeChat:WXID_Abc "), "wxid_abc");
/// assert_eq!(normalize_sender_id("wx:alice"), "alice");
/// ```
pub fn normalize_sender_id(id: &str) -> String {
    strip_id_prefix(id).to_lowercase()
}

/// Allow-list for one channel account.
///
/// Entries are compared in normalized form and `*` matches everyone. An
/// empty list matches nobody; the dispatcher's access policy decides what
/// happens to unlisted senders.
///
/// # Example
///
/// ```
/// use wechat_channel::channels::BaseChannelConfig;
///
/// let config = BaseChannelConfig::with_allowlist(
///     "wechat",
///     vec!["wxid_alice".to_string(), "wx:WXID_BOB".to_string()],
/// );
///
/// assert!(config.is_listed("wxid_alice"));
/// assert!(config.is_listed("wxid_bob"));
/// assert!(!config.is_listed("wxid_carol"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct BaseChannelConfig {
    /// The unique name of this channel
    pub name: String,
    /// Allowed sender ids, raw as configured
    pub allowlist: Vec<String>,
}

impl BaseChannelConfig {
    pub fn with_allowlist(name: &str, allowlist: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            allowlist,
        }
    }

    /// Whether the user matches an allowlist entry.
    pub fn is_listed(&self, user_id: &str) -> bool {
        let sender = normalize_sender_id(user_id);
        self.allowlist.iter().any(|entry| {
            let entry = normalize_sender_id(entry);
            entry == "*" || (!entry.is_empty() && entry == sender)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_allowlist_matches_nobody() {
        let config = BaseChannelConfig::with_allowlist("wechat", Vec::new());
        assert_eq!(config.name, "wechat");
        assert!(!config.is_listed("anyone"));
        assert!(!config.is_listed("*"));
    }

    #[test]
    fn test_allowlist_normalized_match() {
        let config = BaseChannelConfig::with_allowlist(
            "wechat",
            vec!["WECHAT:wxid_Alice".to_string(), " wxid_bob ".to_string()],
        );
        assert!(config.is_listed("wxid_alice"));
        assert!(config.is_listed("wx:WXID_ALICE"));
        assert!(config.is_listed("wxid_bob"));
        assert!(!config.is_listed("wxid_carol"));
    }

    #[test]
    fn test_wildcard_allowlist() {
        let config = BaseChannelConfig::with_allowlist("wechat", vec!["*".to_string()]);
        assert!(config.is_listed("wxid_anyone"));
    }

    #[test]
    fn test_blank_entries_never_match() {
        let config = BaseChannelConfig::with_allowlist("wechat", vec!["  ".to_string()]);
        assert!(!config.is_listed(""));
        assert!(!config.is_listed("wxid_a"));
    }

    #[test]
    fn test_strip_id_prefix() {
        assert_eq!(strip_id_prefix("wechat:wxid_a"), "wxid_a");
        assert_eq!(strip_id_prefix("WX: 123@chatroom"), "123@chatroom");
        assert_eq!(strip_id_prefix("wxid_plain"), "wxid_plain");
        assert_eq!(strip_id_prefix("微信"), "微信");
    }

    #[test]
    fn test_capabilities() {
        let caps = ChannelCapabilities::chat_with_media();
        assert!(caps.direct && caps.group && caps.media);
        assert!(!caps.reactions && !caps.threads && !caps.polls);
    }
}
