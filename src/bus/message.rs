//! Message types for the wechat-channel message bus
//!
//! This module defines the message types exchanged between the WeChat channel,
//! the host runtime and the bus.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A message dispatched to the host after passing access policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// The channel this message came from ("wechat")
    pub channel: String,
    /// Account that received the message
    pub account_id: String,
    /// WeChat id of the sender
    pub sender_id: String,
    /// Contact id the message was polled from (wxid or chat-room id)
    pub chat_id: String,
    /// The text content of the message, after any guest safety prefix
    pub content: String,
    /// Optional media attachment
    pub media: Option<MediaAttachment>,
    /// Session key for routing (format: "channel:account:chat_id")
    pub session_key: String,
    /// Additional metadata key-value pairs
    pub metadata: HashMap<String, String>,
}

/// A message to deliver through a channel account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// The channel to send this message through
    pub channel: String,
    /// Account to send from; `None` selects the default account
    pub account_id: Option<String>,
    /// The contact to send to
    pub chat_id: String,
    /// The text content to send
    pub content: String,
    /// Optional media to send after the text
    pub media: Option<MediaAttachment>,
    /// Optional message ID this is a reply to
    pub reply_to: Option<String>,
}

/// A media attachment (image URL or local voice file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    /// The type of media
    pub media_type: MediaType,
    /// URL to the media (if hosted remotely)
    pub url: Option<String>,
    /// Local file path (voice uploads)
    pub path: Option<String>,
}

/// Media kinds the robot backend can send.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Voice,
}

impl InboundMessage {
    /// Creates a new inbound message with the required fields.
    ///
    /// The session key is generated as "channel:account_id:chat_id".
    ///
    /// # Example
    /// ```
    /// use wechat_channel::bus::message::InboundMessage;
    ///
    /// let msg = InboundMessage::new("wechat", "default", "wxid_alice", "wxid_alice", "hi");
    /// assert_eq!(msg.session_key, "wechat:default:wxid_alice");
    /// ```
    pub fn new(
        channel: &str,
        account_id: &str,
        sender_id: &str,
        chat_id: &str,
        content: &str,
    ) -> Self {
        Self {
            channel: channel.to_string(),
            account_id: account_id.to_string(),
            sender_id: sender_id.to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            media: None,
            session_key: format!("{}:{}:{}", channel, account_id, chat_id),
            metadata: HashMap::new(),
        }
    }

    /// Attaches media to the message (builder pattern).
    pub fn with_media(mut self, media: MediaAttachment) -> Self {
        self.media = Some(media);
        self
    }

    /// Adds a metadata key-value pair to the message (builder pattern).
    ///
    /// # Example
    /// ```
    /// use wechat_channel::bus::message::InboundMessage;
    ///
    /// let msg = InboundMessage::new("wechat", "default", "wxid_a", "wxid_a", "Hello")
    ///     .with_metadata("trust_tier", "guest");
    /// assert_eq!(msg.metadata.get("trust_tier"), Some(&"guest".to_string()));
    /// ```
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

impl OutboundMessage {
    /// Creates a new outbound text message for the default account.
    ///
    /// # Example
    /// ```
    /// use wechat_channel::bus::message::OutboundMessage;
    ///
    /// let msg = OutboundMessage::new("wechat", "wxid_alice", "Hello from the bot!");
    /// assert_eq!(msg.channel, "wechat");
    /// assert!(msg.account_id.is_none());
    /// ```
    pub fn new(channel: &str, chat_id: &str, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            account_id: None,
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            media: None,
            reply_to: None,
        }
    }

    /// Selects the sending account (builder pattern).
    pub fn with_account(mut self, account_id: &str) -> Self {
        self.account_id = Some(account_id.to_string());
        self
    }

    /// Attaches media (builder pattern).
    pub fn with_media(mut self, media: MediaAttachment) -> Self {
        self.media = Some(media);
        self
    }

    /// Sets the message ID to reply to (builder pattern).
    pub fn with_reply(mut self, message_id: &str) -> Self {
        self.reply_to = Some(message_id.to_string());
        self
    }

    /// Creates an outbound message answering an inbound one, on the same account and chat.
    ///
    /// # Example
    /// ```
    /// use wechat_channel::bus::message::{InboundMessage, OutboundMessage};
    ///
    /// let inbound = InboundMessage::new("wechat", "work", "wxid_a", "123@chatroom", "Hello");
    /// let response = OutboundMessage::reply_to(&inbound, "Hello back!");
    /// assert_eq!(response.chat_id, "123@chatroom");
    /// assert_eq!(response.account_id.as_deref(), Some("work"));
    /// ```
    pub fn reply_to(msg: &InboundMessage, content: &str) -> Self {
        let reply = Self::new(&msg.channel, &msg.chat_id, content).with_account(&msg.account_id);
        match msg.metadata.get("message_id") {
            Some(id) => reply.with_reply(id),
            None => reply,
        }
    }
}

impl MediaAttachment {
    /// An image hosted at `url`.
    pub fn image(url: &str) -> Self {
        Self {
            media_type: MediaType::Image,
            url: Some(url.to_string()),
            path: None,
        }
    }

    /// A voice clip read from a local file.
    pub fn voice(path: &str) -> Self {
        Self {
            media_type: MediaType::Voice,
            url: None,
            path: Some(path.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_message_creation() {
        let msg = InboundMessage::new("wechat", "default", "wxid_a", "123@chatroom", "Hello");
        assert_eq!(msg.channel, "wechat");
        assert_eq!(msg.account_id, "default");
        assert_eq!(msg.sender_id, "wxid_a");
        assert_eq!(msg.chat_id, "123@chatroom");
        assert_eq!(msg.session_key, "wechat:default:123@chatroom");
        assert!(msg.media.is_none());
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn test_inbound_message_with_media() {
        let msg = InboundMessage::new("wechat", "default", "wxid_a", "wxid_a", "look")
            .with_media(MediaAttachment::image("https://cdn.example.com/a.png"));
        let media = msg.media.unwrap();
        assert_eq!(media.media_type, MediaType::Image);
        assert_eq!(media.url.as_deref(), Some("https://cdn.example.com/a.png"));
    }

    #[test]
    fn test_outbound_builders() {
        let msg = OutboundMessage::new("wechat", "wxid_a", "hi")
            .with_account("work")
            .with_media(MediaAttachment::voice("/tmp/a.silk"))
            .with_reply("42");
        assert_eq!(msg.account_id.as_deref(), Some("work"));
        assert_eq!(msg.reply_to.as_deref(), Some("42"));
        let media = msg.media.unwrap();
        assert_eq!(media.media_type, MediaType::Voice);
        assert_eq!(media.path.as_deref(), Some("/tmp/a.silk"));
        assert!(media.url.is_none());
    }

    #[test]
    fn test_reply_to_carries_message_id() {
        let inbound = InboundMessage::new("wechat", "default", "wxid_a", "wxid_a", "hi")
            .with_metadata("message_id", "wxid_a:77");
        let reply = OutboundMessage::reply_to(&inbound, "hello");
        assert_eq!(reply.reply_to.as_deref(), Some("wxid_a:77"));
        assert_eq!(reply.account_id.as_deref(), Some("default"));
    }

    #[test]
    fn test_message_serialization() {
        let msg = OutboundMessage::new("wechat", "wxid_a", "Hello")
            .with_media(MediaAttachment::image("https://x/y.png"));
        let json = serde_json::to_string(&msg).expect("Failed to serialize");
        assert!(json.contains(r#""media_type":"image""#));
        let back: OutboundMessage = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(back.chat_id, "wxid_a");
    }
}
