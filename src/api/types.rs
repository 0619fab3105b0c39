//! Wire types for the WeChat robot backend.
//!
//! Every response is wrapped in [`ApiEnvelope`]; `code == 200` means success
//! regardless of the HTTP status.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope code the backend uses for success.
pub const SUCCESS_CODE: i64 = 200;

/// Message type code for plain text.
pub const MSG_TYPE_TEXT: i32 = 1;

/// Suffix that marks a contact id as a chat room.
pub const CHAT_ROOM_SUFFIX: &str = "@chatroom";

/// `{code, message, data}` wrapper around every backend payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

/// Self identity of the robot account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotInfo {
    pub wechat_id: String,
    pub nickname: String,
}

/// Login state reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotState {
    pub online: bool,
    pub status: Option<String>,
}

/// A friend or chat room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    pub wechat_id: String,
    pub nickname: String,
}

impl Contact {
    pub fn is_chat_room(&self) -> bool {
        is_chat_room_id(&self.wechat_id)
    }
}

/// Whether a contact id carries the chat-room suffix.
pub fn is_chat_room_id(id: &str) -> bool {
    id.ends_with(CHAT_ROOM_SUFFIX)
}

/// One chat-history entry. The backend returns these newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatHistoryItem {
    pub id: i64,
    pub msg_id: i64,
    #[serde(rename = "type")]
    pub msg_type: i32,
    pub content: String,
    pub display_full_content: String,
    pub from_wxid: String,
    pub to_wxid: String,
    pub sender_wxid: String,
    pub sender_nickname: Option<String>,
    pub is_chat_room: bool,
    pub is_at_me: bool,
    pub is_recalled: bool,
    pub is_robot: bool,
    /// Creation time, seconds since epoch
    pub created_at: i64,
    pub attachment_url: Option<String>,
}

impl ChatHistoryItem {
    /// Backend message id used in dedup keys; falls back to the row id.
    pub fn message_key(&self) -> i64 {
        if self.msg_id != 0 {
            self.msg_id
        } else {
            self.id
        }
    }
}

/// One page of chat history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatHistoryPage {
    pub items: Vec<ChatHistoryItem>,
    pub total: i64,
}

/// Query parameters for the chat-history endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatHistoryQuery {
    pub contact_id: String,
    pub keyword: Option<String>,
    /// 1-based page index
    pub page_index: u32,
    pub page_size: u32,
}

impl ChatHistoryQuery {
    /// The most recent page for a contact.
    pub fn latest(contact_id: &str, page_size: u32) -> Self {
        Self {
            contact_id: contact_id.to_string(),
            keyword: None,
            page_index: 1,
            page_size,
        }
    }
}

/// Payload returned by the send endpoints.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SendReceipt {
    pub msg_id: Option<Value>,
    pub new_msg_id: Option<Value>,
}

impl SendReceipt {
    /// Backend message id of the sent message, if any was reported.
    pub fn message_id(&self) -> Option<String> {
        [&self.new_msg_id, &self.msg_id]
            .into_iter()
            .flatten()
            .find_map(|value| match value {
                Value::Number(n) => Some(n.to_string()),
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                _ => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_item_deserialize() {
        let json = r#"{
            "id": 3,
            "msg_id": 9001,
            "type": 1,
            "content": "hello",
            "display_full_content": "Alice: hello",
            "sender_wxid": "wxid_alice",
            "is_chat_room": false,
            "created_at": 1700000000
        }"#;
        let item: ChatHistoryItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.msg_type, MSG_TYPE_TEXT);
        assert_eq!(item.message_key(), 9001);
        assert_eq!(item.created_at, 1_700_000_000);
        assert!(item.sender_nickname.is_none());
        assert!(!item.is_recalled);
    }

    #[test]
    fn test_message_key_falls_back_to_row_id() {
        let item = ChatHistoryItem {
            id: 12,
            ..Default::default()
        };
        assert_eq!(item.message_key(), 12);
    }

    #[test]
    fn test_chat_room_suffix() {
        assert!(is_chat_room_id("123456@chatroom"));
        assert!(!is_chat_room_id("wxid_abc"));
        let room = Contact {
            wechat_id: "9@chatroom".into(),
            nickname: "team".into(),
        };
        assert!(room.is_chat_room());
    }

    #[test]
    fn test_send_receipt_message_id() {
        let receipt: SendReceipt = serde_json::from_str(r#"{"new_msg_id": 123456789}"#).unwrap();
        assert_eq!(receipt.message_id().as_deref(), Some("123456789"));

        let receipt: SendReceipt = serde_json::from_str(r#"{"msg_id": "abc"}"#).unwrap();
        assert_eq!(receipt.message_id().as_deref(), Some("abc"));

        assert!(SendReceipt::default().message_id().is_none());
    }
}
