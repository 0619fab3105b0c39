//! WeChat robot backend API.
//!
//! [`WeChatBackend`] is the seam the poller, probe and sender talk to;
//! [`WeChatApiClient`] is its HTTP implementation.

mod client;
pub mod types;

pub use client::{WeChatApiClient, DEFAULT_TIMEOUT_MS};
pub use types::{
    is_chat_room_id, ChatHistoryItem, ChatHistoryPage, ChatHistoryQuery, Contact, RobotInfo,
    RobotState, SendReceipt, CHAT_ROOM_SUFFIX, MSG_TYPE_TEXT,
};

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// Operations offered by a WeChat robot backend.
#[async_trait]
pub trait WeChatBackend: Send + Sync {
    /// Self wxid and nickname of the robot.
    async fn robot_info(&self) -> Result<RobotInfo>;

    /// Current login state.
    async fn robot_state(&self) -> Result<RobotState>;

    /// Friend list.
    async fn friends(&self) -> Result<Vec<Contact>>;

    /// Chat rooms the robot is a member of.
    async fn chat_rooms(&self) -> Result<Vec<Contact>>;

    /// One page of chat history for a contact, newest first.
    async fn chat_history(&self, query: &ChatHistoryQuery) -> Result<ChatHistoryPage>;

    /// Send a text message, optionally mentioning `at` members in a chat room.
    async fn send_text(&self, to: &str, content: &str, at: &[String]) -> Result<SendReceipt>;

    /// Send an image hosted at `image_url`.
    async fn send_image(&self, to: &str, image_url: &str) -> Result<SendReceipt>;

    /// Upload and send a voice file.
    async fn send_voice(&self, to: &str, path: &Path) -> Result<SendReceipt>;
}
