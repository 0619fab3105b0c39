//! Outbound delivery: text chunking, target normalization and the sender.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::{WeChatApiClient, WeChatBackend};
use crate::bus::{MediaAttachment, MediaType};
use crate::config::ResolvedAccount;
use crate::error::{Result, WeChatError};

use super::types::strip_id_prefix;

/// Split `text` into chunks of at most `limit` characters.
///
/// Each chunk is filled greedily, breaking at the last newline in the window,
/// else the last space; the separator and leading whitespace of the remainder
/// are dropped. A window without either is cut exactly at `limit`.
/// Whitespace-only text yields no chunks.
///
/// ```
/// use wechat_channel::channels::chunk_text;
///
/// assert_eq!(chunk_text("hello world", 8), vec!["hello", "world"]);
/// assert_eq!(chunk_text("abcdef", 4), vec!["abcd", "ef"]);
/// ```
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let window_end = match rest.char_indices().nth(limit) {
            Some((idx, _)) => idx,
            None => {
                chunks.push(rest.to_string());
                break;
            }
        };
        let window = &rest[..window_end];

        let break_at = window
            .rfind('\n')
            .filter(|idx| *idx > 0)
            .or_else(|| window.rfind(' ').filter(|idx| *idx > 0));

        let (chunk, next) = match break_at {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (window, &rest[window_end..]),
        };

        let chunk = chunk.trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        rest = next.trim_start();
    }

    chunks
}

/// Strip `wechat:` / `wx:` prefixes from a target id.
pub fn normalize_target(target: &str) -> String {
    strip_id_prefix(target).to_string()
}

/// Outcome of a user-facing send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendResult {
    pub ok: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl SendResult {
    pub fn success(message_id: Option<String>) -> Self {
        Self {
            ok: true,
            message_id,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

impl From<WeChatError> for SendResult {
    fn from(err: WeChatError) -> Self {
        Self::failure(err.to_string())
    }
}

/// Sends text and media for one account.
#[derive(Clone)]
pub struct OutboundSender {
    account_id: String,
    backend: Arc<dyn WeChatBackend>,
    chunk_limit: usize,
    media_max_bytes: u64,
}

impl OutboundSender {
    /// Builds a sender over the HTTP client.
    ///
    /// # Errors
    ///
    /// `WeChatError::Config` when the account lacks a token, base URL or robot id.
    pub fn for_account(account: &ResolvedAccount) -> Result<Self> {
        if !account.is_configured() {
            return Err(WeChatError::Config(format!(
                "WeChat account '{}' is not configured (token, base_url and robot_id are required)",
                account.account_id
            )));
        }
        let client = WeChatApiClient::for_account(account)?;
        Ok(Self::new(account, Arc::new(client)))
    }

    /// Builds a sender over an existing backend.
    pub fn new(account: &ResolvedAccount, backend: Arc<dyn WeChatBackend>) -> Self {
        Self {
            account_id: account.account_id.clone(),
            backend,
            chunk_limit: account.text_chunk_limit(),
            media_max_bytes: account.media_max_bytes(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Sends `text` in chunks, in order. Stops at the first failed chunk.
    pub async fn send_text(&self, to: &str, text: &str) -> SendResult {
        let to = normalize_target(to);
        if to.is_empty() {
            return SendResult::failure("missing target");
        }
        let chunks = chunk_text(text, self.chunk_limit);
        if chunks.is_empty() {
            return SendResult::failure("message text is empty");
        }

        let total = chunks.len();
        let mut last_id = None;
        for (idx, chunk) in chunks.iter().enumerate() {
            match self.backend.send_text(&to, chunk, &[]).await {
                Ok(receipt) => last_id = receipt.message_id().or(last_id),
                Err(e) => {
                    warn!(account = %self.account_id, to = %to, "WeChat text chunk {}/{} failed: {}", idx + 1, total, e);
                    return SendResult {
                        ok: false,
                        message_id: last_id,
                        error: Some(if total > 1 {
                            format!("chunk {}/{} failed: {}", idx + 1, total, e)
                        } else {
                            e.to_string()
                        }),
                    };
                }
            }
        }

        debug!(account = %self.account_id, to = %to, chunks = total, "WeChat text sent");
        SendResult::success(last_id)
    }

    /// Sends an image by URL.
    pub async fn send_image(&self, to: &str, image_url: &str) -> SendResult {
        let to = normalize_target(to);
        if to.is_empty() {
            return SendResult::failure("missing target");
        }
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return SendResult::failure("missing image URL");
        }
        match self.backend.send_image(&to, image_url).await {
            Ok(receipt) => SendResult::success(receipt.message_id()),
            Err(e) => e.into(),
        }
    }

    /// Uploads a voice file, rejecting files above the account's media cap.
    pub async fn send_voice(&self, to: &str, path: &Path) -> SendResult {
        let to = normalize_target(to);
        if to.is_empty() {
            return SendResult::failure("missing target");
        }
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                return SendResult::failure(format!(
                    "cannot read voice file {}: {}",
                    path.display(),
                    e
                ))
            }
        };
        if size > self.media_max_bytes {
            return SendResult::failure(format!(
                "voice file is {} bytes, limit is {} bytes",
                size, self.media_max_bytes
            ));
        }
        match self.backend.send_voice(&to, path).await {
            Ok(receipt) => SendResult::success(receipt.message_id()),
            Err(e) => e.into(),
        }
    }

    /// Sends optional text followed by optional media.
    pub async fn send_message(
        &self,
        to: &str,
        text: &str,
        media: Option<&MediaAttachment>,
    ) -> SendResult {
        let mut result = SendResult::success(None);
        if !text.trim().is_empty() {
            result = self.send_text(to, text).await;
            if !result.ok {
                return result;
            }
        }

        let Some(media) = media else {
            if text.trim().is_empty() {
                return SendResult::failure("message has neither text nor media");
            }
            return result;
        };

        match (media.media_type, media.url.as_deref(), media.path.as_deref()) {
            (MediaType::Image, Some(url), _) => self.send_image(to, url).await,
            (MediaType::Voice, _, Some(path)) => self.send_voice(to, Path::new(path)).await,
            (MediaType::Image, None, _) => SendResult::failure("image attachment has no URL"),
            (MediaType::Voice, _, None) => SendResult::failure("voice attachment has no file path"),
        }
    }
}

/// Reply callback handed to the host with each dispatched message.
#[derive(Clone)]
pub struct ReplyDelivery {
    sender: OutboundSender,
    to: String,
}

impl ReplyDelivery {
    pub fn new(sender: OutboundSender, to: &str) -> Self {
        Self {
            sender,
            to: to.to_string(),
        }
    }

    /// Target the reply goes to (chat-room id for groups, sender for direct chats).
    pub fn target(&self) -> &str {
        &self.to
    }

    pub fn account_id(&self) -> &str {
        self.sender.account_id()
    }

    pub async fn deliver(&self, text: &str) -> SendResult {
        self.sender.send_text(&self.to, text).await
    }
}

impl std::fmt::Debug for ReplyDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyDelivery")
            .field("account_id", &self.sender.account_id)
            .field("to", &self.to)
            .finish()
    }
}
