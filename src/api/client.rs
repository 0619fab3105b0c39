//! HTTP client for the WeChat robot backend.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::config::ResolvedAccount;
use crate::error::{Result, WeChatError};

use super::types::{
    ApiEnvelope, ChatHistoryPage, ChatHistoryQuery, Contact, RobotInfo, RobotState, SendReceipt,
    SUCCESS_CODE,
};
use super::WeChatBackend;

/// Per-call timeout for data calls.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

const ROBOT_STATE_PATH: &str = "/api/v1/robot/state";
const ROBOT_INFO_PATH: &str = "/api/v1/robot/info";
const SEND_TEXT_PATH: &str = "/api/v1/message/send/text";
const SEND_IMAGE_PATH: &str = "/api/v1/message/send/image";
const SEND_VOICE_PATH: &str = "/api/v1/message/send/voice";
const FRIENDS_PATH: &str = "/api/v1/contacts/friends";
const CHAT_ROOMS_PATH: &str = "/api/v1/contacts/chat-rooms";
const CHAT_HISTORY_PATH: &str = "/api/v1/chat/history";

/// Bearer-authenticated client bound to one robot instance.
#[derive(Debug, Clone)]
pub struct WeChatApiClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    robot_id: i64,
    timeout: Duration,
}

impl WeChatApiClient {
    /// Creates a client. Fails when the base URL or token is blank.
    pub fn new(base_url: &str, token: &str, robot_id: i64) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(WeChatError::Config(
                "WeChat base_url is not configured".to_string(),
            ));
        }
        if token.trim().is_empty() {
            return Err(WeChatError::Config(
                "WeChat token is not configured".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            token: token.trim().to_string(),
            robot_id,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        })
    }

    /// Creates a client from a resolved account.
    pub fn for_account(account: &ResolvedAccount) -> Result<Self> {
        let robot_id = account.robot_id.ok_or_else(|| {
            WeChatError::Config(format!(
                "WeChat robot_id is not configured for account '{}'",
                account.account_id
            ))
        })?;
        Self::new(&account.base_url, &account.token, robot_id)
    }

    /// Overrides the per-call timeout (builder pattern).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn robot_id(&self) -> i64 {
        self.robot_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_error(&self, path: &str, err: reqwest::Error) -> WeChatError {
        if err.is_timeout() {
            WeChatError::Timeout(format!(
                "WeChat request {} timed out after {}ms",
                path,
                self.timeout.as_millis()
            ))
        } else {
            WeChatError::Http(err)
        }
    }

    async fn execute<T>(&self, path: &str, request: RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let response = request
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(path, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(path, e))?;

        debug!(path, status = status.as_u16(), "WeChat backend responded");
        parse_envelope(status, &body)
    }

    async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let request = self.client.get(self.url(path)).query(query);
        self.execute(path, request).await
    }

    async fn post_json<T>(&self, path: &str, payload: &Value) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let request = self.client.post(self.url(path)).json(payload);
        self.execute(path, request).await
    }

    fn id_query(&self) -> [(&'static str, String); 1] {
        [("id", self.robot_id.to_string())]
    }
}

/// Decode a backend response body.
///
/// A body that is not an envelope is reported with the HTTP status when that
/// status is an error, otherwise as a JSON error.
pub(crate) fn parse_envelope<T>(status: StatusCode, body: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let envelope: ApiEnvelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(WeChatError::Backend {
                code: i64::from(status.as_u16()),
                message: format!("HTTP {}", status),
                body: body.to_string(),
            });
        }
        Err(e) => return Err(WeChatError::Json(e)),
    };

    if envelope.code != SUCCESS_CODE {
        let message = if envelope.message.trim().is_empty() {
            "unknown backend error".to_string()
        } else {
            envelope.message
        };
        return Err(WeChatError::Backend {
            code: envelope.code,
            message,
            body: body.to_string(),
        });
    }

    if envelope.data.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(envelope.data)?)
}

#[async_trait]
impl WeChatBackend for WeChatApiClient {
    async fn robot_info(&self) -> Result<RobotInfo> {
        self.get(ROBOT_INFO_PATH, &self.id_query()).await
    }

    async fn robot_state(&self) -> Result<RobotState> {
        self.get(ROBOT_STATE_PATH, &self.id_query()).await
    }

    async fn friends(&self) -> Result<Vec<Contact>> {
        self.get(FRIENDS_PATH, &self.id_query()).await
    }

    async fn chat_rooms(&self) -> Result<Vec<Contact>> {
        self.get(CHAT_ROOMS_PATH, &self.id_query()).await
    }

    async fn chat_history(&self, query: &ChatHistoryQuery) -> Result<ChatHistoryPage> {
        let params = [
            ("id", self.robot_id.to_string()),
            ("contact_id", query.contact_id.clone()),
            ("keyword", query.keyword.clone().unwrap_or_default()),
            ("page_index", query.page_index.to_string()),
            ("page_size", query.page_size.to_string()),
        ];
        self.get(CHAT_HISTORY_PATH, &params).await
    }

    async fn send_text(&self, to: &str, content: &str, at: &[String]) -> Result<SendReceipt> {
        let payload = json!({
            "id": self.robot_id,
            "to_wxid": to,
            "content": content,
            "at": at,
        });
        self.post_json(SEND_TEXT_PATH, &payload).await
    }

    async fn send_image(&self, to: &str, image_url: &str) -> Result<SendReceipt> {
        let payload = json!({
            "id": self.robot_id,
            "to_wxid": to,
            "image_url": image_url,
        });
        self.post_json(SEND_IMAGE_PATH, &payload).await
    }

    async fn send_voice(&self, to: &str, path: &Path) -> Result<SendReceipt> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "voice".to_string());

        let form = Form::new()
            .text("id", self.robot_id.to_string())
            .text("to_wxid", to.to_string())
            .part("voice", Part::bytes(bytes).file_name(file_name));

        let request = self.client.post(self.url(SEND_VOICE_PATH)).multipart(form);
        self.execute(SEND_VOICE_PATH, request).await
    }
}
