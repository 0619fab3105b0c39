//! Message actions exposed to the host's agent.
//!
//! The channel offers a single `send` action. Actions follow the same shape
//! as agent tools: a name, a description, a JSON schema for the arguments and
//! an async `execute`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::WeChatBackend;
use crate::bus::MediaAttachment;
use crate::config::{resolve_account, WeChatConfig};
use crate::error::{Result, WeChatError};

use super::outbound::OutboundSender;
use super::status::StatusRegistry;

/// Where an action is being invoked from.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    /// Account the triggering message arrived on
    pub account_id: Option<String>,
    /// Chat the triggering message arrived in; default target for `send`
    pub chat_id: Option<String>,
}

impl ActionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, account_id: &str) -> Self {
        self.account_id = Some(account_id.to_string());
        self
    }

    pub fn with_chat(mut self, chat_id: &str) -> Self {
        self.chat_id = Some(chat_id.to_string());
        self
    }
}

/// Result of an action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutput {
    pub content: String,
    pub is_error: bool,
    pub details: Value,
}

impl ActionOutput {
    pub fn ok(content: impl Into<String>, details: Value) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            details,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            details: Value::Null,
        }
    }
}

#[async_trait]
pub trait MessageAction: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted arguments.
    fn parameters(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ActionContext) -> Result<ActionOutput>;
}

/// Runs the action called `name`; unknown names are an error.
pub async fn run_action(
    actions: &[Arc<dyn MessageAction>],
    name: &str,
    args: Value,
    ctx: &ActionContext,
) -> Result<ActionOutput> {
    let action = actions
        .iter()
        .find(|action| action.name() == name)
        .ok_or_else(|| WeChatError::NotFound(format!("WeChat action '{}'", name)))?;
    action.execute(args, ctx).await
}

#[derive(Debug, Deserialize)]
struct SendArgs {
    to: Option<String>,
    #[serde(default)]
    message: String,
    media: Option<String>,
    account_id: Option<String>,
}

/// `send`: text and/or an image URL to a WeChat contact or chat room.
pub struct SendAction {
    config: WeChatConfig,
    status: StatusRegistry,
    backend: Option<Arc<dyn WeChatBackend>>,
}

impl SendAction {
    pub fn new(config: WeChatConfig, status: StatusRegistry) -> Self {
        Self {
            config,
            status,
            backend: None,
        }
    }

    /// Routes every send through `backend` instead of an HTTP client.
    pub fn with_backend(mut self, backend: Arc<dyn WeChatBackend>) -> Self {
        self.backend = Some(backend);
        self
    }
}

#[async_trait]
impl MessageAction for SendAction {
    fn name(&self) -> &str {
        "send"
    }

    fn description(&self) -> &str {
        "Send a WeChat message (text and optionally an image URL) to a contact or chat room."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": {
                    "type": "string",
                    "description": "Target wxid or chat-room id. Defaults to the current chat."
                },
                "message": {
                    "type": "string",
                    "description": "Message text. Long text is split into several messages."
                },
                "media": {
                    "type": "string",
                    "description": "Image URL to send after the text."
                },
                "account_id": {
                    "type": "string",
                    "description": "WeChat account to send from. Defaults to the current account."
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ActionContext) -> Result<ActionOutput> {
        let args: SendArgs = serde_json::from_value(args)?;

        let Some(to) = args
            .to
            .filter(|to| !to.trim().is_empty())
            .or_else(|| ctx.chat_id.clone())
        else {
            return Ok(ActionOutput::error("No target: pass `to` or call from a chat"));
        };

        let account_id = args.account_id.or_else(|| ctx.account_id.clone());
        let account = resolve_account(&self.config, account_id.as_deref());
        let sender = match &self.backend {
            Some(backend) => OutboundSender::new(&account, Arc::clone(backend)),
            None => match OutboundSender::for_account(&account) {
                Ok(sender) => sender,
                Err(e) => return Ok(ActionOutput::error(e.to_string())),
            },
        };

        let media = args.media.as_deref().map(MediaAttachment::image);
        let result = sender.send_message(&to, &args.message, media.as_ref()).await;
        if !result.ok {
            return Ok(ActionOutput::error(format!(
                "Failed to send WeChat message: {}",
                result.error.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        self.status.record_outbound(&account.account_id);
        Ok(ActionOutput::ok(
            format!("Sent WeChat message to {}", to),
            json!({
                "channel": "wechat",
                "account_id": account.account_id,
                "to": to,
                "message_id": result.message_id,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        ChatHistoryPage, ChatHistoryQuery, Contact, RobotInfo, RobotState, SendReceipt,
    };
    use crate::config::WeChatAccountConfig;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl WeChatBackend for Outbox {
        async fn robot_info(&self) -> Result<RobotInfo> {
            Ok(RobotInfo::default())
        }
        async fn robot_state(&self) -> Result<RobotState> {
            Ok(RobotState::default())
        }
        async fn friends(&self) -> Result<Vec<Contact>> {
            Ok(Vec::new())
        }
        async fn chat_rooms(&self) -> Result<Vec<Contact>> {
            Ok(Vec::new())
        }
        async fn chat_history(&self, _: &ChatHistoryQuery) -> Result<ChatHistoryPage> {
            Ok(ChatHistoryPage::default())
        }
        async fn send_text(&self, to: &str, content: &str, _: &[String]) -> Result<SendReceipt> {
            if self.fail {
                return Err(WeChatError::Backend {
                    code: 500,
                    message: "robot offline".into(),
                    body: String::new(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), content.to_string()));
            Ok(SendReceipt {
                msg_id: Some(json!(77)),
                new_msg_id: None,
            })
        }
        async fn send_image(&self, to: &str, url: &str) -> Result<SendReceipt> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), format!("image:{}", url)));
            Ok(SendReceipt::default())
        }
        async fn send_voice(&self, _: &str, _: &Path) -> Result<SendReceipt> {
            Ok(SendReceipt::default())
        }
    }

    fn config() -> WeChatConfig {
        let mut accounts = HashMap::new();
        accounts.insert(
            "work".to_string(),
            WeChatAccountConfig {
                robot_id: Some(9),
                ..Default::default()
            },
        );
        WeChatConfig {
            base: WeChatAccountConfig {
                base_url: Some("http://robot.local".into()),
                token: Some("tok".into()),
                robot_id: Some(1),
                ..Default::default()
            },
            accounts,
            default_account: None,
        }
    }

    fn action(backend: Arc<Outbox>, status: StatusRegistry) -> Arc<dyn MessageAction> {
        Arc::new(SendAction::new(config(), status).with_backend(backend))
    }

    #[test]
    fn test_send_schema() {
        let action = SendAction::new(WeChatConfig::default(), StatusRegistry::new());
        let schema = action.parameters();
        assert_eq!(action.name(), "send");
        assert_eq!(schema["required"], json!(["message"]));
        assert!(schema["properties"]["media"].is_object());
    }

    #[tokio::test]
    async fn test_send_defaults_to_context_chat() {
        let backend = Arc::new(Outbox::default());
        let status = StatusRegistry::new();
        let actions = vec![action(backend.clone(), status.clone())];
        let ctx = ActionContext::new()
            .with_account("work")
            .with_chat("1@chatroom");

        let output = run_action(&actions, "send", json!({ "message": "hello" }), &ctx)
            .await
            .unwrap();
        assert!(!output.is_error);
        assert_eq!(output.details["account_id"], "work");
        assert_eq!(output.details["message_id"], "77");
        assert_eq!(
            backend.sent.lock().unwrap().as_slice(),
            &[("1@chatroom".to_string(), "hello".to_string())]
        );
        assert_eq!(status.get("work").messages_sent, 1);
    }

    #[tokio::test]
    async fn test_send_explicit_target_with_media() {
        let backend = Arc::new(Outbox::default());
        let actions = vec![action(backend.clone(), StatusRegistry::new())];
        let args = json!({
            "to": "wechat:wxid_bob",
            "message": "look",
            "media": "https://img.example/cat.png"
        });

        let output = run_action(&actions, "send", args, &ActionContext::new())
            .await
            .unwrap();
        assert!(!output.is_error);
        let sent = backend.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "wxid_bob");
        assert_eq!(sent[1].1, "image:https://img.example/cat.png");
    }

    #[tokio::test]
    async fn test_send_without_target_is_error_output() {
        let actions = vec![action(Arc::new(Outbox::default()), StatusRegistry::new())];
        let output = run_action(
            &actions,
            "send",
            json!({ "message": "hi" }),
            &ActionContext::new(),
        )
        .await
        .unwrap();
        assert!(output.is_error);
    }

    #[tokio::test]
    async fn test_send_failure_reported() {
        let backend = Arc::new(Outbox {
            fail: true,
            ..Default::default()
        });
        let status = StatusRegistry::new();
        let actions = vec![action(backend, status.clone())];
        let output = run_action(
            &actions,
            "send",
            json!({ "to": "wxid_a", "message": "hi" }),
            &ActionContext::new(),
        )
        .await
        .unwrap();
        assert!(output.is_error);
        assert!(output.content.contains("robot offline"));
        assert_eq!(status.get("work").messages_sent, 0);
    }

    #[tokio::test]
    async fn test_unknown_action_rejected() {
        let actions = vec![action(Arc::new(Outbox::default()), StatusRegistry::new())];
        let err = run_action(&actions, "react", json!({}), &ActionContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WeChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unconfigured_account_without_backend() {
        let action = SendAction::new(WeChatConfig::default(), StatusRegistry::new());
        let output = action
            .execute(
                json!({ "to": "wxid_a", "message": "hi" }),
                &ActionContext::new(),
            )
            .await
            .unwrap();
        assert!(output.is_error);
        assert!(output.content.contains("not configured"));
    }
}
