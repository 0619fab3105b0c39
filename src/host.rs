//! Host runtime contract.
//!
//! The channel never reaches for a global runtime handle: every component that
//! needs the host receives an `Arc<dyn HostRuntime>`. [`BusHost`] is the
//! in-process implementation used by the CLI runner; embedders provide their
//! own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::bus::{InboundMessage, MediaAttachment, MessageBus};
use crate::channels::outbound::{ReplyDelivery, SendResult};
use crate::channels::poller::ChatType;
use crate::channels::types::normalize_sender_id;
use crate::error::{Result, WeChatError};

/// Whether a sender is on the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    Trusted,
    Guest,
}

impl TrustTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trusted => "trusted",
            Self::Guest => "guest",
        }
    }
}

/// Everything the host needs to route and answer one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundContext {
    pub channel: String,
    pub account_id: String,
    pub chat_type: ChatType,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub from: String,
    pub to: String,
    /// Body handed to the reply pipeline (guest prefix applied)
    pub body: String,
    /// Body as received
    pub raw_body: String,
    pub message_id: String,
    pub timestamp_ms: i64,
    pub was_mentioned: bool,
    pub trust_tier: TrustTier,
    pub commands_authorized: bool,
    /// `"{channel}:{account_id}:{chat_id}"`
    pub session_key: String,
    pub attachment_url: Option<String>,
}

impl InboundContext {
    /// Bus representation, with the routing details carried as metadata.
    pub fn to_bus_message(&self) -> InboundMessage {
        let mut msg = InboundMessage::new(
            &self.channel,
            &self.account_id,
            &self.sender_id,
            &self.chat_id,
            &self.body,
        )
        .with_metadata("message_id", &self.message_id)
        .with_metadata("chat_type", self.chat_type.as_str())
        .with_metadata("trust_tier", self.trust_tier.as_str())
        .with_metadata("was_mentioned", &self.was_mentioned.to_string())
        .with_metadata(
            "commands_authorized",
            &self.commands_authorized.to_string(),
        )
        .with_metadata("timestamp_ms", &self.timestamp_ms.to_string())
        .with_metadata("raw_body", &self.raw_body)
        .with_metadata("from", &self.from)
        .with_metadata("to", &self.to);
        msg.session_key = self.session_key.clone();
        if let Some(name) = &self.sender_name {
            msg = msg.with_metadata("sender_name", name);
        }
        if let Some(url) = &self.attachment_url {
            msg = msg.with_media(MediaAttachment::image(url));
        }
        msg
    }
}

/// Result of registering a pairing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRequest {
    pub code: String,
    /// `false` when a pending request for this sender already existed
    pub created: bool,
}

/// Services the host runtime provides to the channel.
#[async_trait]
pub trait HostRuntime: Send + Sync {
    /// Sender ids approved through pairing, merged into the configured allow-list.
    async fn read_allow_from_store(&self, _channel: &str, _account_id: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Registers (or finds) a pending pairing request for a sender.
    async fn upsert_pairing_request(
        &self,
        channel: &str,
        account_id: &str,
        sender_id: &str,
        sender_name: Option<&str>,
    ) -> Result<PairingRequest>;

    /// Routes an accepted message into the host's reply pipeline.
    async fn dispatch_reply(&self, ctx: InboundContext, deliver: ReplyDelivery) -> Result<()>;
}

/// A pending pairing request held by [`BusHost`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingPairing {
    pub code: String,
    pub channel: String,
    pub account_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub requested_at: i64,
}

/// In-process host: pairing store in memory, dispatched messages on the bus.
pub struct BusHost {
    bus: Arc<MessageBus>,
    pending: RwLock<HashMap<String, PendingPairing>>,
    approved: RwLock<HashMap<String, Vec<String>>>,
    deliveries: RwLock<HashMap<String, ReplyDelivery>>,
}

fn scope_key(channel: &str, account_id: &str) -> String {
    format!("{}:{}", channel, account_id)
}

fn new_pairing_code() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

impl BusHost {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            pending: RwLock::new(HashMap::new()),
            approved: RwLock::new(HashMap::new()),
            deliveries: RwLock::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Approves a pending pairing code and returns the approved sender id.
    pub async fn approve(&self, channel: &str, account_id: &str, code: &str) -> Result<String> {
        let code = code.trim().to_uppercase();
        let scope = scope_key(channel, account_id);
        let prefix = format!("{}:", scope);

        let request = {
            let mut pending = self.pending.write().await;
            let key = pending
                .iter()
                .find(|(key, req)| key.starts_with(&prefix) && req.code == code)
                .map(|(key, _)| key.clone())
                .ok_or_else(|| WeChatError::NotFound(format!("pairing code {}", code)))?;
            pending
                .remove(&key)
                .ok_or_else(|| WeChatError::NotFound(format!("pairing code {}", code)))?
        };

        let mut approved = self.approved.write().await;
        let list = approved.entry(scope).or_default();
        if !list.contains(&request.sender_id) {
            list.push(request.sender_id.clone());
        }
        info!(account = %account_id, sender = %request.sender_id, "Pairing approved");
        Ok(request.sender_id)
    }

    /// Pending requests for an account, oldest first.
    pub async fn pending_requests(&self, channel: &str, account_id: &str) -> Vec<PendingPairing> {
        let scope = scope_key(channel, account_id);
        let mut requests: Vec<PendingPairing> = self
            .pending
            .read()
            .await
            .values()
            .filter(|req| scope_key(&req.channel, &req.account_id) == scope)
            .cloned()
            .collect();
        requests.sort_by_key(|req| req.requested_at);
        requests
    }

    /// Replies into a session that was dispatched earlier.
    pub async fn reply(&self, session_key: &str, text: &str) -> Result<SendResult> {
        let delivery = self
            .deliveries
            .read()
            .await
            .get(session_key)
            .cloned()
            .ok_or_else(|| WeChatError::NotFound(format!("session {}", session_key)))?;
        Ok(delivery.deliver(text).await)
    }
}

#[async_trait]
impl HostRuntime for BusHost {
    async fn read_allow_from_store(&self, channel: &str, account_id: &str) -> Result<Vec<String>> {
        Ok(self
            .approved
            .read()
            .await
            .get(&scope_key(channel, account_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_pairing_request(
        &self,
        channel: &str,
        account_id: &str,
        sender_id: &str,
        sender_name: Option<&str>,
    ) -> Result<PairingRequest> {
        let key = format!(
            "{}:{}",
            scope_key(channel, account_id),
            normalize_sender_id(sender_id)
        );
        let mut pending = self.pending.write().await;
        if let Some(existing) = pending.get(&key) {
            return Ok(PairingRequest {
                code: existing.code.clone(),
                created: false,
            });
        }

        let code = new_pairing_code();
        pending.insert(
            key,
            PendingPairing {
                code: code.clone(),
                channel: channel.to_string(),
                account_id: account_id.to_string(),
                sender_id: sender_id.to_string(),
                sender_name: sender_name.map(str::to_string),
                requested_at: chrono::Utc::now().timestamp_millis(),
            },
        );
        debug!(account = %account_id, sender = %sender_id, "Pairing request registered");
        Ok(PairingRequest {
            code,
            created: true,
        })
    }

    async fn dispatch_reply(&self, ctx: InboundContext, deliver: ReplyDelivery) -> Result<()> {
        self.deliveries
            .write()
            .await
            .insert(ctx.session_key.clone(), deliver);
        self.bus.publish_inbound(ctx.to_bus_message()).await
    }
}
