//! Channels module - the WeChat robot channel
//!
//! This module provides the channel the host runtime registers to talk to
//! WeChat through a robot backend's REST API.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        WeChatChannel                         │
//! │                                                              │
//! │  MessagePoller ──► InboundDispatcher ──► HostRuntime         │
//! │  (per account)     (mention, policy,     (routing, reply     │
//! │                     pairing, trust)       pipeline)          │
//! │                                              │               │
//! │                         ReplyDelivery ◄──────┘               │
//! │                              │                               │
//! │                       OutboundSender ──► WeChatBackend       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use wechat_channel::bus::MessageBus;
//! use wechat_channel::channels::{ChannelManager, WeChatChannel};
//! use wechat_channel::config::WeChatConfig;
//! use wechat_channel::host::BusHost;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let bus = Arc::new(MessageBus::new());
//! let host = Arc::new(BusHost::new(bus.clone()));
//! let channel = Arc::new(WeChatChannel::new(WeChatConfig::default(), host));
//! let manager = ChannelManager::new(bus, channel.clone());
//!
//! // Unconfigured accounts are skipped; the outbound router still runs.
//! manager.start().await.unwrap();
//! assert!(!channel.is_account_running("default").await);
//! manager.stop().await.unwrap();
//! # })
//! ```

pub mod actions;
pub mod dispatch;
mod manager;
pub mod outbound;
pub mod poller;
pub mod probe;
pub mod status;
pub mod types;
mod wechat;

pub use actions::{run_action, ActionContext, ActionOutput, MessageAction, SendAction};
pub use dispatch::{DispatchHandler, DispatchOutcome, InboundDispatcher, GUEST_SAFETY_PREFIX};
pub use manager::ChannelManager;
pub use outbound::{chunk_text, OutboundSender, ReplyDelivery, SendResult};
pub use poller::{
    ChatType, CycleReport, InboundHandler, MessagePoller, PollerOptions, WeChatInboundMessage,
};
pub use probe::{probe_account, probe_backend, ProbeResult, ProbeStatus};
pub use status::{build_snapshot, AccountRuntime, AccountSnapshot, StatusRegistry};
pub use types::{
    normalize_sender_id, strip_id_prefix, BaseChannelConfig, Channel, ChannelCapabilities,
};
pub use wechat::{WeChatChannel, CHANNEL_NAME};
