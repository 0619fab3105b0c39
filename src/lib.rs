//! wechat-channel - WeChat robot channel adapter
//!
//! Lets a chat-bot host send and receive WeChat messages through a robot
//! backend's REST API. Inbound messages are discovered by polling chat
//! history; accepted ones are handed to the host through [`host::HostRuntime`],
//! and replies go back out through [`channels::OutboundSender`].

pub mod api;
pub mod bus;
pub mod channels;
pub mod config;
pub mod error;
pub mod host;
pub mod utils;

pub use api::{WeChatApiClient, WeChatBackend};
pub use bus::{InboundMessage, MediaAttachment, MediaType, MessageBus, OutboundMessage};
pub use channels::{
    ChannelManager, InboundDispatcher, MessagePoller, OutboundSender, WeChatChannel,
    WeChatInboundMessage,
};
pub use config::{Config, ResolvedAccount, WeChatConfig};
pub use error::{Result, WeChatError};
pub use host::{BusHost, HostRuntime, InboundContext, TrustTier};
