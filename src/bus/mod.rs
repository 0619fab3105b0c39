//! Message Bus Module
//!
//! The `MessageBus` carries inbound messages (from the WeChat channel to the
//! host's reply pipeline) and outbound replies (from the host back to the
//! channel).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ WeChat poller│────>│  MessageBus │────>│    Host     │
//! │ + dispatcher │     │  (inbound)  │     │  pipeline   │
//! └──────────────┘     └─────────────┘     └─────────────┘
//!                             │
//!                             │ outbound
//!                             ▼
//! ┌──────────────┐     ┌─────────────┐
//! │ChannelManager│<────│  MessageBus │
//! │  -> WeChat   │     │  (outbound) │
//! └──────────────┘     └─────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use wechat_channel::bus::{MessageBus, InboundMessage};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = MessageBus::new();
//!
//!     let msg = InboundMessage::new("wechat", "default", "wxid_a", "wxid_a", "Hello");
//!     bus.publish_inbound(msg).await.unwrap();
//!
//!     if let Some(received) = bus.consume_inbound().await {
//!         println!("Received: {}", received.content);
//!     }
//! }
//! ```

pub mod message;

pub use message::{InboundMessage, MediaAttachment, MediaType, OutboundMessage};

use crate::error::{Result, WeChatError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Default buffer size for message channels
const DEFAULT_BUFFER_SIZE: usize = 100;

/// The message bus between the channel and the host.
///
/// Both directions use bounded tokio MPSC queues; receivers are shared behind
/// a mutex so that clones of the bus can consume.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Arc<Mutex<mpsc::Receiver<InboundMessage>>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Arc<Mutex<mpsc::Receiver<OutboundMessage>>>,
}

impl MessageBus {
    /// Creates a new `MessageBus` with default buffer sizes (100 messages).
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Creates a new `MessageBus` with a custom buffer size.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer_size);

        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
        }
    }

    /// Publishes an inbound message to the bus.
    ///
    /// # Errors
    /// Returns `WeChatError::BusClosed` if the receiver has been dropped.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        self.inbound_tx
            .send(msg)
            .await
            .map_err(|_| WeChatError::BusClosed)
    }

    /// Consumes the next inbound message, or `None` once all senders are dropped.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Publishes an outbound message to the bus.
    ///
    /// # Errors
    /// Returns `WeChatError::BusClosed` if the receiver has been dropped.
    ///
    /// # Example
    /// ```
    /// use wechat_channel::bus::{MessageBus, OutboundMessage};
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let bus = MessageBus::new();
    ///     let msg = OutboundMessage::new("wechat", "wxid_a", "Hello back!");
    ///     bus.publish_outbound(msg).await.unwrap();
    /// }
    /// ```
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> Result<()> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| WeChatError::BusClosed)
    }

    /// Consumes the next outbound message, or `None` once all senders are dropped.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        self.outbound_rx.lock().await.recv().await
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MessageBus {
    /// Clones the message bus, sharing the same underlying channels.
    fn clone(&self) -> Self {
        Self {
            inbound_tx: self.inbound_tx.clone(),
            inbound_rx: Arc::clone(&self.inbound_rx),
            outbound_tx: self.outbound_tx.clone(),
            outbound_rx: Arc::clone(&self.outbound_rx),
        }
    }
}
