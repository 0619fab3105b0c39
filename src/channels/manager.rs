//! Outbound routing between the message bus and the WeChat channel.
//!
//! The host publishes replies to the bus outbound queue. `ChannelManager`
//! owns the channel for a runner, starts and stops it, and drains that queue
//! into [`Channel::send`], where the message's `account_id` picks the robot
//! account that delivers it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{MessageBus, OutboundMessage};
use crate::error::Result;

use super::Channel;

const ROUTER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs one channel and routes bus replies to it.
///
/// ```text
///   poller ─► dispatcher ─► host ─► MessageBus (inbound)
///                                        │
///   WeChatChannel::send ◄── router ◄── MessageBus (outbound)
/// ```
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use wechat_channel::bus::MessageBus;
/// use wechat_channel::channels::{Channel, ChannelManager, WeChatChannel};
/// use wechat_channel::config::WeChatConfig;
/// use wechat_channel::host::BusHost;
///
/// let bus = Arc::new(MessageBus::new());
/// let host = Arc::new(BusHost::new(bus.clone()));
/// let channel = Arc::new(WeChatChannel::new(WeChatConfig::default(), host));
/// let manager = ChannelManager::new(bus, channel);
/// assert_eq!(manager.channel().name(), "wechat");
/// ```
pub struct ChannelManager {
    channel: Arc<dyn Channel>,
    bus: Arc<MessageBus>,
    shutdown_tx: watch::Sender<bool>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelManager {
    pub fn new(bus: Arc<MessageBus>, channel: Arc<dyn Channel>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            channel,
            bus,
            shutdown_tx,
            router: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Starts the channel's accounts, then the outbound router.
    ///
    /// Calling it again while the router is alive is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut router = self.router.lock().await;
        if router.as_ref().is_some_and(|handle| !handle.is_finished()) {
            warn!("Outbound router already running, skipping start");
            return Ok(());
        }

        info!(channel = %self.channel.name(), "Starting channel");
        self.channel.start().await?;

        self.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let bus = Arc::clone(&self.bus);
        let channel = Arc::clone(&self.channel);
        *router = Some(tokio::spawn(route_outbound(bus, channel, shutdown_rx)));
        Ok(())
    }

    /// Stops the router, then every account of the channel.
    pub async fn stop(&self) -> Result<()> {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.router.lock().await.take() {
            match tokio::time::timeout(ROUTER_STOP_TIMEOUT, handle).await {
                Ok(_) => debug!("Outbound router stopped cleanly"),
                Err(_) => warn!("Outbound router did not stop within timeout"),
            }
        }
        self.channel.stop().await
    }
}

/// Drains the outbound queue into `channel` until shutdown or bus close.
///
/// Messages addressed to another channel are dropped. A failed send is
/// logged and does not stop the router.
async fn route_outbound(
    bus: Arc<MessageBus>,
    channel: Arc<dyn Channel>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(channel = %channel.name(), "Outbound router started");
    loop {
        let msg = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            msg = bus.consume_outbound() => msg,
        };
        let Some(msg) = msg else {
            info!("Outbound queue closed");
            break;
        };
        deliver(channel.as_ref(), msg).await;
    }
    info!(channel = %channel.name(), "Outbound router stopped");
}

async fn deliver(channel: &dyn Channel, msg: OutboundMessage) {
    if msg.channel != channel.name() {
        warn!(
            channel = %msg.channel,
            chat = %msg.chat_id,
            "Dropping outbound message for another channel"
        );
        return;
    }
    let account = msg.account_id.clone().unwrap_or_else(|| "default".to_string());
    let chat = msg.chat_id.clone();
    if let Err(e) = channel.send(msg).await {
        error!(account = %account, chat = %chat, "Outbound delivery failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WeChatError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// A channel that records what it is asked to send
    #[derive(Default)]
    struct RecordingChannel {
        running: AtomicBool,
        starts: AtomicUsize,
        fail_chat: Option<String>,
        sent: std::sync::Mutex<Vec<OutboundMessage>>,
    }

    impl RecordingChannel {
        fn sent(&self) -> Vec<(Option<String>, String, String)> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|m| (m.account_id.clone(), m.chat_id.clone(), m.content.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "wechat"
        }

        async fn start(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, msg: OutboundMessage) -> Result<()> {
            if self.fail_chat.as_deref() == Some(msg.chat_id.as_str()) {
                return Err(WeChatError::Channel("backend rejected".into()));
            }
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    async fn wait_for_sent(channel: &RecordingChannel, count: usize) {
        for _ in 0..50 {
            if channel.sent.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_start_stop_toggles_channel() {
        let channel = Arc::new(RecordingChannel::default());
        let manager = ChannelManager::new(Arc::new(MessageBus::new()), channel.clone());

        manager.start().await.unwrap();
        assert!(channel.is_running());
        manager.stop().await.unwrap();
        assert!(!channel.is_running());
    }

    #[tokio::test]
    async fn test_double_start_starts_channel_once() {
        let channel = Arc::new(RecordingChannel::default());
        let manager = ChannelManager::new(Arc::new(MessageBus::new()), channel.clone());

        manager.start().await.unwrap();
        manager.start().await.unwrap();
        assert_eq!(channel.starts.load(Ordering::SeqCst), 1);

        manager.stop().await.unwrap();
        manager.start().await.unwrap();
        assert_eq!(channel.starts.load(Ordering::SeqCst), 2);
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_replies_routed_with_account() {
        let bus = Arc::new(MessageBus::new());
        let channel = Arc::new(RecordingChannel::default());
        let manager = ChannelManager::new(bus.clone(), channel.clone());
        manager.start().await.unwrap();

        bus.publish_outbound(OutboundMessage::new("telegram", "wxid_a", "lost"))
            .await
            .unwrap();
        bus.publish_outbound(
            OutboundMessage::new("wechat", "wxid_a", "hi").with_account("work"),
        )
        .await
        .unwrap();
        bus.publish_outbound(OutboundMessage::new("wechat", "wxid_b", "hey"))
            .await
            .unwrap();

        wait_for_sent(&channel, 2).await;
        manager.stop().await.unwrap();

        assert_eq!(
            channel.sent(),
            vec![
                (Some("work".to_string()), "wxid_a".to_string(), "hi".to_string()),
                (None, "wxid_b".to_string(), "hey".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_send_keeps_router_alive() {
        let bus = Arc::new(MessageBus::new());
        let channel = Arc::new(RecordingChannel {
            fail_chat: Some("wxid_gone".into()),
            ..Default::default()
        });
        let manager = ChannelManager::new(bus.clone(), channel.clone());
        manager.start().await.unwrap();

        bus.publish_outbound(OutboundMessage::new("wechat", "wxid_gone", "first"))
            .await
            .unwrap();
        bus.publish_outbound(OutboundMessage::new("wechat", "wxid_a", "second"))
            .await
            .unwrap();

        wait_for_sent(&channel, 1).await;
        manager.stop().await.unwrap();
        assert_eq!(channel.sent().len(), 1);
        assert_eq!(channel.sent()[0].2, "second");
    }
}
