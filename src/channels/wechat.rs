//! WeChat robot channel.
//!
//! `WeChatChannel` is the descriptor the host registers: it owns one
//! [`MessagePoller`] per running account, each with its own cancellation
//! signal, and routes outbound bus messages through an [`OutboundSender`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::api::WeChatBackend;
use crate::bus::OutboundMessage;
use crate::config::{list_account_ids, resolve_account, ResolvedAccount, WeChatConfig};
use crate::error::{Result, WeChatError};
use crate::host::HostRuntime;

use super::actions::{MessageAction, SendAction};
use super::dispatch::{DispatchHandler, InboundDispatcher};
use super::outbound::{self, OutboundSender};
use super::poller::{MessagePoller, PollerOptions};
use super::probe::{self, ProbeResult};
use super::status::{build_snapshot, AccountSnapshot, StatusRegistry};
use super::types::{Channel, ChannelCapabilities};

/// Channel name used for routing, sessions and the host's stores.
pub const CHANNEL_NAME: &str = "wechat";

struct AccountHandle {
    poller: MessagePoller,
    cancel_tx: watch::Sender<bool>,
}

pub struct WeChatChannel {
    config: WeChatConfig,
    host: Arc<dyn HostRuntime>,
    status: StatusRegistry,
    accounts: Mutex<HashMap<String, AccountHandle>>,
    backend: Option<Arc<dyn WeChatBackend>>,
    running: Arc<AtomicBool>,
}

impl WeChatChannel {
    pub fn new(config: WeChatConfig, host: Arc<dyn HostRuntime>) -> Self {
        Self {
            config,
            host,
            status: StatusRegistry::new(),
            accounts: Mutex::new(HashMap::new()),
            backend: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uses `backend` for every account instead of building HTTP clients.
    pub fn with_backend(mut self, backend: Arc<dyn WeChatBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities::chat_with_media()
    }

    pub fn status_registry(&self) -> StatusRegistry {
        self.status.clone()
    }

    pub fn account_ids(&self) -> Vec<String> {
        list_account_ids(&self.config)
    }

    /// Resolves an account from the current config. `None` selects the default.
    pub fn account(&self, account_id: Option<&str>) -> ResolvedAccount {
        resolve_account(&self.config, account_id)
    }

    /// Splits outbound text using the account's chunk limit.
    pub fn chunk_text(&self, text: &str, account_id: Option<&str>) -> Vec<String> {
        outbound::chunk_text(text, self.account(account_id).text_chunk_limit())
    }

    fn sender_for(&self, account: &ResolvedAccount) -> Result<OutboundSender> {
        match &self.backend {
            Some(backend) => Ok(OutboundSender::new(account, Arc::clone(backend))),
            None => OutboundSender::for_account(account),
        }
    }

    /// Starts polling for one account. Already-running accounts are left alone.
    pub async fn start_account(&self, account_id: &str) -> Result<()> {
        let account = self.account(Some(account_id));
        if !account.enabled {
            return Err(WeChatError::Config(format!(
                "WeChat account '{}' is disabled",
                account.account_id
            )));
        }
        if self.backend.is_none() && !account.is_configured() {
            return Err(WeChatError::Config(format!(
                "WeChat account '{}' is not configured (token, base_url and robot_id are required)",
                account.account_id
            )));
        }

        let mut accounts = self.accounts.lock().await;
        if let Some(handle) = accounts.get(&account.account_id) {
            if handle.poller.is_running() {
                return Ok(());
            }
        }

        let sender = self.sender_for(&account)?;
        let dispatcher = InboundDispatcher::new(account.clone(), Arc::clone(&self.host), sender);
        let handler = Arc::new(DispatchHandler::new(dispatcher, self.status.clone()));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let poller = match &self.backend {
            Some(backend) => MessagePoller::with_backend(
                &account.account_id,
                account.polling.clone(),
                Arc::clone(backend),
                handler,
                cancel_rx,
            ),
            None => MessagePoller::new(PollerOptions::from_account(&account)?, handler, cancel_rx)?,
        };
        poller.start().await?;
        self.status.mark_started(&account.account_id);

        accounts.insert(account.account_id.clone(), AccountHandle { poller, cancel_tx });
        Ok(())
    }

    /// Stops one account's poller. Unknown or stopped accounts are a no-op.
    pub async fn stop_account(&self, account_id: &str) {
        let account_id = self.account(Some(account_id)).account_id;
        let handle = self.accounts.lock().await.remove(&account_id);
        if let Some(handle) = handle {
            let _ = handle.cancel_tx.send(true);
            handle.poller.stop();
            self.status.mark_stopped(&account_id);
            info!(account = %account_id, "WeChat account stopped");
        }
    }

    pub async fn is_account_running(&self, account_id: &str) -> bool {
        let account_id = self.account(Some(account_id)).account_id;
        self.accounts
            .lock()
            .await
            .get(&account_id)
            .is_some_and(|handle| handle.poller.is_running())
    }

    pub async fn probe_account(
        &self,
        account_id: Option<&str>,
        timeout: Option<Duration>,
    ) -> ProbeResult {
        let account = self.account(account_id);
        match &self.backend {
            Some(backend) => {
                let timeout = timeout
                    .unwrap_or(Duration::from_millis(probe::DEFAULT_PROBE_TIMEOUT_MS));
                probe::probe_backend(backend.as_ref(), timeout).await
            }
            None => probe::probe_account(&account, timeout).await,
        }
    }

    /// Snapshot of an account, optionally probing the backend first.
    pub async fn status_snapshot(
        &self,
        account_id: Option<&str>,
        with_probe: bool,
    ) -> AccountSnapshot {
        let account = self.account(account_id);
        let probe = if with_probe {
            Some(self.probe_account(Some(&account.account_id), None).await)
        } else {
            None
        };
        build_snapshot(&account, self.status.get(&account.account_id), probe)
    }

    /// Actions the host's agent may invoke on this channel.
    pub fn actions(&self) -> Vec<Arc<dyn MessageAction>> {
        let mut send = SendAction::new(self.config.clone(), self.status.clone());
        if let Some(backend) = &self.backend {
            send = send.with_backend(Arc::clone(backend));
        }
        vec![Arc::new(send)]
    }
}

#[async_trait]
impl Channel for WeChatChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("WeChat channel already running");
            return Ok(());
        }

        let mut started = 0;
        for account_id in self.account_ids() {
            let account = self.account(Some(&account_id));
            if !account.enabled {
                info!(account = %account_id, "WeChat account disabled, skipping");
                continue;
            }
            if self.backend.is_none() && !account.is_configured() {
                warn!(account = %account_id, "WeChat account not configured, skipping");
                continue;
            }
            match self.start_account(&account_id).await {
                Ok(()) => started += 1,
                Err(e) => {
                    error!(account = %account_id, "Failed to start WeChat account: {}", e);
                    self.status.record_error(&account_id, &e.to_string());
                }
            }
        }

        info!(accounts = started, "WeChat channel started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let account_ids: Vec<String> = self.accounts.lock().await.keys().cloned().collect();
        for account_id in account_ids {
            self.stop_account(&account_id).await;
        }
        self.running.store(false, Ordering::SeqCst);
        info!("WeChat channel stopped");
        Ok(())
    }

    async fn send(&self, msg: OutboundMessage) -> Result<()> {
        let account = self.account(msg.account_id.as_deref());
        let sender = self.sender_for(&account)?;
        let result = sender
            .send_message(&msg.chat_id, &msg.content, msg.media.as_ref())
            .await;
        if !result.ok {
            let reason = result.error.unwrap_or_else(|| "unknown error".to_string());
            self.status.record_error(&account.account_id, &reason);
            return Err(WeChatError::Channel(format!(
                "WeChat send to {} failed: {}",
                msg.chat_id, reason
            )));
        }
        self.status.record_outbound(&account.account_id);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
