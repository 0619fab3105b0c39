//! Inbound message poller.
//!
//! The robot backend only offers paginated chat history, so each account runs
//! one poller task that turns history pages into a stream of
//! [`WeChatInboundMessage`]s:
//!
//! - every cycle resolves the contact set (explicit list, or friends then chat
//!   rooms up to a cap), fetches page 1 of each contact's history and hands new
//!   text messages to an [`InboundHandler`] in chronological order
//! - a per-contact cursor (seconds) skips anything at or before the last
//!   processed page; cursors only move forward
//! - a seen-set of `"{contact}:{message}"` keys gives at-most-once delivery and
//!   is trimmed by insertion order once it grows past [`SEEN_HIGH_WATER`]
//!
//! Cycles never overlap: the next sleep starts only after the previous cycle
//! finished. Failures are per contact and never stop the loop.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::api::{
    is_chat_room_id, ChatHistoryItem, ChatHistoryQuery, RobotInfo, WeChatApiClient,
    WeChatBackend, MSG_TYPE_TEXT,
};
use crate::config::{PollingConfig, ResolvedAccount};
use crate::error::{Result, WeChatError};

/// History page size requested per contact per cycle.
pub const HISTORY_PAGE_SIZE: u32 = 20;

/// Seen-set size that triggers eviction.
pub const SEEN_HIGH_WATER: usize = 10_000;

/// Number of oldest seen keys dropped on eviction.
pub const SEEN_EVICT_COUNT: usize = 5_000;

/// Marker the backend renders into `display_full_content` when the robot is @-mentioned.
pub const MENTION_MARKER: &str = "在群聊中@了你";

/// Kind of conversation a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
}

impl ChatType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }
}

/// A normalized inbound message produced by the poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeChatInboundMessage {
    /// Identity key, `"{contact_id}:{message_id}"`
    pub id: String,
    /// Backend message id
    pub message_id: String,
    /// Origin: chat-room id for groups, sender wxid for direct chats
    pub from: String,
    /// WeChat id of the sender
    pub sender_id: String,
    pub sender_name: Option<String>,
    /// Recipient wxid
    pub to: String,
    pub text: String,
    pub timestamp_ms: i64,
    pub chat_type: ChatType,
    /// Contact the message was polled from
    pub chat_id: String,
    pub mentioned: bool,
    pub recalled: bool,
    pub msg_type: i32,
    pub attachment_url: Option<String>,
}

/// Receiver of poller output.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Called once per new message, awaited before the next one.
    ///
    /// An error aborts the rest of that contact's page for this cycle; the
    /// contact's cursor is left untouched.
    async fn on_message(&self, msg: WeChatInboundMessage) -> Result<()>;

    /// Called when a whole cycle failed (a panic inside the cycle).
    async fn on_error(&self, _error: WeChatError) {}

    /// Called after every completed cycle.
    async fn on_cycle(&self, _report: &CycleReport) {}
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub contacts_polled: usize,
    pub contacts_failed: usize,
    pub messages_delivered: usize,
    pub seen_evicted: usize,
}

/// Connection settings for a poller built on the HTTP client.
#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub base_url: String,
    pub token: String,
    pub robot_id: i64,
    pub account_id: String,
    pub polling: PollingConfig,
}

impl PollerOptions {
    pub fn from_account(account: &ResolvedAccount) -> Result<Self> {
        let robot_id = account.robot_id.ok_or_else(|| {
            WeChatError::Config(format!(
                "WeChat robot_id is not configured for account '{}'",
                account.account_id
            ))
        })?;
        Ok(Self {
            base_url: account.base_url.clone(),
            token: account.token.clone(),
            robot_id,
            account_id: account.account_id.clone(),
            polling: account.polling.clone(),
        })
    }
}

/// Insertion-ordered set of delivered identity keys.
#[derive(Debug, Default)]
pub struct SeenSet {
    order: VecDeque<String>,
    keys: HashSet<String>,
}

impl SeenSet {
    /// Inserts a key; returns `false` if it was already present.
    pub fn insert(&mut self, key: String) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        self.keys.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drops the `evict` oldest keys once the set holds more than `high_water`.
    /// Returns how many keys were removed.
    pub fn trim(&mut self, high_water: usize, evict: usize) -> usize {
        if self.order.len() <= high_water {
            return 0;
        }
        let count = evict.min(self.order.len());
        for key in self.order.drain(..count) {
            self.keys.remove(&key);
        }
        count
    }
}

struct PollerState {
    cursors: HashMap<String, i64>,
    seen: SeenSet,
    robot: Option<RobotInfo>,
    /// Poller start time (seconds); default cursor for contacts seen later
    started_at: i64,
}

struct PollerInner {
    account_id: String,
    polling: PollingConfig,
    backend: Arc<dyn WeChatBackend>,
    handler: Arc<dyn InboundHandler>,
    cancel: watch::Receiver<bool>,
    running: AtomicBool,
    generation: AtomicU64,
    stop_notify: Notify,
    state: Mutex<PollerState>,
}

/// Per-account polling loop.
pub struct MessagePoller {
    inner: Arc<PollerInner>,
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

impl MessagePoller {
    /// Creates a poller talking to the backend over HTTP.
    pub fn new(
        options: PollerOptions,
        handler: Arc<dyn InboundHandler>,
        cancel: watch::Receiver<bool>,
    ) -> Result<Self> {
        let client = WeChatApiClient::new(&options.base_url, &options.token, options.robot_id)?;
        Ok(Self::with_backend(
            &options.account_id,
            options.polling,
            Arc::new(client),
            handler,
            cancel,
        ))
    }

    /// Creates a poller over an existing backend.
    pub fn with_backend(
        account_id: &str,
        polling: PollingConfig,
        backend: Arc<dyn WeChatBackend>,
        handler: Arc<dyn InboundHandler>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                account_id: account_id.to_string(),
                polling,
                backend,
                handler,
                cancel,
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                stop_notify: Notify::new(),
                state: Mutex::new(PollerState {
                    cursors: HashMap::new(),
                    seen: SeenSet::default(),
                    robot: None,
                    started_at: now_secs(),
                }),
            }),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.inner.account_id
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Starts polling. No-op if already running or if the cancellation signal
    /// has already fired.
    ///
    /// Fetches the robot identity and seeds every initial contact's cursor to
    /// now before spawning the loop; the first cycle runs one interval later.
    pub async fn start(&self) -> Result<()> {
        if *self.inner.cancel.borrow() {
            info!(account = %self.inner.account_id, "WeChat poller cancelled before start");
            return Ok(());
        }
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!(account = %self.inner.account_id, "WeChat poller already running");
            return Ok(());
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.inner.bootstrap().await;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_loop(generation).await;
        });

        info!(
            account = %self.inner.account_id,
            interval_ms = self.inner.polling.interval_ms(),
            "WeChat poller started"
        );
        Ok(())
    }

    /// Stops the loop and wakes a pending sleep. Safe to call repeatedly.
    ///
    /// A cycle already in flight runs to completion.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            info!(account = %self.inner.account_id, "WeChat poller stopped");
        }
        self.inner.stop_notify.notify_waiters();
    }

    /// Runs one cycle immediately, serialized with the background loop.
    pub async fn poll_once(&self) -> CycleReport {
        self.inner.run_cycle().await
    }

    /// Fetches the robot identity and seeds cursors without starting the loop.
    pub async fn bootstrap(&self) {
        self.inner.bootstrap().await;
    }

    /// Sets a contact's cursor. Cursors never move backwards.
    pub async fn seed_cursor(&self, contact_id: &str, secs: i64) {
        let mut state = self.inner.state.lock().await;
        advance_cursor(&mut state.cursors, contact_id, secs);
    }

    pub async fn cursor(&self, contact_id: &str) -> Option<i64> {
        self.inner.state.lock().await.cursors.get(contact_id).copied()
    }

    pub async fn seen_count(&self) -> usize {
        self.inner.state.lock().await.seen.len()
    }

    pub async fn robot_identity(&self) -> Option<RobotInfo> {
        self.inner.state.lock().await.robot.clone()
    }
}

impl Drop for MessagePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn advance_cursor(cursors: &mut HashMap<String, i64>, contact_id: &str, secs: i64) {
    let cursor = cursors.entry(contact_id.to_string()).or_insert(secs);
    if secs > *cursor {
        *cursor = secs;
    }
}

impl PollerInner {
    fn should_continue(&self, generation: u64) -> bool {
        if *self.cancel.borrow() {
            if self.running.swap(false, Ordering::SeqCst) {
                info!(account = %self.account_id, "WeChat poller cancelled");
            }
            return false;
        }
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn bootstrap(&self) {
        let robot = match self.backend.robot_info().await {
            Ok(info) => {
                debug!(account = %self.account_id, wxid = %info.wechat_id, "WeChat robot identity loaded");
                Some(info)
            }
            Err(e) => {
                warn!(account = %self.account_id, "WeChat robot identity unavailable: {}", e);
                None
            }
        };

        let contacts = self.resolve_contacts().await;
        let now = now_secs();

        let mut state = self.state.lock().await;
        if robot.is_some() {
            state.robot = robot;
        }
        state.started_at = now;
        for contact in &contacts {
            advance_cursor(&mut state.cursors, contact, now);
        }
        debug!(account = %self.account_id, contacts = contacts.len(), "WeChat cursors seeded");
    }

    async fn resolve_contacts(&self) -> Vec<String> {
        if !self.polling.contact_ids.is_empty() {
            return self.polling.contact_ids.clone();
        }
        if !self.polling.poll_all_contacts {
            return Vec::new();
        }

        let max = self.polling.max_poll_contacts();
        let mut contacts: Vec<String> = Vec::new();

        match self.backend.friends().await {
            Ok(friends) => contacts.extend(
                friends
                    .into_iter()
                    .map(|c| c.wechat_id)
                    .filter(|id| !id.is_empty())
                    .take(max),
            ),
            Err(e) => {
                warn!(account = %self.account_id, "WeChat friend list unavailable: {}", e);
                return contacts;
            }
        }

        if contacts.len() < max {
            match self.backend.chat_rooms().await {
                Ok(rooms) => {
                    let remaining = max - contacts.len();
                    contacts.extend(
                        rooms
                            .into_iter()
                            .map(|c| c.wechat_id)
                            .filter(|id| !id.is_empty())
                            .take(remaining),
                    );
                }
                Err(e) => {
                    warn!(account = %self.account_id, "WeChat chat-room list unavailable: {}", e);
                }
            }
        }

        contacts
    }

    async fn run_loop(self: Arc<Self>, generation: u64) {
        let mut cancel = self.cancel.clone();
        let mut cancel_open = true;
        let interval = Duration::from_millis(self.polling.interval_ms());

        loop {
            if !self.should_continue(generation) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.stop_notify.notified() => continue,
                changed = cancel.changed(), if cancel_open => {
                    if changed.is_err() {
                        cancel_open = false;
                    }
                    continue;
                }
            }

            if !self.should_continue(generation) {
                break;
            }

            match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(report) => {
                    debug!(
                        account = %self.account_id,
                        contacts = report.contacts_polled,
                        failed = report.contacts_failed,
                        delivered = report.messages_delivered,
                        "WeChat poll cycle finished"
                    );
                    self.handler.on_cycle(&report).await;
                }
                Err(panic) => {
                    let detail = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(account = %self.account_id, "WeChat poll cycle panicked: {}", detail);
                    self.handler
                        .on_error(WeChatError::Channel(format!(
                            "poll cycle panicked: {}",
                            detail
                        )))
                        .await;
                }
            }
        }

        debug!(account = %self.account_id, generation, "WeChat poller loop exited");
    }

    async fn run_cycle(&self) -> CycleReport {
        let mut state = self.state.lock().await;
        let contacts = self.resolve_contacts().await;
        let mut report = CycleReport::default();

        for contact in &contacts {
            report.contacts_polled += 1;
            match self.poll_contact(&mut state, contact).await {
                Ok(delivered) => report.messages_delivered += delivered,
                Err(e) => {
                    report.contacts_failed += 1;
                    warn!(account = %self.account_id, contact = %contact, "WeChat poll failed: {}", e);
                }
            }
        }

        report.seen_evicted = state.seen.trim(SEEN_HIGH_WATER, SEEN_EVICT_COUNT);
        if report.seen_evicted > 0 {
            debug!(account = %self.account_id, evicted = report.seen_evicted, "WeChat seen-set trimmed");
        }
        report
    }

    async fn poll_contact(&self, state: &mut PollerState, contact: &str) -> Result<usize> {
        let page = self
            .backend
            .chat_history(&ChatHistoryQuery::latest(contact, HISTORY_PAGE_SIZE))
            .await?;
        let cursor = state
            .cursors
            .get(contact)
            .copied()
            .unwrap_or(state.started_at);

        let mut fresh: Vec<&ChatHistoryItem> = Vec::new();
        for item in &page.items {
            if !state
                .seen
                .insert(format!("{}:{}", contact, item.message_key()))
            {
                continue;
            }
            if item.created_at <= cursor {
                continue;
            }
            fresh.push(item);
        }
        fresh.reverse();

        let robot_wxid = state.robot.as_ref().map(|r| r.wechat_id.as_str());
        let mut delivered = 0;
        for item in fresh {
            let sender = sender_of(item);
            if item.is_robot
                || robot_wxid.is_some_and(|wxid| !wxid.is_empty() && wxid == sender)
                || item.is_recalled
                || item.msg_type != MSG_TYPE_TEXT
            {
                continue;
            }
            let msg = to_inbound(contact, item, state.robot.as_ref());
            self.handler.on_message(msg).await?;
            delivered += 1;
        }

        if let Some(newest) = page.items.iter().map(|item| item.created_at).max() {
            advance_cursor(&mut state.cursors, contact, newest);
        }
        Ok(delivered)
    }
}

fn sender_of(item: &ChatHistoryItem) -> &str {
    if item.sender_wxid.is_empty() {
        &item.from_wxid
    } else {
        &item.sender_wxid
    }
}

/// Converts a history item polled from `contact_id` into an inbound message.
pub fn to_inbound(
    contact_id: &str,
    item: &ChatHistoryItem,
    robot: Option<&RobotInfo>,
) -> WeChatInboundMessage {
    let is_group = item.is_chat_room || is_chat_room_id(contact_id);
    let sender = sender_of(item).to_string();

    let nickname_mention = robot
        .map(|r| r.nickname.trim())
        .filter(|nick| !nick.is_empty())
        .is_some_and(|nick| item.content.contains(&format!("@{}", nick)));
    let mentioned =
        item.is_at_me || item.display_full_content.contains(MENTION_MARKER) || nickname_mention;

    let text = if item.content.is_empty() {
        item.display_full_content.clone()
    } else {
        item.content.clone()
    };

    let to = if item.to_wxid.is_empty() {
        robot.map(|r| r.wechat_id.clone()).unwrap_or_default()
    } else {
        item.to_wxid.clone()
    };

    WeChatInboundMessage {
        id: format!("{}:{}", contact_id, item.message_key()),
        message_id: item.message_key().to_string(),
        from: if is_group {
            contact_id.to_string()
        } else {
            sender.clone()
        },
        sender_id: sender,
        sender_name: item.sender_nickname.clone().filter(|n| !n.is_empty()),
        to,
        text,
        timestamp_ms: item.created_at.saturating_mul(1000),
        chat_type: if is_group {
            ChatType::Group
        } else {
            ChatType::Direct
        },
        chat_id: contact_id.to_string(),
        mentioned,
        recalled: item.is_recalled,
        msg_type: item.msg_type,
        attachment_url: item.attachment_url.clone(),
    }
}
