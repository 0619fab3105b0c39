//! Per-account runtime status and snapshot building.
//!
//! Pollers and senders record lifecycle events into a shared
//! [`StatusRegistry`]; [`build_snapshot`] combines them with the resolved
//! account for display.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{AccessPolicy, ResolvedAccount, TokenSource};

use super::poller::CycleReport;
use super::probe::ProbeResult;

/// Mutable runtime facts about one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountRuntime {
    pub running: bool,
    pub last_start_at: Option<i64>,
    pub last_stop_at: Option<i64>,
    pub last_poll_at: Option<i64>,
    pub last_inbound_at: Option<i64>,
    pub last_outbound_at: Option<i64>,
    pub last_error: Option<String>,
    pub polls: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
}

/// Shared registry of account runtimes, keyed by account id.
///
/// # Example
/// ```
/// use wechat_channel::channels::StatusRegistry;
///
/// let registry = StatusRegistry::new();
/// registry.mark_started("default");
/// assert!(registry.get("default").running);
/// ```
#[derive(Clone, Default)]
pub struct StatusRegistry {
    accounts: Arc<RwLock<HashMap<String, AccountRuntime>>>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, account_id: &str, apply: impl FnOnce(&mut AccountRuntime)) {
        let mut accounts = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        apply(accounts.entry(account_id.to_string()).or_default());
    }

    /// Current runtime for an account (default when never recorded).
    pub fn get(&self, account_id: &str) -> AccountRuntime {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn mark_started(&self, account_id: &str) {
        self.update(account_id, |rt| {
            rt.running = true;
            rt.last_start_at = Some(now_ms());
            rt.last_error = None;
        });
    }

    pub fn mark_stopped(&self, account_id: &str) {
        self.update(account_id, |rt| {
            rt.running = false;
            rt.last_stop_at = Some(now_ms());
        });
    }

    pub fn record_cycle(&self, account_id: &str, report: &CycleReport) {
        self.update(account_id, |rt| {
            rt.polls += 1;
            rt.last_poll_at = Some(now_ms());
            if report.contacts_failed > 0 {
                rt.last_error = Some(format!(
                    "{} of {} contacts failed to poll",
                    report.contacts_failed, report.contacts_polled
                ));
            }
        });
    }

    pub fn record_inbound(&self, account_id: &str) {
        self.update(account_id, |rt| {
            rt.messages_received += 1;
            rt.last_inbound_at = Some(now_ms());
        });
    }

    pub fn record_outbound(&self, account_id: &str) {
        self.update(account_id, |rt| {
            rt.messages_sent += 1;
            rt.last_outbound_at = Some(now_ms());
        });
    }

    pub fn record_error(&self, account_id: &str, error: &str) {
        self.update(account_id, |rt| rt.last_error = Some(error.to_string()));
    }
}

/// Display snapshot of one account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub name: Option<String>,
    pub enabled: bool,
    pub configured: bool,
    pub base_url: String,
    pub robot_id: Option<i64>,
    pub token_source: TokenSource,
    pub dm_policy: AccessPolicy,
    pub group_policy: AccessPolicy,
    pub require_mention: bool,
    pub allow_from: Vec<String>,
    #[serde(flatten)]
    pub runtime: AccountRuntime,
    pub probe: Option<ProbeResult>,
}

/// Combines a resolved account, its runtime and an optional probe result.
pub fn build_snapshot(
    account: &ResolvedAccount,
    runtime: AccountRuntime,
    probe: Option<ProbeResult>,
) -> AccountSnapshot {
    AccountSnapshot {
        account_id: account.account_id.clone(),
        name: account.name.clone(),
        enabled: account.enabled,
        configured: account.is_configured(),
        base_url: account.base_url.clone(),
        robot_id: account.robot_id,
        token_source: account.token_source,
        dm_policy: account.dm_policy(),
        group_policy: account.group_policy(),
        require_mention: account.require_mention(),
        allow_from: account.allow_from().to_vec(),
        runtime,
        probe,
    }
}
