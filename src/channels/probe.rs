//! One-shot connection probe.

use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::api::{WeChatApiClient, WeChatBackend};
use crate::config::ResolvedAccount;

/// Default probe timeout; shorter than data calls.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// Backend reachable, robot logged in
    Online,
    /// Backend reachable, robot not logged in
    Offline,
    /// Backend unreachable, erroring or not configured
    Unreachable,
}

impl ProbeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unreachable => "unreachable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    /// `true` only when the robot is online
    pub ok: bool,
    pub status: ProbeStatus,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl ProbeResult {
    fn unreachable(error: String, elapsed_ms: u64) -> Self {
        Self {
            ok: false,
            status: ProbeStatus::Unreachable,
            error: Some(error),
            elapsed_ms,
        }
    }
}

/// Queries the robot state once, bounded by `timeout`.
pub async fn probe_backend(backend: &dyn WeChatBackend, timeout: Duration) -> ProbeResult {
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, backend.robot_state()).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(state)) if state.online => ProbeResult {
            ok: true,
            status: ProbeStatus::Online,
            error: None,
            elapsed_ms,
        },
        Ok(Ok(state)) => ProbeResult {
            ok: false,
            status: ProbeStatus::Offline,
            error: state.status.map(|s| format!("robot is offline ({})", s)),
            elapsed_ms,
        },
        Ok(Err(e)) => ProbeResult::unreachable(e.to_string(), elapsed_ms),
        Err(_) => ProbeResult::unreachable(
            format!("probe timed out after {}ms", timeout.as_millis()),
            elapsed_ms,
        ),
    }
}

/// Probes an account; unconfigured accounts come back unreachable with a reason.
pub async fn probe_account(account: &ResolvedAccount, timeout: Option<Duration>) -> ProbeResult {
    let timeout = timeout.unwrap_or(Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS));

    let mut missing = Vec::new();
    if account.token.trim().is_empty() {
        missing.push("token");
    }
    if account.base_url.trim().is_empty() {
        missing.push("base_url");
    }
    if account.robot_id.is_none() {
        missing.push("robot_id");
    }
    if !missing.is_empty() {
        return ProbeResult::unreachable(
            format!(
                "WeChat account '{}' is missing {}",
                account.account_id,
                missing.join(", ")
            ),
            0,
        );
    }

    let client = match WeChatApiClient::for_account(account) {
        Ok(client) => client.with_timeout(timeout),
        Err(e) => return ProbeResult::unreachable(e.to_string(), 0),
    };
    let result = probe_backend(&client, timeout).await;
    debug!(
        account = %account.account_id,
        status = result.status.as_str(),
        elapsed_ms = result.elapsed_ms,
        "WeChat probe finished"
    );
    result
}
