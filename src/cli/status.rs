//! Status command handler.

use std::sync::Arc;

use anyhow::Result;

use wechat_channel::bus::MessageBus;
use wechat_channel::channels::{AccountSnapshot, WeChatChannel};
use wechat_channel::config::Config;
use wechat_channel::host::BusHost;

use super::common::yes_no;

/// Print a snapshot of every configured account.
pub(crate) async fn cmd_status(config: &Config, probe: bool, json: bool) -> Result<()> {
    let host = Arc::new(BusHost::new(Arc::new(MessageBus::new())));
    let channel = WeChatChannel::new(config.wechat.clone(), host);

    let mut snapshots = Vec::new();
    for account_id in channel.account_ids() {
        let configured = channel.account(Some(&account_id)).is_configured();
        snapshots.push(
            channel
                .status_snapshot(Some(&account_id), probe && configured)
                .await,
        );
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(());
    }

    println!("WeChat Accounts");
    println!("===============");
    for snapshot in &snapshots {
        print_snapshot(snapshot);
    }
    Ok(())
}

fn print_snapshot(snapshot: &AccountSnapshot) {
    println!();
    match &snapshot.name {
        Some(name) => println!("[{}] {}", snapshot.account_id, name),
        None => println!("[{}]", snapshot.account_id),
    }
    println!("  Enabled:         {}", yes_no(snapshot.enabled));
    println!("  Configured:      {}", yes_no(snapshot.configured));
    println!(
        "  Base URL:        {}",
        if snapshot.base_url.is_empty() {
            "not set"
        } else {
            &snapshot.base_url
        }
    );
    println!(
        "  Robot id:        {}",
        snapshot
            .robot_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "not set".to_string())
    );
    println!("  Token source:    {}", snapshot.token_source.as_str());
    println!("  DM policy:       {}", snapshot.dm_policy.as_str());
    println!("  Group policy:    {}", snapshot.group_policy.as_str());
    println!("  Require mention: {}", yes_no(snapshot.require_mention));
    println!("  Allow from:      {}", snapshot.allow_from.len());
    if let Some(probe) = &snapshot.probe {
        match &probe.error {
            Some(error) => println!(
                "  Probe:           {} ({}ms): {}",
                probe.status.as_str(),
                probe.elapsed_ms,
                error
            ),
            None => println!(
                "  Probe:           {} ({}ms)",
                probe.status.as_str(),
                probe.elapsed_ms
            ),
        }
    }
}
