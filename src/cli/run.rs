//! Run command handler: poll every account until Ctrl+C.
//!
//! Dispatched messages are printed to stdout. Pairing requests can be
//! approved from stdin with `approve <code> [account]`; `pending` lists them.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use wechat_channel::bus::{InboundMessage, MessageBus, OutboundMessage};
use wechat_channel::channels::{ChannelManager, WeChatChannel, CHANNEL_NAME};
use wechat_channel::config::{normalize_account_id, resolve_default_account_id, Config};
use wechat_channel::host::BusHost;
use wechat_channel::utils::string::preview;

pub(crate) async fn cmd_run(config: Config, echo: bool) -> Result<()> {
    let bus = Arc::new(MessageBus::new());
    let host = Arc::new(BusHost::new(bus.clone()));
    let default_account = resolve_default_account_id(&config.wechat);

    let channel = Arc::new(WeChatChannel::new(config.wechat.clone(), host.clone()));
    let manager = ChannelManager::new(bus.clone(), channel);
    manager
        .start()
        .await
        .with_context(|| "Failed to start the WeChat channel")?;

    let inbound_handle = tokio::spawn(print_inbound(bus.clone(), echo));
    let console_handle = tokio::spawn(read_console(host.clone(), default_account));

    println!();
    println!("WeChat channel is running. Press Ctrl+C to stop.");
    println!("Commands: `pending`, `approve <code> [account]`");
    println!();

    tokio::signal::ctrl_c()
        .await
        .with_context(|| "Failed to listen for Ctrl+C")?;

    println!();
    println!("Shutting down...");

    manager
        .stop()
        .await
        .with_context(|| "Failed to stop the WeChat channel")?;
    inbound_handle.abort();
    console_handle.abort();

    println!("Stopped.");
    Ok(())
}

fn describe(msg: &InboundMessage) -> String {
    let tier = msg
        .metadata
        .get("trust_tier")
        .map(String::as_str)
        .unwrap_or("unknown");
    let name = msg
        .metadata
        .get("sender_name")
        .map(String::as_str)
        .unwrap_or(msg.sender_id.as_str());
    format!(
        "[{}] {} ({}): {}",
        msg.session_key,
        name,
        tier,
        preview(&msg.content, 200)
    )
}

async fn print_inbound(bus: Arc<MessageBus>, echo: bool) {
    while let Some(msg) = bus.consume_inbound().await {
        println!("{}", describe(&msg));
        if !echo {
            continue;
        }
        let body = msg.metadata.get("raw_body").unwrap_or(&msg.content);
        let reply = OutboundMessage::reply_to(&msg, body);
        if let Err(e) = bus.publish_outbound(reply).await {
            warn!("Failed to queue echo reply: {}", e);
            break;
        }
    }
    info!("Inbound printer stopped");
}

async fn read_console(host: Arc<BusHost>, default_account: String) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("pending"), _, _) => {
                let requests = host
                    .pending_requests(CHANNEL_NAME, &default_account)
                    .await;
                if requests.is_empty() {
                    println!("No pending pairing requests for '{}'", default_account);
                }
                for req in requests {
                    println!(
                        "  {}  {} {}",
                        req.code,
                        req.sender_id,
                        req.sender_name.unwrap_or_default()
                    );
                }
            }
            (Some("approve"), Some(code), account) => {
                let account = normalize_account_id(Some(account.unwrap_or(default_account.as_str())));
                match host.approve(CHANNEL_NAME, &account, code).await {
                    Ok(sender) => println!("Approved {} on '{}'", sender, account),
                    Err(e) => println!("{}", e),
                }
            }
            (None, _, _) => {}
            _ => println!("Commands: `pending`, `approve <code> [account]`"),
        }
    }
}
