//! Probe and send command handlers.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use wechat_channel::channels::{probe_account, OutboundSender, SendResult};
use wechat_channel::config::Config;

/// What `send` delivers.
pub(crate) enum Payload {
    Text(String),
    Image(String),
    Voice(PathBuf),
}

impl Payload {
    pub(crate) fn from_args(
        text: Option<String>,
        image: Option<String>,
        voice: Option<PathBuf>,
    ) -> Result<Self> {
        match (text, image, voice) {
            (Some(text), None, None) => Ok(Self::Text(text)),
            (None, Some(url), None) => Ok(Self::Image(url)),
            (None, None, Some(path)) => Ok(Self::Voice(path)),
            _ => bail!("Pass exactly one of --text, --image or --voice"),
        }
    }
}

/// Probe one account and print the result.
pub(crate) async fn cmd_probe(
    config: &Config,
    account: Option<&str>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let account = config.account(account)?;
    let result = probe_account(&account, timeout_ms.map(Duration::from_millis)).await;

    println!(
        "Account '{}': {} ({}ms)",
        account.account_id,
        result.status.as_str(),
        result.elapsed_ms
    );
    if let Some(error) = &result.error {
        println!("  {}", error);
    }
    if !result.ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Send one message from an account.
pub(crate) async fn cmd_send(
    config: &Config,
    account: Option<&str>,
    to: &str,
    payload: Payload,
) -> Result<()> {
    let account = config.account(account)?;
    let sender = OutboundSender::for_account(&account)
        .with_context(|| format!("Cannot send from account '{}'", account.account_id))?;

    let result: SendResult = match &payload {
        Payload::Text(text) => sender.send_text(to, text).await,
        Payload::Image(url) => sender.send_image(to, url).await,
        Payload::Voice(path) => sender.send_voice(to, path).await,
    };

    if !result.ok {
        bail!(
            "Send failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    match result.message_id {
        Some(id) => println!("Sent (message id {})", id),
        None => println!("Sent"),
    }
    Ok(())
}
