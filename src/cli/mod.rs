//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod common;
pub mod run;
pub mod send;
pub mod status;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgGroup, CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "wechat-channel")]
#[command(version)]
#[command(about = "WeChat robot channel adapter", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.wechat-channel/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that an account's robot backend is reachable and logged in
    Probe {
        /// Account id (defaults to the configured default account)
        #[arg(long)]
        account: Option<String>,
        /// Probe timeout in milliseconds
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },
    /// Send a message to a contact or chat room
    #[command(group(ArgGroup::new("payload").required(true).args(["text", "image", "voice"])))]
    Send {
        /// Target wxid or chat-room id (`wechat:` / `wx:` prefixes accepted)
        #[arg(long)]
        to: String,
        /// Text to send; long text is split into several messages
        #[arg(long)]
        text: Option<String>,
        /// Image URL to send
        #[arg(long)]
        image: Option<String>,
        /// Voice file to upload
        #[arg(long)]
        voice: Option<PathBuf>,
        /// Account id (defaults to the configured default account)
        #[arg(long)]
        account: Option<String>,
    },
    /// Show configuration and reachability of every account
    Status {
        /// Probe each configured account
        #[arg(long)]
        probe: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Poll every enabled account and print dispatched messages
    Run {
        /// Reply to every dispatched message with its own text
        #[arg(long)]
        echo: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file; fall back to defaults if it
    // is missing or unreadable so the real error surfaces from the command.
    let logging_cfg = common::load_config(cli.config.as_deref())
        .map(|c| c.logging)
        .unwrap_or_default();
    wechat_channel::utils::logging::init_logging(&logging_cfg);

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Probe {
            account,
            timeout_ms,
        }) => {
            let config = common::load_config(cli.config.as_deref())?;
            send::cmd_probe(&config, account.as_deref(), timeout_ms).await?;
        }
        Some(Commands::Send {
            to,
            text,
            image,
            voice,
            account,
        }) => {
            let config = common::load_config(cli.config.as_deref())?;
            let payload = send::Payload::from_args(text, image, voice)?;
            send::cmd_send(&config, account.as_deref(), &to, payload).await?;
        }
        Some(Commands::Status { probe, json }) => {
            let config = common::load_config(cli.config.as_deref())?;
            status::cmd_status(&config, probe, json).await?;
        }
        Some(Commands::Run { echo }) => {
            let config = common::load_config(cli.config.as_deref())?;
            run::cmd_run(config, echo).await?;
        }
    }

    Ok(())
}
