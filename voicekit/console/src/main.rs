//! VoiceKit Console - Headless Host for the Conversation Core
//!
//! Drives a `ConversationController` from the terminal against a live
//! SmartVoiceKit backend and prints the surface updates it emits.
//!
//! # Usage
//!
//! ```bash
//! # Interactive session
//! VOICEKIT_TOKEN=... voicekit-console chat
//!
//! # Browse the two most recent history pages, newest first
//! voicekit-console --order descending history --pages 2
//!
//! # One-shot request
//! voicekit-console send "what's the weather"
//!
//! # Verbose logging
//! RUST_LOG=debug voicekit-console history
//! ```

mod commands;
mod refresh;
mod render;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use voicekit_core::config::{default_config_path, load_config_from_path};
use voicekit_core::{ConfigOverrides, SortOrder, VoiceKitConfig, Vote};

/// VoiceKit Console - talk to the SmartVoiceKit assistant from a terminal
#[derive(Parser, Debug)]
#[command(name = "voicekit-console")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "VOICEKIT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend base URL
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Access token
    #[arg(long, env = "VOICEKIT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// File holding the access token, re-read when the token is rejected
    #[arg(long, env = "VOICEKIT_TOKEN_FILE", value_name = "FILE")]
    token_file: Option<PathBuf>,

    /// History entries per page
    #[arg(long, value_name = "N")]
    page_size: Option<usize>,

    /// Request timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Layout order of the conversation
    #[arg(long, value_enum)]
    order: Option<Order>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "VOICEKIT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive session reading utterances from stdin
    Chat,
    /// Print conversation history
    History {
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
        /// Only entries from this device
        #[arg(long, value_name = "SERIAL")]
        device: Option<String>,
    },
    /// Send one utterance and print the answer
    Send {
        /// What to say
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Delete a history entry
    Delete {
        /// History identifier
        history_id: String,
    },
    /// Rate an answer
    Feedback {
        /// History identifier
        history_id: String,
        /// Vote to record
        #[arg(value_enum)]
        vote: VoteArg,
    },
    /// List devices the history can be filtered on
    Devices,
    /// Show pending user agreements
    Agreements {
        /// Accept every pending agreement
        #[arg(long)]
        accept: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Order {
    Ascending,
    Descending,
}

impl From<Order> for SortOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Ascending => SortOrder::Ascending,
            Order::Descending => SortOrder::Descending,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VoteArg {
    Up,
    Down,
    Clear,
}

impl From<VoteArg> for Vote {
    fn from(vote: VoteArg) -> Self {
        match vote {
            VoteArg::Up => Vote::Positive,
            VoteArg::Down => Vote::Negative,
            VoteArg::Clear => Vote::None,
        }
    }
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref url) = self.api_url {
            overrides = overrides.with_base_url(url.clone());
        }
        if let Some(size) = self.page_size {
            overrides = overrides.with_page_size(size);
        }
        if let Some(ms) = self.timeout_ms {
            overrides = overrides.with_request_timeout_ms(ms);
        }
        if let Some(order) = self.order {
            overrides = overrides.with_sort_order(order.into());
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "voicekit_console={level},voicekit_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Config file, then environment, then command line
fn resolve_config(args: &Args) -> Result<VoiceKitConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;
    info!(
        source = %config.source(),
        base_url = %config.api.base_url,
        "Configuration resolved"
    );
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = resolve_config(&args)?;
    let host = commands::Host::connect(config, args.token.clone(), args.token_file.clone()).await?;

    match args.command {
        Command::Chat => host.chat().await,
        Command::History { pages, device } => host.history(pages, device).await,
        Command::Send { text } => host.send(&text.join(" ")).await,
        Command::Delete { history_id } => host.delete(&history_id).await,
        Command::Feedback { history_id, vote } => host.feedback(&history_id, vote.into()).await,
        Command::Devices => host.devices().await,
        Command::Agreements { accept } => host.agreements(accept).await,
    }
}
