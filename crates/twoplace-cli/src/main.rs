//! # twoplace
//!
//! Command-line client for two-party video calls.
//!
//! Every instance opens the same SQLite file (`TWOPLACE_DB`), which stands in
//! for the shared document store: profiles, friend requests, call documents
//! and candidate lists. Run `twoplace --user bob listen` in one terminal and
//! `twoplace --user alice call bob` in another.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::commands::Context;
use crate::config::ClientConfig;

#[derive(Debug, Parser)]
#[command(name = "twoplace", version, about = "Two-party video calls")]
struct Cli {
    /// Username to act as. Registered on first use.
    #[arg(long, short, global = true, env = "TWOPLACE_USER")]
    user: Option<String>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Create a profile (or show the existing one).
    Register {
        username: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Show or edit profiles.
    #[command(subcommand)]
    Profile(commands::profile::ProfileCmd),
    /// Manage friends and friend requests.
    #[command(subcommand)]
    Friends(commands::friends::FriendsCmd),
    /// Call a user and stay in the call until it ends or Ctrl-C.
    Call {
        username: String,
        /// End the call this many minutes after it is accepted.
        #[arg(long)]
        sleep: Option<u32>,
    },
    /// Wait for incoming calls.
    Listen {
        /// Accept every incoming call without asking.
        #[arg(long)]
        auto_accept: bool,
    },
    /// Recent calls.
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,twoplace_client=debug,twoplace_store=info")
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let ctx = Context::open(config, cli.json)?;

    match cli.cmd {
        Cmd::Register { username, display_name } => {
            commands::profile::register(&ctx, &username, display_name.as_deref())
        }
        Cmd::Profile(cmd) => commands::profile::run(&ctx, cli.user.as_deref(), cmd),
        Cmd::Friends(cmd) => commands::friends::run(&ctx, cli.user.as_deref(), cmd),
        Cmd::Call { username, sleep } => {
            commands::calls::call(&ctx, cli.user.as_deref(), &username, sleep).await
        }
        Cmd::Listen { auto_accept } => {
            commands::calls::listen(&ctx, cli.user.as_deref(), auto_accept).await
        }
        Cmd::History { limit } => commands::calls::history(&ctx, cli.user.as_deref(), limit),
    }
}
