// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! tide - Tidemark CLI

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{daemon, produce, publication, slot, status, subscribe};
use std::path::PathBuf;

use crate::client::DaemonClient;
use crate::output::OutputFormat;

#[derive(Parser)]
#[command(
    name = "tide",
    version,
    about = "Tidemark - change log retention and streaming"
)]
struct Cli {
    /// Data directory served by the daemon
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retention slot management
    Slot(slot::SlotArgs),
    /// Publication management
    Publication(publication::PublicationArgs),
    /// Show log, slot, session and maintenance state
    Status,
    /// Stream changes through a slot
    Subscribe(subscribe::SubscribeArgs),
    /// Append a transaction to the log
    Produce(produce::ProduceArgs),
    /// Daemon management
    Daemon(daemon::DaemonArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();
    let data_dir = tm_daemon::resolve_data_dir(cli.data_dir)?;

    // Handle daemon command separately (manages the process itself)
    if let Commands::Daemon(args) = cli.command {
        return daemon::handle(args, &data_dir).await;
    }

    // All other commands go through the daemon
    let client = DaemonClient::connect_or_start(&data_dir)?;

    match cli.command {
        Commands::Slot(args) => slot::handle(args, &client, cli.format).await?,
        Commands::Publication(args) => publication::handle(args, &client, cli.format).await?,
        Commands::Status => status::handle(&client, cli.format).await?,
        Commands::Subscribe(args) => subscribe::handle(args, &client).await?,
        Commands::Produce(args) => produce::handle(args, &client, cli.format).await?,
        Commands::Daemon(_) => unreachable!(),
    }

    Ok(())
}

fn setup_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
