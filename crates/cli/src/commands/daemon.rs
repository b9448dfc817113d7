// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `tide daemon`: start and stop the background process

use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::Path;

use crate::client::{daemon_stop, read_daemon_pid, DaemonClient};

#[derive(Args)]
pub struct DaemonArgs {
    #[command(subcommand)]
    pub command: DaemonCommand,
}

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon if it is not already running
    Start,
    /// Stop the daemon gracefully, killing it if it does not exit
    Stop,
}

pub async fn handle(args: DaemonArgs, data_dir: &Path) -> Result<()> {
    match args.command {
        DaemonCommand::Start => {
            let client = DaemonClient::connect_or_start(data_dir)?;
            let version = client.hello().await?;
            match read_daemon_pid(data_dir) {
                Some(pid) => println!("Daemon running (pid: {}, protocol {})", pid, version),
                None => println!("Daemon running (protocol {})", version),
            }
        }
        DaemonCommand::Stop => {
            if daemon_stop(data_dir).await? {
                println!("Daemon stopped");
            } else {
                println!("Daemon not running");
            }
        }
    }
    Ok(())
}
