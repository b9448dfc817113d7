// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `tide slot`

use anyhow::Result;
use clap::{Args, Subcommand};
use tm_core::SlotKind;

use crate::client::DaemonClient;
use crate::output::{self, clip, OutputFormat};

#[derive(Args)]
pub struct SlotArgs {
    #[command(subcommand)]
    pub command: SlotCommand,
}

#[derive(Subcommand)]
pub enum SlotCommand {
    /// Create a slot positioned at the current end of the log
    Create {
        name: String,
        /// logical or physical
        #[arg(long, default_value = "logical")]
        kind: SlotKind,
    },
    /// Drop an inactive slot, releasing the log it retains
    Drop { name: String },
    /// List slots with their positions and lag
    List,
}

pub async fn handle(args: SlotArgs, client: &DaemonClient, format: OutputFormat) -> Result<()> {
    match args.command {
        SlotCommand::Create { name, kind } => {
            let slot = client.create_slot(&name, kind).await?;
            output::print(&slot, format, |s| {
                println!("Created {} slot {} at {}", s.kind, s.name, s.restart_seq)
            });
        }
        SlotCommand::Drop { name } => {
            let slot = client.drop_slot(&name).await?;
            output::print(&slot, format, |s| println!("Dropped slot {}", s.name));
        }
        SlotCommand::List => {
            let slots = client.list_slots().await?;
            output::print(&slots, format, |slots| {
                if slots.is_empty() {
                    println!("No slots");
                    return;
                }
                println!(
                    "{:<24} {:<9} {:>10} {:>10} {:>8} HOLDER",
                    "NAME", "KIND", "RESTART", "CONFIRMED", "LAG"
                );
                for s in slots {
                    println!(
                        "{:<24} {:<9} {:>10} {:>10} {:>8} {}",
                        clip(&s.name, 24),
                        s.kind,
                        s.restart_seq,
                        s.confirmed_seq,
                        s.lag,
                        s.holder.as_deref().unwrap_or("-")
                    );
                }
            });
        }
    }
    Ok(())
}
