// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `tide subscribe`: stream change batches as JSON lines

use anyhow::{bail, Result};
use clap::Args;
use tm_core::CloseReason;

use crate::client::{DaemonClient, Delivery};

#[derive(Args)]
pub struct SubscribeArgs {
    pub slot: String,
    pub publication: String,
    /// Exit after this many batches
    #[arg(long)]
    pub limit: Option<u64>,
    /// Print batches without confirming them
    #[arg(long)]
    pub no_ack: bool,
}

pub async fn handle(args: SubscribeArgs, client: &DaemonClient) -> Result<()> {
    let mut subscription = client.subscribe(&args.slot, &args.publication).await?;
    eprintln!(
        "Subscribed to {} via {} (session {})",
        args.publication,
        args.slot,
        subscription.session()
    );

    let mut received = 0u64;
    loop {
        if args.limit.is_some_and(|limit| received >= limit) {
            return Ok(());
        }
        let delivery = tokio::select! {
            delivery = subscription.next() => delivery?,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupted");
                return Ok(());
            }
        };
        match delivery {
            Delivery::Batch(batch) => {
                println!("{}", serde_json::to_string(&batch)?);
                received += 1;
                if !args.no_ack {
                    subscription.ack(batch.commit_seq).await?;
                }
            }
            Delivery::Rejected { kind, message } => {
                eprintln!("Daemon rejected a request: {}: {}", kind, message);
            }
            Delivery::Closed(CloseReason::Failed { kind, message }) => {
                bail!("session failed: {}: {}", kind, message);
            }
            Delivery::Closed(reason) => {
                eprintln!("Session closed: {:?}", reason);
                return Ok(());
            }
        }
    }
}
