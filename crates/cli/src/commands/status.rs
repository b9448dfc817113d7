// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `tide status`

use anyhow::Result;
use serde::Serialize;
use std::time::Duration;
use tm_engine::MonitorSnapshot;

use crate::client::DaemonClient;
use crate::output::{self, clip, OutputFormat};

#[derive(Serialize)]
struct Status {
    uptime_secs: u64,
    #[serde(flatten)]
    snapshot: MonitorSnapshot,
}

pub async fn handle(client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let (uptime_secs, snapshot) = client.status().await?;
    let status = Status {
        uptime_secs,
        snapshot,
    };
    output::print(&status, format, render);
    Ok(())
}

fn render(status: &Status) {
    let s = &status.snapshot;
    println!(
        "Uptime: {}",
        humantime::format_duration(Duration::from_secs(status.uptime_secs))
    );
    println!(
        "Log: seq {}..{} in {} segments ({} bytes, {} readers)",
        s.store.oldest_seq, s.store.last_seq, s.store.segments, s.store.bytes, s.store.readers
    );
    println!("Watermark: {}", s.watermark);
    if let Some(slot) = s.laggiest_slot() {
        println!("Laggiest slot: {} ({} records behind)", slot.name, slot.lag);
    }
    if let Some(pass) = &s.last_pass {
        println!(
            "Last maintenance: {} shards ({} failed), reclaimed {} segments / {} bytes{}",
            pass.shards,
            pass.failed_shards,
            pass.reclaimed_segments,
            pass.reclaimed_bytes,
            if pass.reclaim_deferred { ", deferred" } else { "" }
        );
    }

    if s.sessions.is_empty() {
        println!("No sessions");
        return;
    }
    println!();
    println!(
        "{:<12} {:<20} {:<20} {:<10} {:>10} {:>10} BATCHES",
        "SESSION", "SLOT", "PUBLICATION", "STATE", "SENT", "CONFIRMED"
    );
    for session in &s.sessions {
        let id = session.id.to_string();
        println!(
            "{:<12} {:<20} {:<20} {:<10} {:>10} {:>10} {}",
            clip(&id, 12),
            clip(&session.slot, 20),
            clip(&session.publication, 20),
            session.state,
            session.last_sent,
            session.confirmed,
            session.batches_sent
        );
    }
}
