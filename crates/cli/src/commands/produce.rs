// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `tide produce`: append row changes read from a file or stdin
//!
//! Input is JSON: either an array of changes or an object
//! `{"xid": 42, "changes": [...]}`. Each change carries `entity`, `op`
//! and the `before`/`after` images its operation needs.

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;
use tm_core::{ChangeOp, Row, RowChange, TxnId};

use crate::client::DaemonClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct ProduceArgs {
    /// JSON input file; stdin when omitted or `-`
    pub file: Option<PathBuf>,
    /// Transaction id to write under; allocated by the daemon when omitted
    #[arg(long)]
    pub xid: Option<u64>,
    /// Leave the transaction open for later appends
    #[arg(long, conflicts_with = "abort")]
    pub no_commit: bool,
    /// Abort the open transaction given by --xid instead of appending
    #[arg(long, requires = "xid")]
    pub abort: bool,
}

#[derive(Debug, Deserialize)]
struct ChangeInput {
    entity: String,
    op: ChangeOp,
    #[serde(default)]
    before: Option<Row>,
    #[serde(default)]
    after: Option<Row>,
    #[serde(default)]
    origin: Option<String>,
}

impl From<ChangeInput> for RowChange {
    fn from(input: ChangeInput) -> Self {
        RowChange {
            xid: TxnId(0),
            entity: input.entity,
            op: input.op,
            before: input.before,
            after: input.after,
            origin: input.origin,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProduceInput {
    Changes(Vec<ChangeInput>),
    Transaction {
        #[serde(default)]
        xid: Option<u64>,
        changes: Vec<ChangeInput>,
    },
}

/// Parse input into an optional xid and the changes to append
fn parse_input(content: &str) -> Result<(Option<TxnId>, Vec<RowChange>)> {
    let input: ProduceInput =
        serde_json::from_str(content).context("input is not a change list")?;
    let (xid, changes) = match input {
        ProduceInput::Changes(changes) => (None, changes),
        ProduceInput::Transaction { xid, changes } => (xid.map(TxnId), changes),
    };
    Ok((xid, changes.into_iter().map(RowChange::from).collect()))
}

fn read_input(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut content = String::new();
            std::io::stdin().read_to_string(&mut content)?;
            Ok(content)
        }
    }
}

#[derive(serde::Serialize)]
struct Produced {
    xid: TxnId,
    seq: tm_core::Seq,
    committed: bool,
}

pub async fn handle(args: ProduceArgs, client: &DaemonClient, format: OutputFormat) -> Result<()> {
    if args.abort {
        let Some(xid) = args.xid.map(TxnId) else {
            bail!("--abort needs --xid");
        };
        let seq = client.abort(xid).await?;
        let produced = Produced {
            xid,
            seq,
            committed: false,
        };
        output::print(&produced, format, |p| {
            println!("Aborted transaction {} at {}", p.xid, p.seq)
        });
        return Ok(());
    }

    let (input_xid, changes) = parse_input(&read_input(args.file.as_ref())?)?;
    let xid = args.xid.map(TxnId).or(input_xid);
    // An empty append only makes sense as the commit of an open transaction
    if changes.is_empty() && (xid.is_none() || args.no_commit) {
        bail!("no changes to append");
    }

    let (xid, seq, committed) = client.append(xid, changes, !args.no_commit).await?;
    let produced = Produced {
        xid,
        seq,
        committed,
    };
    output::print(&produced, format, |p| {
        if p.committed {
            println!("Committed transaction {} at {}", p.xid, p.seq);
        } else {
            println!("Appended to open transaction {} (last seq {})", p.xid, p.seq);
        }
    });
    Ok(())
}
