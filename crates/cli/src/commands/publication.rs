// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `tide publication`

use anyhow::Result;
use clap::{Args, Subcommand};
use tm_core::{ChangeOp, EntityFilter, OperationMask, Publication};

use crate::client::DaemonClient;
use crate::output::{self, clip, OutputFormat};

#[derive(Args)]
pub struct PublicationArgs {
    #[command(subcommand)]
    pub command: PublicationCommand,
}

#[derive(Subcommand)]
pub enum PublicationCommand {
    /// Define a new publication
    Create(DefineArgs),
    /// Replace an existing publication's definition
    Alter(DefineArgs),
    /// Remove a publication
    Drop { name: String },
    /// List publications
    List,
}

#[derive(Args)]
pub struct DefineArgs {
    pub name: String,
    /// Entity to include (repeatable); all entities when omitted
    #[arg(long = "entity")]
    pub entities: Vec<String>,
    /// Operation to expose (repeatable or comma separated); all when omitted
    #[arg(long = "op", value_delimiter = ',')]
    pub ops: Vec<ChangeOp>,
}

impl DefineArgs {
    pub fn publication(&self) -> Publication {
        let entities = if self.entities.is_empty() {
            EntityFilter::All
        } else {
            EntityFilter::only(self.entities.iter().cloned())
        };
        let operations = if self.ops.is_empty() {
            OperationMask::all()
        } else {
            OperationMask::of(self.ops.iter().copied())
        };
        Publication::new(self.name.clone(), entities, operations)
    }
}

fn describe(publication: &Publication) -> (String, String) {
    let entities = match &publication.entities {
        EntityFilter::All => "*".to_string(),
        EntityFilter::Only(set) => set.iter().cloned().collect::<Vec<_>>().join(","),
    };
    let ops = publication
        .operations
        .iter()
        .map(|op| op.to_string())
        .collect::<Vec<_>>()
        .join(",");
    (entities, ops)
}

pub async fn handle(
    args: PublicationArgs,
    client: &DaemonClient,
    format: OutputFormat,
) -> Result<()> {
    match args.command {
        PublicationCommand::Create(define) => {
            let publication = client.create_publication(define.publication()).await?;
            output::print(&publication, format, |p| {
                println!("Created publication {}", p.name)
            });
        }
        PublicationCommand::Alter(define) => {
            let publication = client.alter_publication(define.publication()).await?;
            output::print(&publication, format, |p| {
                println!("Altered publication {}", p.name)
            });
        }
        PublicationCommand::Drop { name } => {
            client.drop_publication(&name).await?;
            if format == OutputFormat::Text {
                println!("Dropped publication {}", name);
            }
        }
        PublicationCommand::List => {
            let publications = client.list_publications().await?;
            output::print(&publications, format, |publications| {
                if publications.is_empty() {
                    println!("No publications");
                    return;
                }
                println!("{:<24} {:<32} OPERATIONS", "NAME", "ENTITIES");
                for p in publications {
                    let (entities, ops) = describe(p);
                    println!("{:<24} {:<32} {}", clip(&p.name, 24), clip(&entities, 32), ops);
                }
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn define(entities: &[&str], ops: &[ChangeOp]) -> DefineArgs {
        DefineArgs {
            name: "orders".to_string(),
            entities: entities.iter().map(|e| e.to_string()).collect(),
            ops: ops.to_vec(),
        }
    }

    #[test]
    fn omitted_filters_mean_everything() {
        assert_eq!(define(&[], &[]).publication(), Publication::all("orders"));
    }

    #[test]
    fn filters_narrow_the_publication() {
        let publication = define(&["orders", "items"], &[ChangeOp::Insert]).publication();
        assert!(publication.entities.contains("items"));
        assert!(!publication.entities.contains("users"));
        assert!(publication.operations.allows(ChangeOp::Insert));
        assert!(!publication.operations.allows(ChangeOp::Delete));
        assert_eq!(describe(&publication), ("items,orders".to_string(), "insert".to_string()));
    }
}
