use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde_json::json;

use crate::audit::{Actor, AuditAction, AuditEvent, AuditQuery};
use crate::config::Config;

#[derive(Args)]
pub struct AuditArgs {
    #[command(subcommand)]
    pub command: AuditCommands,
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Recompute the hash chain (exit code 1 if broken)
    Verify {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List recent entries, newest first
    List {
        /// Filter by action (e.g., case_approved)
        #[arg(long)]
        action: Option<AuditAction>,

        /// Filter by actor id
        #[arg(long)]
        actor: Option<String>,

        /// Filter by resource type
        #[arg(long)]
        resource_type: Option<String>,

        /// Filter by resource id
        #[arg(long)]
        resource_id: Option<String>,

        /// Only entries at or after this RFC 3339 time
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
}

pub fn run(args: AuditArgs, config: &Config) -> Result<()> {
    let state = super::open_state(config)?;

    match args.command {
        AuditCommands::Verify { json } => {
            let report = state.audit.verify_chain()?;
            state.audit.record(
                AuditEvent::new(AuditAction::AuditChainVerified, Actor::system(), "audit_log")
                    .metadata(json!({
                        "checked": report.checked,
                        "intact": report.is_intact(),
                    })),
            );

            if json {
                super::print_json(&report)?;
            } else {
                println!(
                    "Checked {} entries (sequence {:?}..{:?}){}",
                    report.checked,
                    report.first_sequence,
                    report.last_sequence,
                    if report.anchored { ", anchored after pruning" } else { "" }
                );
                for b in &report.breaks {
                    println!("  BREAK at #{}: {:?}", b.sequence, b.kind);
                }
            }

            if !report.is_intact() {
                anyhow::bail!("audit chain is broken ({} break(s))", report.breaks.len());
            }
            if !json {
                println!("Audit chain intact");
            }
            Ok(())
        }
        AuditCommands::List {
            action,
            actor,
            resource_type,
            resource_id,
            since,
            limit,
        } => {
            let entries = state.audit.query(&AuditQuery {
                action,
                actor_id: actor,
                resource_type,
                resource_id,
                since,
                limit: Some(limit),
                ..Default::default()
            })?;
            for e in &entries {
                println!(
                    "#{:<6} {}  {:<26} {}:{}  {}/{}",
                    e.sequence,
                    e.created_at,
                    e.action.as_str(),
                    e.actor_type.as_str(),
                    e.actor_id.as_deref().unwrap_or("-"),
                    e.resource_type,
                    e.resource_id.as_deref().unwrap_or("-"),
                );
            }
            println!("{} entries", entries.len());
            Ok(())
        }
    }
}
