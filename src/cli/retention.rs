use anyhow::Result;
use clap::{Args, Subcommand};
use tracing::info;

use crate::config::Config;
use crate::retention::{DataType, LegalBasis, PolicyUpdate};

#[derive(Args)]
pub struct RetentionArgs {
    #[command(subcommand)]
    pub command: RetentionCommands,
}

#[derive(Subcommand)]
pub enum RetentionCommands {
    /// Show the retention policy for every data type
    List,

    /// Run cleanup now (waits for the job lock)
    Run {
        /// Count eligible rows without deleting or archiving
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Change a policy
    Set {
        /// Data type (e.g., notification, audit_log)
        data_type: DataType,

        #[arg(long)]
        days: Option<u32>,

        /// Archive after this many days
        #[arg(long, conflicts_with = "no_archive")]
        archive_after: Option<u32>,

        /// Stop archiving this data type
        #[arg(long)]
        no_archive: bool,

        #[arg(long)]
        legal_basis: Option<LegalBasis>,

        #[arg(long)]
        enabled: Option<bool>,
    },
}

pub async fn run(args: RetentionArgs, config: &Config) -> Result<()> {
    let state = super::open_state(config)?;

    match args.command {
        RetentionCommands::List => {
            println!(
                "{:<22} {:>6} {:>8}  {:<20} {}",
                "DATA TYPE", "DAYS", "ARCHIVE", "LEGAL BASIS", "ENABLED"
            );
            for p in state.policies.list()? {
                println!(
                    "{:<22} {:>6} {:>8}  {:<20} {}",
                    p.data_type.as_str(),
                    p.retention_days,
                    p.archive_after_days
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    p.legal_basis.as_str(),
                    p.enabled
                );
            }
            Ok(())
        }
        RetentionCommands::Run { dry_run, json } => {
            let lock = state.retention_lock.clone();
            let engine = state.retention.clone();
            let report = tokio::task::spawn_blocking(move || -> Result<_> {
                let _guard = lock.acquire()?;
                Ok(engine.run(dry_run)?)
            })
            .await??;

            if json {
                return super::print_json(&report);
            }
            for r in &report.results {
                match &r.error {
                    Some(e) => println!("  {:<22} FAILED: {}", r.data_type.as_str(), e),
                    None => println!(
                        "  {:<22} deleted {:>6}  archived {:>6}",
                        r.data_type.as_str(),
                        r.deleted,
                        r.archived
                    ),
                }
            }
            info!(
                "Retention {}: {} deleted, {} archived",
                if dry_run { "dry run" } else { "run" },
                report.total_deleted(),
                report.total_archived()
            );
            if report.failures().next().is_some() {
                anyhow::bail!("retention failed for some data types");
            }
            Ok(())
        }
        RetentionCommands::Set {
            data_type,
            days,
            archive_after,
            no_archive,
            legal_basis,
            enabled,
        } => {
            let change = PolicyUpdate {
                retention_days: days,
                archive_after_days: if no_archive {
                    Some(None)
                } else {
                    archive_after.map(Some)
                },
                legal_basis,
                enabled,
            };
            let policy = state.policies.update(None, data_type, change)?;
            super::print_json(&policy)
        }
    }
}
