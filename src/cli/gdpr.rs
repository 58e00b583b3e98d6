use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Args)]
pub struct GdprArgs {
    #[command(subcommand)]
    pub command: GdprCommands,
}

#[derive(Subcommand)]
pub enum GdprCommands {
    /// List deletion requests, newest first
    List,

    /// Anonymize the user behind a verified request
    Process {
        /// Request id
        id: String,
    },

    /// Export everything held about a user (right of access)
    Export {
        /// User id
        user_id: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub fn run(args: GdprArgs, config: &Config) -> Result<()> {
    let state = super::open_state(config)?;

    match args.command {
        GdprCommands::List => {
            for r in state.gdpr.list(None)? {
                println!(
                    "{}  {:<12} user={}  requested={}{}",
                    r.id,
                    r.status.as_str(),
                    r.user_id,
                    r.requested_at.format("%Y-%m-%d %H:%M"),
                    r.last_error
                        .as_deref()
                        .map(|e| format!("  last_error={}", e))
                        .unwrap_or_default()
                );
            }
            Ok(())
        }
        GdprCommands::Process { id } => {
            let request = state.gdpr.process(None, &id)?;
            super::print_json(&request)
        }
        GdprCommands::Export { user_id, output } => {
            let export = state.gdpr.export_user_data(None, &user_id)?;
            let body = serde_json::to_string_pretty(&export)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, body)?;
                    println!("Wrote export for {} to {}", user_id, path.display());
                }
                None => println!("{}", body),
            }
            Ok(())
        }
    }
}
