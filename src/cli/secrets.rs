use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::Config;
use crate::security::{GROUPS, SECRETS, validate_config};

#[derive(Args)]
pub struct SecretsArgs {
    #[command(subcommand)]
    pub command: SecretsCommands,
}

#[derive(Subcommand)]
pub enum SecretsCommands {
    /// Validate configured and environment credentials (exit code 1 on errors)
    Check {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the credentials the service reads
    List,
}

pub fn run(args: SecretsArgs, config: &Config) -> Result<()> {
    match args.command {
        SecretsCommands::Check { json } => check(config, json),
        SecretsCommands::List => {
            for spec in SECRETS {
                println!("{:<28} {:?}  {}", spec.name, spec.requirement, spec.description);
            }
            println!();
            for group in GROUPS {
                println!("group {:<14} {}", group.name, group.members.join(", "));
            }
            Ok(())
        }
    }
}

fn check(config: &Config, json: bool) -> Result<()> {
    let report = validate_config(config);

    if json {
        super::print_json(&report)?;
    } else {
        for present in &report.present {
            println!("  ok    {:<28} {}", present.name, present.masked);
        }
        for issue in report.warnings() {
            println!("  warn  {:<28} {}", issue.name, issue.problem);
        }
        for issue in report.errors() {
            println!("  ERROR {:<28} {}", issue.name, issue.problem);
        }
    }

    if report.has_errors() {
        anyhow::bail!("{} secret error(s)", report.errors().count());
    }
    if !json {
        println!("Secrets check passed");
    }
    Ok(())
}
