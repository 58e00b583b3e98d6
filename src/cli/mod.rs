pub mod audit;
pub mod config;
pub mod gdpr;
pub mod paths;
pub mod retention;
pub mod secrets;
pub mod serve;
pub mod users;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;

use crate::config::Config;
use crate::server::AppState;

#[derive(Parser)]
#[command(name = "casebuilder")]
#[command(
    author,
    version,
    about = "Case study workflow service with audit, retention and GDPR tooling"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "CASEBUILDER_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API (and the scheduled retention job)
    Serve(serve::ServeArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Check credentials in the environment
    Secrets(secrets::SecretsArgs),

    /// Show resolved XDG directory paths
    Paths,

    /// Inspect and verify the audit log
    Audit(audit::AuditArgs),

    /// Retention policies and cleanup runs
    Retention(retention::RetentionArgs),

    /// GDPR deletion requests and data exports
    Gdpr(gdpr::GdprArgs),

    /// User accounts and API tokens
    Users(users::UsersArgs),
}

impl Cli {
    pub fn load_config(&self) -> Result<Config> {
        Config::load_from(self.config.as_deref().map(Path::new))
    }
}

/// Services for one-shot operator commands.
pub(crate) fn open_state(config: &Config) -> Result<AppState> {
    AppState::open(config)
}

/// Pretty JSON to stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
