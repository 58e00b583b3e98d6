use anyhow::Result;
use clap::Args;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::retention::RetentionRunner;
use crate::security::{SecretReport, validate_config};
use crate::server::{AppState, Server};

#[derive(Args)]
pub struct ServeArgs {
    /// Override server.port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Override server.bind
    #[arg(long)]
    pub bind: Option<String>,

    /// Start even if the secrets check reports errors
    #[arg(long)]
    pub allow_insecure: bool,
}

pub async fn run(args: ServeArgs, mut config: Config) -> Result<()> {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    check_secrets(&config, args.allow_insecure)?;

    let state = Arc::new(AppState::open(&config)?);
    info!(
        "Database ready at {} (schema v{})",
        config.database_path().display(),
        state.db.schema_version()?
    );

    if config.retention.enabled {
        let runner = RetentionRunner::new(
            &config,
            state.retention.clone(),
            state.retention_lock.clone(),
        )?;
        tokio::spawn(async move {
            if let Err(e) = runner.run().await {
                error!("Retention runner stopped: {}", e);
            }
        });
    } else {
        info!("Scheduled retention is disabled");
    }

    Server::new(state).run().await
}

fn check_secrets(config: &Config, allow_insecure: bool) -> Result<()> {
    enforce(&validate_config(config), config, allow_insecure)
}

fn enforce(report: &SecretReport, config: &Config, allow_insecure: bool) -> Result<()> {
    for issue in report.warnings() {
        warn!("{}: {}", issue.name, issue.problem);
    }
    for issue in report.errors() {
        error!("{}: {}", issue.name, issue.problem);
    }

    if report.has_errors() {
        if config.security.strict_secrets && !allow_insecure {
            anyhow::bail!(
                "Secrets check failed; run `casebuilder secrets check` for details \
                 or set security.strict_secrets = false"
            );
        }
        warn!("Starting with secrets errors because strict checking is off");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::validate_config_with;

    fn config_with_key(key: &str) -> Config {
        let mut config = Config::default();
        config.security.session_secret = "serve-test-secret-0123456789abcdefgh".to_string();
        config.server.public_url = "https://cases.example.com".to_string();
        config.break_glass.enabled = true;
        config.break_glass.key = key.to_string();
        config
    }

    fn no_env(_: &str) -> std::result::Result<String, std::env::VarError> {
        Err(std::env::VarError::NotPresent)
    }

    #[test]
    fn weak_configured_key_blocks_strict_startup() {
        let config = config_with_key("letmein");
        assert!(check_secrets(&config, false).is_err());
        assert!(check_secrets(&config, true).is_ok());

        let mut lenient = config.clone();
        lenient.security.strict_secrets = false;
        assert!(check_secrets(&lenient, false).is_ok());
    }

    #[test]
    fn strong_configured_literals_pass_without_env() {
        let config = config_with_key("break-glass-literal-key-0123456789abcdef");
        let report = validate_config_with(&config, no_env);
        assert!(enforce(&report, &config, false).is_ok(), "{:?}", report.issues);
    }
}
