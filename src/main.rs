use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use casebuilder::cli::{self, Cli, Commands};
use casebuilder::config::LoggingConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Config and paths commands must not create a config file as a side effect
    let config = match cli.command {
        Commands::Config(_) | Commands::Paths => None,
        _ => Some(cli.load_config()?),
    };
    init_logging(config.as_ref().map(|c| &c.logging), cli.verbose);

    match (cli.command, config) {
        (Commands::Config(args), _) => cli::config::run(args, cli.config.as_deref()),
        (Commands::Paths, _) => cli::paths::run(),
        (Commands::Serve(args), Some(config)) => cli::serve::run(args, config).await,
        (Commands::Secrets(args), Some(config)) => cli::secrets::run(args, &config),
        (Commands::Audit(args), Some(config)) => cli::audit::run(args, &config),
        (Commands::Retention(args), Some(config)) => cli::retention::run(args, &config).await,
        (Commands::Gdpr(args), Some(config)) => cli::gdpr::run(args, &config),
        (Commands::Users(args), Some(config)) => cli::users::run(args, &config),
        (_, None) => anyhow::bail!("configuration was not loaded"),
    }
}

/// `RUST_LOG` wins over `logging.level`; `--verbose` forces debug.
fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let level = match (verbose, logging) {
        (true, _) => "debug",
        (false, Some(l)) => l.level.as_str(),
        (false, None) => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if logging.is_some_and(|l| l.format == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
