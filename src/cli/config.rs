use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::Config;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration (secrets masked)
    Show {
        /// Output format: toml (default) or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Get a configuration value
    Get {
        /// Config key (e.g., retention.interval)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Config key (e.g., retention.interval)
        key: String,

        /// Value to set
        value: String,
    },

    /// Show config file path
    Path,

    /// Write the commented default config file
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

pub fn run(args: ConfigArgs, explicit: Option<&str>) -> Result<()> {
    let explicit = explicit.map(std::path::Path::new);
    match args.command {
        ConfigCommands::Show { format } => show_config(&Config::load_from(explicit)?, &format),
        ConfigCommands::Get { key } => {
            println!("{}", Config::load_from(explicit)?.get_value(&key)?);
            Ok(())
        }
        ConfigCommands::Set { key, value } => set_config(Config::load_from(explicit)?, &key, &value),
        ConfigCommands::Path => {
            println!("{}", target(explicit)?.file_path().display());
            Ok(())
        }
        ConfigCommands::Init { force } => init_config(target(explicit)?, force),
    }
}

/// Config handle pointing at the file without loading (or creating) it.
fn target(explicit: Option<&std::path::Path>) -> Result<Config> {
    Ok(Config {
        paths: crate::paths::Paths::resolve()?,
        source: explicit.map(std::path::Path::to_path_buf),
        ..Config::default()
    })
}

fn show_config(config: &Config, format: &str) -> Result<()> {
    let mut shown = config.clone();
    shown.security.session_secret = crate::security::mask(&shown.security.session_secret);
    shown.break_glass.key = crate::security::mask(&shown.break_glass.key);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&shown)?),
        _ => println!("{}", toml::to_string_pretty(&shown)?),
    }

    Ok(())
}

fn set_config(mut config: Config, key: &str, value: &str) -> Result<()> {
    config.set_value(key, value)?;
    config.save()?;
    println!("Set {} = {}", key, value);
    Ok(())
}

fn init_config(config: Config, force: bool) -> Result<()> {
    let path = config.file_path();

    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    config.save_with_template()?;
    println!("Created config file at {}", path.display());
    Ok(())
}
