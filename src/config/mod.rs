mod schema;

pub use schema::*;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::Paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    /// Where this config was loaded from (not serialized)
    #[serde(skip)]
    pub source: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub break_glass: BreakGlassConfig,

    #[serde(default)]
    pub gdpr: GdprConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind")]
    pub bind: String,

    /// Externally reachable base URL, used in e-mail links
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file. Empty means `data_dir/casebuilder.sqlite`.
    #[serde(default)]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" (default) or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Key for hashing API and verification tokens at rest
    #[serde(default = "default_session_secret")]
    pub session_secret: String,

    /// Refuse to start when the secrets check reports errors (default: true)
    #[serde(default = "default_true")]
    pub strict_secrets: bool,

    /// Lifetime of API tokens issued by `users token`
    #[serde(default = "default_api_token_ttl_days")]
    pub api_token_ttl_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakGlassConfig {
    /// Emergency access is off unless explicitly enabled
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_break_glass_key")]
    pub key: String,

    /// Emergency session lifetime in minutes (capped at 240)
    #[serde(default = "default_break_glass_session_minutes")]
    pub session_minutes: u32,

    #[serde(default = "default_break_glass_max_failed")]
    pub max_failed_attempts: u32,

    #[serde(default = "default_break_glass_lockout_minutes")]
    pub lockout_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GdprConfig {
    /// Verification token lifetime for deletion requests
    #[serde(default = "default_gdpr_token_ttl_hours")]
    pub token_ttl_hours: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Run the scheduled cleanup inside `serve`
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_retention_interval")]
    pub interval: String,

    /// Count eligible rows without deleting or archiving
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_mail_from")]
    pub from: String,
}

fn default_true() -> bool {
    true
}
fn default_port() -> u16 {
    8470
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_public_url() -> String {
    "${CASEBUILDER_PUBLIC_URL}".to_string()
}
fn default_busy_timeout_ms() -> u64 {
    5000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_session_secret() -> String {
    "${CASEBUILDER_SESSION_SECRET}".to_string()
}
fn default_api_token_ttl_days() -> u32 {
    90
}
fn default_break_glass_key() -> String {
    "${CASEBUILDER_BREAK_GLASS_KEY}".to_string()
}
fn default_break_glass_session_minutes() -> u32 {
    60
}
fn default_break_glass_max_failed() -> u32 {
    5
}
fn default_break_glass_lockout_minutes() -> u32 {
    15
}
fn default_gdpr_token_ttl_hours() -> u32 {
    48
}
fn default_retention_interval() -> String {
    "24h".to_string()
}
fn default_mail_from() -> String {
    "case-studies@localhost".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            public_url: default_public_url(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            session_secret: default_session_secret(),
            strict_secrets: default_true(),
            api_token_ttl_days: default_api_token_ttl_days(),
        }
    }
}

impl Default for BreakGlassConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key: default_break_glass_key(),
            session_minutes: default_break_glass_session_minutes(),
            max_failed_attempts: default_break_glass_max_failed(),
            lockout_minutes: default_break_glass_lockout_minutes(),
        }
    }
}

impl Default for GdprConfig {
    fn default() -> Self {
        Self {
            token_ttl_hours: default_gdpr_token_ttl_hours(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval: default_retention_interval(),
            dry_run: false,
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: default_mail_from(),
        }
    }
}

impl Config {
    /// Load from the default XDG location, creating a template on first run.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from an explicit file (`--config`) or the default location.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| paths.config_file());

        if !path.exists() {
            if explicit.is_some() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            let mut config = Config {
                paths,
                source: Some(path),
                ..Config::default()
            };
            config.save_with_template()?;
            config.expand_env_vars();
            return Ok(config);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.paths = paths;
        config.source = Some(path);
        config.expand_env_vars();

        Ok(config)
    }

    /// Parse config text without touching the filesystem or environment.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> Result<()> {
        let path = self.file_path();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = self.file_path();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn file_path(&self) -> PathBuf {
        self.source
            .clone()
            .unwrap_or_else(|| self.paths.config_file())
    }

    /// Resolved database location. `:memory:` is passed through.
    pub fn database_path(&self) -> PathBuf {
        let raw = self.database.path.trim();
        if raw.is_empty() {
            return self.paths.database_file();
        }
        if raw == ":memory:" {
            return PathBuf::from(raw);
        }
        PathBuf::from(shellexpand::tilde(raw).to_string())
    }

    fn expand_env_vars(&mut self) {
        self.security.session_secret = expand_env(&self.security.session_secret);
        self.break_glass.key = expand_env(&self.break_glass.key);
        self.server.public_url = expand_env(&self.server.public_url);
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["server", "port"] => Ok(self.server.port.to_string()),
            ["server", "bind"] => Ok(self.server.bind.clone()),
            ["server", "public_url"] => Ok(self.server.public_url.clone()),
            ["database", "path"] => Ok(self.database.path.clone()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "format"] => Ok(self.logging.format.clone()),
            ["security", "strict_secrets"] => Ok(self.security.strict_secrets.to_string()),
            ["security", "api_token_ttl_days"] => {
                Ok(self.security.api_token_ttl_days.to_string())
            }
            ["break_glass", "enabled"] => Ok(self.break_glass.enabled.to_string()),
            ["break_glass", "session_minutes"] => Ok(self.break_glass.session_minutes.to_string()),
            ["gdpr", "token_ttl_hours"] => Ok(self.gdpr.token_ttl_hours.to_string()),
            ["retention", "enabled"] => Ok(self.retention.enabled.to_string()),
            ["retention", "interval"] => Ok(self.retention.interval.clone()),
            ["retention", "dry_run"] => Ok(self.retention.dry_run.to_string()),
            ["mail", "from"] => Ok(self.mail.from.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["server", "port"] => self.server.port = value.parse()?,
            ["server", "bind"] => self.server.bind = value.to_string(),
            ["server", "public_url"] => self.server.public_url = value.to_string(),
            ["database", "path"] => self.database.path = value.to_string(),
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "format"] => match value {
                "text" | "json" => self.logging.format = value.to_string(),
                _ => anyhow::bail!("logging.format must be \"text\" or \"json\""),
            },
            ["security", "strict_secrets"] => self.security.strict_secrets = value.parse()?,
            ["security", "api_token_ttl_days"] => {
                self.security.api_token_ttl_days = value.parse()?
            }
            ["break_glass", "enabled"] => self.break_glass.enabled = value.parse()?,
            ["break_glass", "session_minutes"] => {
                self.break_glass.session_minutes = value.parse()?
            }
            ["gdpr", "token_ttl_hours"] => self.gdpr.token_ttl_hours = value.parse()?,
            ["retention", "enabled"] => self.retention.enabled = value.parse()?,
            ["retention", "interval"] => {
                parse_duration(value).map_err(|e| anyhow::anyhow!(e))?;
                self.retention.interval = value.to_string()
            }
            ["retention", "dry_run"] => self.retention.dry_run = value.parse()?,
            ["mail", "from"] => self.mail.from = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

fn expand_env(s: &str) -> String {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else if let Some(var_name) = s.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else {
        s.to_string()
    }
}

/// Name of the variable when `s` is still a `${VAR}` or `$VAR` reference,
/// i.e. expansion found the variable unset.
pub fn env_reference(s: &str) -> Option<&str> {
    s.strip_prefix("${")
        .and_then(|s| s.strip_suffix('}'))
        .or_else(|| s.strip_prefix('$'))
        .filter(|name| {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// The value, unless it is empty or an unexpanded env reference.
pub fn resolved(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty() && env_reference(s).is_none()).then_some(s)
}

/// Default config template with helpful comments (used for first-time setup)
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Case Study Builder configuration
# Auto-created on first run. Edit as needed.

[server]
port = 8470
bind = "127.0.0.1"
public_url = "${CASEBUILDER_PUBLIC_URL}"
# cors_origins = ["https://casestudies.example.com"]

[database]
# Empty uses the XDG data dir (~/.local/share/casebuilder/casebuilder.sqlite)
# path = "/var/lib/casebuilder/casebuilder.sqlite"
busy_timeout_ms = 5000

[logging]
level = "info"
format = "text"                  # text | json

[security]
session_secret = "${CASEBUILDER_SESSION_SECRET}"
strict_secrets = true
api_token_ttl_days = 90

# Emergency admin access when normal auth is unavailable
[break_glass]
enabled = false
key = "${CASEBUILDER_BREAK_GLASS_KEY}"
session_minutes = 60
max_failed_attempts = 5
lockout_minutes = 15

[gdpr]
token_ttl_hours = 48

[retention]
enabled = true
interval = "24h"
dry_run = false

[mail]
from = "case-studies@localhost"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied_for_empty_file() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, 8470);
        assert_eq!(config.logging.format, "text");
        assert!(!config.break_glass.enabled);
        assert_eq!(config.break_glass.session_minutes, 60);
        assert_eq!(config.gdpr.token_ttl_hours, 48);
        assert_eq!(config.retention.interval, "24h");
        assert!(config.security.strict_secrets);
    }

    #[test]
    fn template_parses() {
        let config = Config::from_toml(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.break_glass.max_failed_attempts, 5);
        assert_eq!(config.retention.interval, "24h");
        assert!(parse_duration(&config.retention.interval).is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [break_glass]
            enabled = true
            session_minutes = 30
            "#,
        )
        .unwrap();
        assert!(config.break_glass.enabled);
        assert_eq!(config.break_glass.session_minutes, 30);
        assert_eq!(config.break_glass.lockout_minutes, 15);
    }

    #[test]
    fn get_and_set_values() {
        let mut config = Config::default();
        config.set_value("server.port", "9000").unwrap();
        config.set_value("retention.interval", "12h").unwrap();
        config.set_value("logging.format", "json").unwrap();

        assert_eq!(config.get_value("server.port").unwrap(), "9000");
        assert_eq!(config.get_value("retention.interval").unwrap(), "12h");
        assert_eq!(config.get_value("logging.format").unwrap(), "json");
        assert!(config.set_value("logging.format", "xml").is_err());
        assert!(config.set_value("retention.interval", "soon").is_err());
        assert!(config.get_value("nope.nope").is_err());
    }

    #[test]
    fn database_path_resolution() {
        let mut config = Config::default();
        assert_eq!(config.database_path(), config.paths.database_file());

        config.database.path = ":memory:".to_string();
        assert_eq!(config.database_path(), PathBuf::from(":memory:"));

        config.database.path = "/srv/cases.sqlite".to_string();
        assert_eq!(config.database_path(), PathBuf::from("/srv/cases.sqlite"));
    }

    #[test]
    fn unset_references_keep_their_text() {
        assert_eq!(expand_env("plain-value"), "plain-value");
        assert_eq!(
            expand_env("${CASEBUILDER_SURELY_UNSET_VAR}"),
            "${CASEBUILDER_SURELY_UNSET_VAR}"
        );
        assert_eq!(
            env_reference("${CASEBUILDER_SURELY_UNSET_VAR}"),
            Some("CASEBUILDER_SURELY_UNSET_VAR")
        );
        assert_eq!(env_reference("$SESSION_SECRET"), Some("SESSION_SECRET"));
        assert_eq!(env_reference("plain-value"), None);
        assert_eq!(resolved("${CASEBUILDER_SURELY_UNSET_VAR}"), None);
        assert_eq!(resolved(" https://cases.example.com "), Some("https://cases.example.com"));
    }
}
