//! Service wiring shared by the HTTP server and the operator CLI.

pub mod http;

pub use http::{Server, router};

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditLogger;
use crate::cases::CaseStore;
use crate::concurrency::JobLock;
use crate::config::{Config, env_reference, resolved};
use crate::db::Database;
use crate::gdpr::GdprService;
use crate::mail::{Mailer, OutboxMailer};
use crate::retention::{PolicyStore, RetentionEngine};
use crate::security::{BreakGlass, TokenHasher};
use crate::users::UserStore;

/// Every service, built once from the configuration.
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub audit: AuditLogger,
    pub users: UserStore,
    pub cases: CaseStore,
    pub policies: PolicyStore,
    pub retention: RetentionEngine,
    pub gdpr: GdprService,
    pub break_glass: BreakGlass,
    pub retention_lock: JobLock,
}

impl AppState {
    /// Open the configured database and build the services.
    pub fn open(config: &Config) -> Result<Self> {
        let path = config.database_path();
        let db = Database::open(&path, Duration::from_millis(config.database.busy_timeout_ms))
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        let lock = JobLock::new(&config.paths.retention_lock())?;
        Self::with_database(config, db, lock)
    }

    pub fn with_database(config: &Config, db: Database, retention_lock: JobLock) -> Result<Self> {
        if let Some(var) = env_reference(&config.security.session_secret) {
            anyhow::bail!("security.session_secret references unset environment variable {}", var);
        }
        let hasher = TokenHasher::new(&config.security.session_secret)
            .context("security.session_secret is not usable")?;
        let audit = AuditLogger::new(db.clone());
        let mailer: Arc<dyn Mailer> = Arc::new(OutboxMailer::new(db.clone(), &config.mail.from));
        let base_url = base_url(config);

        let users = UserStore::new(
            db.clone(),
            audit.clone(),
            hasher.clone(),
            config.security.api_token_ttl_days,
        );
        let cases = CaseStore::new(
            db.clone(),
            audit.clone(),
            users.clone(),
            mailer.clone(),
            &base_url,
        );
        let retention = RetentionEngine::new(db.clone(), audit.clone());
        let policies = retention.policies().clone();
        policies.seed_defaults()?;
        let gdpr = GdprService::new(
            db.clone(),
            audit.clone(),
            hasher.clone(),
            mailer,
            &base_url,
            config.gdpr.token_ttl_hours,
        );
        let break_glass = BreakGlass::new(db.clone(), hasher, &config.break_glass);

        Ok(Self {
            config: config.clone(),
            db,
            audit,
            users,
            cases,
            policies,
            retention,
            gdpr,
            break_glass,
            retention_lock,
        })
    }
}

/// Base for links in e-mails; falls back to the listen address when no
/// public URL is configured.
pub fn base_url(config: &Config) -> String {
    match resolved(&config.server.public_url) {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => format!("http://{}:{}", config.server.bind, config.server.port),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TEST_SECRET: &str = "server-test-secret-0123456789abcdefgh";

    pub(crate) fn state_with(
        dir: &std::path::Path,
        tweak: impl FnOnce(&mut Config),
    ) -> Arc<AppState> {
        let mut config = Config::default();
        config.security.session_secret = TEST_SECRET.to_string();
        config.server.public_url = "https://cases.example.com".to_string();
        tweak(&mut config);
        let lock = JobLock::new(&dir.join("retention.lock")).unwrap();
        Arc::new(
            AppState::with_database(&config, Database::open_in_memory().unwrap(), lock).unwrap(),
        )
    }

    #[test]
    fn base_url_falls_back_to_listen_address() {
        let mut config = Config::default();
        config.server.public_url = String::new();
        assert_eq!(base_url(&config), "http://127.0.0.1:8470");

        config.server.public_url = "https://cases.example.com/".to_string();
        assert_eq!(base_url(&config), "https://cases.example.com");
    }

    #[test]
    fn empty_secret_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.security.session_secret = String::new();
        let lock = JobLock::new(&tmp.path().join("retention.lock")).unwrap();
        assert!(
            AppState::with_database(&config, Database::open_in_memory().unwrap(), lock).is_err()
        );
    }

    #[test]
    fn policies_are_seeded() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), |_| {});
        assert_eq!(state.policies.list().unwrap().len(), 7);
    }
}
