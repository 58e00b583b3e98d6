//! Break-glass emergency access.
//!
//! An operator holding the configured break-glass key can obtain a
//! short-lived admin session when normal sign-in is unavailable. The key
//! is compared through HMAC tag verification so the comparison time does
//! not depend on how many leading bytes match. Every grant, denial,
//! revocation and request made under a session is written to the audit log.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::tokens::{TokenHasher, generate_token};
use crate::audit::{self, Actor, ActorType, AuditAction, AuditEvent};
use crate::config::{BreakGlassConfig, resolved};
use crate::db::{self, Database};
use crate::error::{Error, Result};

pub const MAX_SESSION_MINUTES: u32 = 240;
const RESOURCE: &str = "break_glass_session";

/// Issued once on a successful grant. The token is never stored.
#[derive(Debug, Clone, Serialize)]
pub struct Grant {
    pub session_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakGlassSession {
    pub id: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub reason: Option<String>,
}

pub struct BreakGlass {
    db: Database,
    hasher: TokenHasher,
    /// HMAC of the configured key; `None` when break-glass is off.
    key_hash: Option<String>,
    session_minutes: u32,
    max_failed_attempts: u32,
    lockout_minutes: u32,
}

impl BreakGlass {
    pub fn new(db: Database, hasher: TokenHasher, config: &BreakGlassConfig) -> Self {
        let key_hash = if !config.enabled {
            None
        } else if resolved(&config.key).is_none() {
            warn!("break_glass.enabled is set but no key is configured; access stays disabled");
            None
        } else {
            Some(hasher.hash(&config.key))
        };

        Self {
            db,
            hasher,
            key_hash,
            session_minutes: config.session_minutes.clamp(1, MAX_SESSION_MINUTES),
            max_failed_attempts: config.max_failed_attempts.max(1),
            lockout_minutes: config.lockout_minutes,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.key_hash.is_some()
    }

    pub fn authenticate(&self, key: &str, ip: Option<&str>, reason: Option<&str>) -> Result<Grant> {
        self.authenticate_at(key, ip, reason, db::now())
    }

    pub fn authenticate_at(
        &self,
        key: &str,
        ip: Option<&str>,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Grant> {
        let Some(key_hash) = &self.key_hash else {
            return Err(Error::Disabled("break-glass access".into()));
        };

        let grant = Grant {
            session_id: uuid::Uuid::new_v4().to_string(),
            token: generate_token(),
            expires_at: now + Duration::minutes(i64::from(self.session_minutes)),
        };
        let stamp = db::ts(now);

        // Lockout check and attempt insert run under one write lock.
        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if let Some(until) = self.locked_until(&tx, now)? {
                deny(&tx, ip, "locked_out", now, false)?;
                tx.commit()?;
                return Err(Error::LockedOut { until: db::ts(until) });
            }

            if !self.hasher.verify(key, key_hash) {
                deny(&tx, ip, "invalid_key", now, true)?;
                tx.commit()?;
                warn!("Break-glass key rejected (ip: {})", ip.unwrap_or("unknown"));
                return Err(Error::Unauthorized);
            }

            tx.execute(
                "INSERT INTO break_glass_sessions
                    (id, token_hash, granted_at, expires_at, ip_address, reason, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?3)",
                params![
                    grant.session_id,
                    self.hasher.hash(&grant.token),
                    stamp,
                    db::ts(grant.expires_at),
                    ip,
                    reason
                ],
            )?;
            tx.execute(
                "INSERT INTO break_glass_attempts (succeeded, ip_address, attempted_at)
                 VALUES (1, ?1, ?2)",
                params![ip, stamp],
            )?;
            audit::append_with(
                &tx,
                &AuditEvent::new(
                    AuditAction::BreakGlassGranted,
                    Actor::break_glass(&grant.session_id),
                    RESOURCE,
                )
                .resource(&grant.session_id)
                .metadata(json!({
                    "expires_at": db::ts(grant.expires_at),
                    "reason": reason,
                }))
                .ip(ip.map(str::to_string)),
                now,
            )?;
            tx.commit()?;
            Ok(())
        })?;

        info!(
            "Break-glass session {} granted until {}",
            grant.session_id, grant.expires_at
        );
        Ok(grant)
    }

    /// Active (unexpired, unrevoked) session for a bearer token.
    pub fn validate(&self, token: &str) -> Result<Option<BreakGlassSession>> {
        self.validate_at(token, db::now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Option<BreakGlassSession>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let hash = self.hasher.hash(token);
        let session = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, granted_at, expires_at, revoked_at, ip_address, reason
                     FROM break_glass_sessions
                     WHERE token_hash = ?1 AND revoked_at IS NULL AND expires_at > ?2",
                    params![hash, db::ts(now)],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, Option<String>>(5)?,
                        ))
                    },
                )
                .optional()?)
        })?;

        session
            .map(|(id, granted, expires, revoked, ip_address, reason)| {
                Ok(BreakGlassSession {
                    id,
                    granted_at: db::parse_ts(&granted)?,
                    expires_at: db::parse_ts(&expires)?,
                    revoked_at: db::parse_opt_ts(revoked)?,
                    ip_address,
                    reason,
                })
            })
            .transpose()
    }

    /// Revoke the session for `token`. Returns false if no active session
    /// matched.
    pub fn revoke(&self, token: &str, ip: Option<&str>) -> Result<bool> {
        let now = db::now();
        let Some(session) = self.validate_at(token, now)? else {
            return Ok(false);
        };

        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "UPDATE break_glass_sessions SET revoked_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![db::ts(now), session.id],
            )?;
            audit::append_with(
                &tx,
                &AuditEvent::new(
                    AuditAction::BreakGlassRevoked,
                    Actor::break_glass(&session.id),
                    RESOURCE,
                )
                .resource(&session.id)
                .ip(ip.map(str::to_string)),
                now,
            )?;
            tx.commit()?;
            Ok(())
        })?;

        info!("Break-glass session {} revoked", session.id);
        Ok(true)
    }

    /// Record an API request made under a break-glass session.
    pub fn record_access(
        &self,
        audit: &audit::AuditLogger,
        session_id: &str,
        method: &str,
        path: &str,
        ip: Option<String>,
    ) {
        audit.record(
            AuditEvent::new(
                AuditAction::BreakGlassAccess,
                Actor::break_glass(session_id),
                RESOURCE,
            )
            .resource(session_id)
            .metadata(json!({ "method": method, "path": path }))
            .ip(ip),
        );
    }

    /// End of the current lockout window, if the failure threshold is met.
    fn locked_until(&self, conn: &Connection, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let window = Duration::minutes(i64::from(self.lockout_minutes));
        let since = db::ts(now - window);
        let (failures, oldest): (u32, Option<String>) = conn.query_row(
            "SELECT COUNT(*), MIN(attempted_at) FROM break_glass_attempts
             WHERE succeeded = 0 AND attempted_at >= ?1",
            params![since],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        if failures < self.max_failed_attempts {
            return Ok(None);
        }
        let oldest = db::parse_opt_ts(oldest)?.unwrap_or(now);
        Ok(Some(oldest + window))
    }
}

fn deny(
    conn: &Connection,
    ip: Option<&str>,
    why: &str,
    now: DateTime<Utc>,
    count_attempt: bool,
) -> Result<()> {
    if count_attempt {
        conn.execute(
            "INSERT INTO break_glass_attempts (succeeded, ip_address, attempted_at)
             VALUES (0, ?1, ?2)",
            params![ip, db::ts(now)],
        )?;
    }
    audit::append_with(
        conn,
        &AuditEvent::new(
            AuditAction::BreakGlassDenied,
            Actor {
                kind: ActorType::BreakGlass,
                id: None,
            },
            RESOURCE,
        )
        .metadata(json!({ "reason": why }))
        .ip(ip.map(str::to_string)),
        now,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditLogger, AuditQuery};

    const KEY: &str = "break-glass-key-that-is-long-enough-0001";

    fn setup(enabled: bool) -> (BreakGlass, AuditLogger) {
        let db = Database::open_in_memory().unwrap();
        let config = BreakGlassConfig {
            enabled,
            key: KEY.to_string(),
            session_minutes: 60,
            max_failed_attempts: 3,
            lockout_minutes: 15,
        };
        let hasher = TokenHasher::new("session-secret-for-break-glass-tests").unwrap();
        (
            BreakGlass::new(db.clone(), hasher, &config),
            AuditLogger::new(db),
        )
    }

    fn actions(audit: &AuditLogger) -> Vec<AuditAction> {
        audit
            .query(&AuditQuery::default())
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect()
    }

    #[test]
    fn disabled_rejects_everything() {
        let (bg, _) = setup(false);
        assert!(matches!(
            bg.authenticate(KEY, None, None),
            Err(Error::Disabled(_))
        ));
        assert!(bg.validate("anything").unwrap().is_none());
    }

    #[test]
    fn wrong_key_denied_and_audited() {
        let (bg, audit) = setup(true);
        assert!(matches!(
            bg.authenticate("wrong", Some("10.0.0.1"), None),
            Err(Error::Unauthorized)
        ));
        let entries = audit.query(&AuditQuery::default()).unwrap();
        assert_eq!(entries[0].action, AuditAction::BreakGlassDenied);
        assert_eq!(entries[0].ip_address.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn grant_validates_until_expiry() {
        let (bg, audit) = setup(true);
        let now = Utc::now();
        let grant = bg
            .authenticate_at(KEY, Some("10.0.0.1"), Some("SSO outage"), now)
            .unwrap();

        let session = bg.validate_at(&grant.token, now).unwrap().unwrap();
        assert_eq!(session.id, grant.session_id);
        assert_eq!(session.reason.as_deref(), Some("SSO outage"));

        let later = now + Duration::minutes(61);
        assert!(bg.validate_at(&grant.token, later).unwrap().is_none());
        assert_eq!(actions(&audit), vec![AuditAction::BreakGlassGranted]);
    }

    #[test]
    fn session_length_is_capped() {
        let db = Database::open_in_memory().unwrap();
        let config = BreakGlassConfig {
            enabled: true,
            key: KEY.to_string(),
            session_minutes: 10_000,
            max_failed_attempts: 3,
            lockout_minutes: 15,
        };
        let bg = BreakGlass::new(db, TokenHasher::new("secret").unwrap(), &config);
        let now = Utc::now();
        let grant = bg.authenticate_at(KEY, None, None, now).unwrap();
        assert_eq!(
            grant.expires_at,
            now + Duration::minutes(i64::from(MAX_SESSION_MINUTES))
        );
    }

    #[test]
    fn lockout_after_repeated_failures() {
        let (bg, _) = setup(true);
        let now = Utc::now();
        for _ in 0..3 {
            assert!(bg.authenticate_at("nope", None, None, now).is_err());
        }

        // Even the right key is refused while locked out
        assert!(matches!(
            bg.authenticate_at(KEY, None, None, now),
            Err(Error::LockedOut { .. })
        ));

        // Window has passed
        let later = now + Duration::minutes(16);
        assert!(bg.authenticate_at(KEY, None, None, later).is_ok());
    }

    #[test]
    fn parallel_guesses_stop_at_threshold() {
        let db = Database::open_in_memory().unwrap();
        let config = BreakGlassConfig {
            enabled: true,
            key: KEY.to_string(),
            session_minutes: 60,
            max_failed_attempts: 3,
            lockout_minutes: 15,
        };
        let bg = BreakGlass::new(
            db.clone(),
            TokenHasher::new("session-secret-for-break-glass-tests").unwrap(),
            &config,
        );
        let now = Utc::now();
        let barrier = std::sync::Barrier::new(8);

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        bg.authenticate_at("guess", Some("10.0.0.9"), None, now)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let denied = results
            .iter()
            .filter(|r| matches!(r, Err(Error::Unauthorized)))
            .count();
        let locked = results
            .iter()
            .filter(|r| matches!(r, Err(Error::LockedOut { .. })))
            .count();
        assert_eq!((denied, locked), (3, 5));

        let failures: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM break_glass_attempts WHERE succeeded = 0",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(failures, 3);
    }

    #[test]
    fn revoke_ends_session() {
        let (bg, audit) = setup(true);
        let grant = bg.authenticate(KEY, None, None).unwrap();

        assert!(bg.revoke(&grant.token, None).unwrap());
        assert!(bg.validate(&grant.token).unwrap().is_none());
        assert!(!bg.revoke(&grant.token, None).unwrap());
        assert_eq!(
            actions(&audit),
            vec![AuditAction::BreakGlassRevoked, AuditAction::BreakGlassGranted]
        );
    }

    #[test]
    fn access_is_recorded() {
        let (bg, audit) = setup(true);
        let grant = bg.authenticate(KEY, None, None).unwrap();
        bg.record_access(&audit, &grant.session_id, "GET", "/api/audit", None);

        let entries = audit.query(&AuditQuery::default()).unwrap();
        assert_eq!(entries[0].action, AuditAction::BreakGlassAccess);
        assert_eq!(
            entries[0].metadata.as_ref().unwrap()["path"],
            json!("/api/audit")
        );
    }
}
