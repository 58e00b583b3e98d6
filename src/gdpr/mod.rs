//! GDPR data-subject requests: erasure and access.
//!
//! Erasure requests move through
//!
//! ```text
//!   Pending ──verify──► Verified ──process──► InProgress ──► Completed
//!      │                   │                      │
//!      └──cancel/reject────┴──► Cancelled / Rejected   └─(failure)─► Verified
//! ```
//!
//! A user has at most one open (Pending, Verified, InProgress) request.
//! Verification proves control of the account's mailbox: the token is sent
//! by e-mail and only its HMAC is stored. Processing anonymizes the user in
//! a single transaction; see [`anonymize`].

mod anonymize;
mod export;

pub use anonymize::AnonymizationSummary;
pub use export::UserDataExport;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::{self, Actor, AuditAction, AuditEvent, AuditLogger};
use crate::db::{self, Database};
use crate::error::{Error, ParseEnumError, Result};
use crate::mail::{self, Email, Mailer, Template};
use crate::security::{TokenHasher, generate_token};
use crate::users::{BREAK_GLASS_USER_ID, Principal, get_user};

const RESOURCE: &str = "gdpr_request";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GdprStatus {
    Pending,
    Verified,
    InProgress,
    Completed,
    Cancelled,
    Rejected,
}

impl GdprStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Rejected)
    }
}

impl FromStr for GdprStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "rejected" => Ok(Self::Rejected),
            _ => Err(ParseEnumError::new("gdpr status", s)),
        }
    }
}

impl std::fmt::Display for GdprStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletionRequest {
    pub id: String,
    pub user_id: String,
    pub status: GdprStatus,
    pub reason: Option<String>,
    pub token_expires_at: DateTime<Utc>,
    pub requested_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub last_error: Option<String>,
    pub summary: Option<AnonymizationSummary>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    token_hash: String,
}

const REQUEST_COLUMNS: &str = "id, user_id, status, reason, token_hash, token_expires_at, \
     requested_at, verified_at, started_at, completed_at, processed_by, rejection_reason, \
     last_error, summary, updated_at";

impl DeletionRequest {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get(2)?;
        let summary: Option<String> = row.get(13)?;
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            status: status.parse().map_err(|e| db::conversion_error(2, e))?,
            reason: row.get(3)?,
            token_hash: row.get(4)?,
            token_expires_at: db::ts_column(row, 5)?,
            requested_at: db::ts_column(row, 6)?,
            verified_at: db::opt_ts_column(row, 7)?,
            started_at: db::opt_ts_column(row, 8)?,
            completed_at: db::opt_ts_column(row, 9)?,
            processed_by: row.get(10)?,
            rejection_reason: row.get(11)?,
            last_error: row.get(12)?,
            summary: summary
                .map(|s| serde_json::from_str(&s).map_err(|e| db::conversion_error(13, e)))
                .transpose()?,
            updated_at: db::ts_column(row, 14)?,
        })
    }

    fn is_owned_by(&self, p: &Principal) -> bool {
        self.user_id == p.id()
    }
}

fn load(conn: &Connection, id: &str) -> Result<DeletionRequest> {
    conn.query_row(
        &format!(
            "SELECT {} FROM gdpr_deletion_requests WHERE id = ?1",
            REQUEST_COLUMNS
        ),
        params![id],
        DeletionRequest::from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found(format!("gdpr request {}", id)))
}

fn set_status(conn: &Connection, id: &str, status: GdprStatus, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE gdpr_deletion_requests SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), db::ts(now), id],
    )?;
    Ok(())
}

/// Outbox reference for a request's verification e-mail.
fn mail_reference(id: &str) -> String {
    format!("{}:{}", RESOURCE, id)
}

fn operator_actor(by: Option<&Principal>) -> Actor {
    by.map(Principal::actor).unwrap_or_else(Actor::system)
}

#[derive(Clone)]
pub struct GdprService {
    db: Database,
    audit: AuditLogger,
    hasher: TokenHasher,
    mailer: Arc<dyn Mailer>,
    base_url: String,
    token_ttl: Duration,
}

impl GdprService {
    pub fn new(
        db: Database,
        audit: AuditLogger,
        hasher: TokenHasher,
        mailer: Arc<dyn Mailer>,
        base_url: &str,
        token_ttl_hours: u32,
    ) -> Self {
        Self {
            db,
            audit,
            hasher,
            mailer,
            base_url: base_url.to_string(),
            token_ttl: Duration::hours(i64::from(token_ttl_hours.max(1))),
        }
    }

    /// Open an erasure request for the caller. Returns the request and the
    /// verification token (also e-mailed to the user).
    pub fn create_request(
        &self,
        p: &Principal,
        reason: Option<&str>,
    ) -> Result<(DeletionRequest, String)> {
        if p.id() == BREAK_GLASS_USER_ID || p.break_glass_session.is_some() {
            return Err(Error::forbidden("break-glass sessions cannot file GDPR requests"));
        }
        let token = generate_token();
        let now = db::now();
        let id = uuid::Uuid::new_v4().to_string();
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());

        let request = self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let user = get_user(&tx, p.id())?;
            if user.anonymized_at.is_some() {
                return Err(Error::forbidden("account already anonymized"));
            }
            let open: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM gdpr_deletion_requests
                 WHERE user_id = ?1 AND status IN ('pending', 'verified', 'in_progress'))",
                params![p.id()],
                |row| row.get(0),
            )?;
            if open {
                return Err(Error::Conflict(
                    "an open deletion request already exists".into(),
                ));
            }

            tx.execute(
                "INSERT INTO gdpr_deletion_requests
                    (id, user_id, status, reason, token_hash, token_expires_at, requested_at, updated_at)
                 VALUES (?1, ?2, 'pending', ?3, ?4, ?5, ?6, ?6)",
                params![
                    id,
                    p.id(),
                    reason,
                    self.hasher.hash(&token),
                    db::ts(now + self.token_ttl),
                    db::ts(now)
                ],
            )?;
            audit::append_with(
                &tx,
                &AuditEvent::new(AuditAction::GdprRequestCreated, p.actor(), RESOURCE)
                    .resource(&id)
                    .metadata(json!({ "reason": reason })),
                now,
            )?;
            let request = load(&tx, &id)?;
            tx.commit()?;
            Ok(request)
        })?;

        let email = Email::compose(
            &p.user.email,
            &Template::GdprVerification {
                request_id: &request.id,
                token: &token,
                expires_at: request.token_expires_at,
            },
            &self.base_url,
        )
        .reference(mail_reference(&request.id));
        if let Err(e) = self.mailer.send(&email) {
            warn!("Failed to queue GDPR verification e-mail: {}", e);
        }

        info!("GDPR deletion request {} opened by {}", request.id, p.id());
        Ok((request, token))
    }

    pub fn verify(&self, id: &str, token: &str) -> Result<DeletionRequest> {
        self.verify_at(id, token, db::now())
    }

    pub fn verify_at(&self, id: &str, token: &str, now: DateTime<Utc>) -> Result<DeletionRequest> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let request = load(&tx, id)?;
            if request.status != GdprStatus::Pending {
                return Err(Error::transition("verify", request.status));
            }
            if !self.hasher.verify(token, &request.token_hash) {
                return Err(Error::forbidden("invalid verification token"));
            }
            if now >= request.token_expires_at {
                return Err(Error::TokenExpired);
            }

            tx.execute(
                "UPDATE gdpr_deletion_requests
                 SET status = 'verified', verified_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![db::ts(now), id],
            )?;
            mail::redact_reference(&tx, &mail_reference(id), now)?;
            audit::append_with(
                &tx,
                &AuditEvent::new(
                    AuditAction::GdprRequestVerified,
                    Actor::user(&request.user_id),
                    RESOURCE,
                )
                .resource(id),
                now,
            )?;
            let request = load(&tx, id)?;
            tx.commit()?;
            Ok(request)
        })
    }

    /// Anonymize the requesting user. `by` is `None` for operator (CLI)
    /// processing; otherwise it must be an admin.
    pub fn process(&self, by: Option<&Principal>, id: &str) -> Result<DeletionRequest> {
        if let Some(p) = by {
            p.require_admin()?;
        }
        let actor = operator_actor(by);
        let processor = by.map(|p| p.id().to_string());
        let started = db::now();

        // Claim the request; committed on its own so a crash mid-way leaves
        // a visible InProgress row.
        let request = self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let request = load(&tx, id)?;
            if request.status != GdprStatus::Verified {
                return Err(Error::transition("process", request.status));
            }
            tx.execute(
                "UPDATE gdpr_deletion_requests
                 SET status = 'in_progress', started_at = ?1, processed_by = ?2, updated_at = ?1
                 WHERE id = ?3",
                params![db::ts(started), processor, id],
            )?;
            audit::append_with(
                &tx,
                &AuditEvent::new(AuditAction::GdprDeletionStarted, actor.clone(), RESOURCE)
                    .resource(id),
                started,
            )?;
            tx.commit()?;
            Ok(request)
        })?;

        let outcome = self.db.with_conn(|conn| {
            let now = db::now();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let summary = anonymize::anonymize(&tx, &request.user_id, now)?;
            tx.execute(
                "UPDATE gdpr_deletion_requests
                 SET status = 'completed', completed_at = ?1, summary = ?2, last_error = NULL,
                     updated_at = ?1
                 WHERE id = ?3",
                params![db::ts(now), serde_json::to_string(&summary)?, id],
            )?;
            audit::append_with(
                &tx,
                &AuditEvent::new(AuditAction::GdprDeletionCompleted, actor.clone(), RESOURCE)
                    .resource(id)
                    .metadata(serde_json::to_value(&summary)?),
                now,
            )?;
            tx.commit()?;
            Ok(summary)
        });

        match outcome {
            Ok(summary) => {
                info!(
                    "GDPR request {} completed: {} cases deleted, {} retained",
                    id, summary.cases_deleted, summary.cases_retained
                );
                self.get_unchecked(id)
            }
            Err(e) => {
                warn!("GDPR request {} failed, returning to verified: {}", id, e);
                let message = e.to_string();
                let now = db::now();
                self.db.with_conn(|conn| {
                    conn.execute(
                        "UPDATE gdpr_deletion_requests
                         SET status = 'verified', last_error = ?1, updated_at = ?2 WHERE id = ?3",
                        params![message, db::ts(now), id],
                    )?;
                    Ok(())
                })?;
                self.audit.record(
                    AuditEvent::new(AuditAction::GdprDeletionFailed, actor, RESOURCE)
                        .resource(id)
                        .metadata(json!({ "error": message })),
                );
                Err(e)
            }
        }
    }

    /// Pending/Verified → Cancelled, by the owner or an admin.
    pub fn cancel(&self, p: &Principal, id: &str) -> Result<DeletionRequest> {
        self.close(p, id, GdprStatus::Cancelled, None)
    }

    /// Pending/Verified → Rejected, by an admin with a reason.
    pub fn reject(&self, p: &Principal, id: &str, reason: &str) -> Result<DeletionRequest> {
        p.require_admin()?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::validation("a rejection reason is required"));
        }
        self.close(p, id, GdprStatus::Rejected, Some(reason))
    }

    fn close(
        &self,
        p: &Principal,
        id: &str,
        to: GdprStatus,
        reason: Option<&str>,
    ) -> Result<DeletionRequest> {
        let (verb, action) = match to {
            GdprStatus::Cancelled => ("cancel", AuditAction::GdprRequestCancelled),
            _ => ("reject", AuditAction::GdprRequestRejected),
        };
        let now = db::now();
        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let request = load(&tx, id)?;
            if !request.is_owned_by(p) && !p.user.is_admin() {
                return Err(Error::not_found(format!("gdpr request {}", id)));
            }
            if !matches!(request.status, GdprStatus::Pending | GdprStatus::Verified) {
                return Err(Error::transition(verb, request.status));
            }

            set_status(&tx, id, to, now)?;
            mail::redact_reference(&tx, &mail_reference(id), now)?;
            if let Some(reason) = reason {
                tx.execute(
                    "UPDATE gdpr_deletion_requests SET rejection_reason = ?1 WHERE id = ?2",
                    params![reason, id],
                )?;
            }
            audit::append_with(
                &tx,
                &AuditEvent::new(action, p.actor(), RESOURCE)
                    .resource(id)
                    .before(json!({ "status": request.status }))
                    .after(json!({ "status": to, "reason": reason })),
                now,
            )?;
            let request = load(&tx, id)?;
            tx.commit()?;
            Ok(request)
        })
    }

    pub fn get(&self, p: &Principal, id: &str) -> Result<DeletionRequest> {
        let request = self.get_unchecked(id)?;
        if !request.is_owned_by(p) && !p.user.is_admin() {
            return Err(Error::not_found(format!("gdpr request {}", id)));
        }
        Ok(request)
    }

    fn get_unchecked(&self, id: &str) -> Result<DeletionRequest> {
        self.db.with_conn(|conn| load(conn, id))
    }

    /// All requests for admins and operators (`None`); own requests
    /// otherwise. Newest first.
    pub fn list(&self, by: Option<&Principal>) -> Result<Vec<DeletionRequest>> {
        let only_user = by.filter(|p| !p.user.is_admin()).map(|p| p.id().to_string());
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM gdpr_deletion_requests
                 WHERE ?1 IS NULL OR user_id = ?1
                 ORDER BY requested_at DESC",
                REQUEST_COLUMNS
            ))?;
            let rows = stmt.query_map(params![only_user], DeletionRequest::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Right of access. `by` is `None` for operator export.
    pub fn export_user_data(&self, by: Option<&Principal>, user_id: &str) -> Result<UserDataExport> {
        if let Some(p) = by
            && p.id() != user_id
            && !p.user.is_admin()
        {
            return Err(Error::forbidden("you can only export your own data"));
        }
        let export = self
            .db
            .with_conn(|conn| export::collect(conn, user_id, db::now()))?;
        self.audit.record(
            AuditEvent::new(AuditAction::GdprDataExported, operator_actor(by), "user")
                .resource(user_id)
                .metadata(json!({
                    "case_studies": export.case_studies.len(),
                    "audit_entries": export.audit_entries.len(),
                })),
        );
        Ok(export)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::{MockMailer, OutboxMailer};
    use crate::users::tests::{make, store};
    use crate::users::{Role, UserStore};

    struct Fixture {
        db: Database,
        gdpr: GdprService,
        users: UserStore,
    }

    fn fixture_with(db: Database, mailer: Arc<dyn Mailer>) -> Fixture {
        let users = store(&db);
        let gdpr = GdprService::new(
            db.clone(),
            AuditLogger::new(db.clone()),
            TokenHasher::new("gdpr-test-secret-0123456789abcdefghij").unwrap(),
            mailer,
            "http://localhost:8470",
            48,
        );
        Fixture { db, gdpr, users }
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let outbox = OutboxMailer::new(db.clone(), "case-studies@example.com");
        fixture_with(db, Arc::new(outbox))
    }

    fn count(db: &Database, sql: &str) -> i64 {
        db.with_conn(|conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
            .unwrap()
    }

    #[test]
    fn create_sends_verification_email() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .withf(|email| email.template == "gdpr_verification" && email.to == "u@example.com")
            .times(1)
            .returning(|_| Ok(()));
        let f = fixture_with(Database::open_in_memory().unwrap(), Arc::new(mailer));
        let u = make(&f.users, "u@example.com", Role::Contributor);

        let (request, token) = f.gdpr.create_request(&u, Some("leaving the company")).unwrap();
        assert_eq!(request.status, GdprStatus::Pending);
        assert_eq!(request.reason.as_deref(), Some("leaving the company"));
        assert!(!token.is_empty());
    }

    #[test]
    fn one_open_request_per_user() {
        let f = fixture();
        let u = make(&f.users, "u@example.com", Role::Contributor);
        let (first, _) = f.gdpr.create_request(&u, None).unwrap();
        assert!(matches!(
            f.gdpr.create_request(&u, None),
            Err(Error::Conflict(_))
        ));

        f.gdpr.cancel(&u, &first.id).unwrap();
        assert!(f.gdpr.create_request(&u, None).is_ok());
    }

    #[test]
    fn wrong_and_expired_tokens() {
        let f = fixture();
        let u = make(&f.users, "u@example.com", Role::Contributor);
        let (request, token) = f.gdpr.create_request(&u, None).unwrap();

        assert!(matches!(
            f.gdpr.verify(&request.id, "not-the-token"),
            Err(Error::Forbidden(_))
        ));
        let late = request.token_expires_at + Duration::minutes(1);
        assert!(matches!(
            f.gdpr.verify_at(&request.id, &token, late),
            Err(Error::TokenExpired)
        ));
        assert_eq!(
            f.gdpr.get(&u, &request.id).unwrap().status,
            GdprStatus::Pending
        );

        let verified = f.gdpr.verify(&request.id, &token).unwrap();
        assert_eq!(verified.status, GdprStatus::Verified);
        assert!(matches!(
            f.gdpr.verify(&request.id, &token),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn process_anonymizes_user() {
        let f = fixture();
        let u = make(&f.users, "u@example.com", Role::Contributor);
        let admin = make(&f.users, "admin@example.com", Role::Admin);
        f.users.issue_token(u.id()).unwrap();

        let (request, token) = f.gdpr.create_request(&u, None).unwrap();
        f.gdpr.verify(&request.id, &token).unwrap();

        assert!(matches!(
            f.gdpr.process(Some(&u), &request.id),
            Err(Error::Forbidden(_))
        ));
        let done = f.gdpr.process(Some(&admin), &request.id).unwrap();
        assert_eq!(done.status, GdprStatus::Completed);
        assert_eq!(done.processed_by.as_deref(), Some(admin.id()));
        assert_eq!(done.summary.as_ref().unwrap().sessions_deleted, 1);
        assert_eq!(done.summary.as_ref().unwrap().emails_redacted, 1);

        let user = f.users.get(u.id()).unwrap();
        assert_eq!(user.name, "Deleted User");
        assert_eq!(user.role, Role::Viewer);
        assert!(user.anonymized_at.is_some());
        assert_eq!(count(&f.db, "SELECT COUNT(*) FROM api_sessions"), 0);
        // The verification e-mail was re-pointed and blanked
        assert_eq!(
            count(
                &f.db,
                "SELECT COUNT(*) FROM email_outbox WHERE recipient = 'u@example.com'"
            ),
            0
        );
        assert!(AuditLogger::new(f.db.clone()).verify_chain().unwrap().is_intact());
    }

    fn outbox_body(db: &Database, recipient: &str) -> String {
        db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT body FROM email_outbox WHERE recipient = ?1",
                params![recipient],
                |row| row.get(0),
            )?)
        })
        .unwrap()
    }

    #[test]
    fn verification_mail_is_blanked_once_settled() {
        let f = fixture();
        let verifier = make(&f.users, "v@example.com", Role::Contributor);
        let canceller = make(&f.users, "c@example.com", Role::Contributor);
        let rejected = make(&f.users, "r@example.com", Role::Contributor);
        let admin = make(&f.users, "admin@example.com", Role::Admin);

        let (request, token) = f.gdpr.create_request(&verifier, None).unwrap();
        assert!(outbox_body(&f.db, "v@example.com").contains(&token));
        f.gdpr.verify(&request.id, &token).unwrap();
        assert_eq!(outbox_body(&f.db, "v@example.com"), "");

        let (request, _) = f.gdpr.create_request(&canceller, None).unwrap();
        f.gdpr.cancel(&canceller, &request.id).unwrap();
        assert_eq!(outbox_body(&f.db, "c@example.com"), "");

        let (request, token) = f.gdpr.create_request(&rejected, None).unwrap();
        f.gdpr.reject(&admin, &request.id, "Duplicate").unwrap();
        assert_eq!(outbox_body(&f.db, "r@example.com"), "");
        assert!(matches!(
            f.gdpr.verify(&request.id, &token),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn erasure_leaves_no_name_in_audit_or_mail() {
        use crate::cases::tests::complete_case;
        use crate::cases::{CaseStore, CaseType};

        let f = fixture();
        let cases = CaseStore::new(
            f.db.clone(),
            AuditLogger::new(f.db.clone()),
            f.users.clone(),
            Arc::new(OutboxMailer::new(f.db.clone(), "case-studies@example.com")),
            "http://localhost:8470",
        );
        let author = Principal::user(
            f.users
                .create(None, "ingrid@example.com", "Ingrid Halvorsen", Role::Approver)
                .unwrap(),
        );
        f.users.change_role(None, author.id(), Role::Contributor).unwrap();
        let author = Principal::user(f.users.get(author.id()).unwrap());
        let reviewer = make(&f.users, "reviewer@example.com", Role::Approver);

        let case = cases.create(&author, complete_case(CaseType::Application)).unwrap();
        cases.submit(&author, &case.id).unwrap();
        assert!(outbox_body(&f.db, "reviewer@example.com").contains("Ingrid Halvorsen"));

        let (request, token) = f.gdpr.create_request(&author, None).unwrap();
        f.gdpr.verify(&request.id, &token).unwrap();
        f.gdpr.process(None, &request.id).unwrap();

        assert_eq!(
            count(
                &f.db,
                "SELECT COUNT(*) FROM audit_logs
                 WHERE before_state LIKE '%Ingrid%' OR after_state LIKE '%Ingrid%'
                    OR metadata LIKE '%Ingrid%'"
            ),
            0
        );
        assert_eq!(
            count(&f.db, "SELECT COUNT(*) FROM email_outbox WHERE body LIKE '%Ingrid%'"),
            0
        );

        // The submitted case was erased and a late review cannot bring it back
        assert!(matches!(
            cases.approve(&reviewer, &case.id),
            Err(Error::NotFound(_))
        ));
        assert_eq!(count(&f.db, "SELECT COUNT(*) FROM case_studies"), 0);
    }

    #[test]
    fn process_requires_verified() {
        let f = fixture();
        let u = make(&f.users, "u@example.com", Role::Contributor);
        let (request, _) = f.gdpr.create_request(&u, None).unwrap();
        assert!(matches!(
            f.gdpr.process(None, &request.id),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn failure_rolls_back_to_verified() {
        let f = fixture();
        let u = make(&f.users, "u@example.com", Role::Contributor);
        f.users.issue_token(u.id()).unwrap();
        let (request, token) = f.gdpr.create_request(&u, None).unwrap();
        f.gdpr.verify(&request.id, &token).unwrap();

        f.db
            .with_conn(|conn| Ok(conn.execute_batch("DROP TABLE notifications")?))
            .unwrap();

        assert!(f.gdpr.process(None, &request.id).is_err());
        let after = f.gdpr.get(&u, &request.id).unwrap();
        assert_eq!(after.status, GdprStatus::Verified);
        assert!(after.last_error.is_some());

        // Sessions deleted before the failure were restored by the rollback
        assert_eq!(count(&f.db, "SELECT COUNT(*) FROM api_sessions"), 1);
        assert!(f.users.get(u.id()).unwrap().anonymized_at.is_none());
    }

    #[test]
    fn cancel_and_reject_rules() {
        let f = fixture();
        let u = make(&f.users, "u@example.com", Role::Contributor);
        let other = make(&f.users, "o@example.com", Role::Contributor);
        let admin = make(&f.users, "admin@example.com", Role::Admin);
        let (request, _) = f.gdpr.create_request(&u, None).unwrap();

        assert!(matches!(
            f.gdpr.cancel(&other, &request.id),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            f.gdpr.reject(&u, &request.id, "no"),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            f.gdpr.reject(&admin, &request.id, " "),
            Err(Error::Validation(_))
        ));

        let rejected = f
            .gdpr
            .reject(&admin, &request.id, "Active legal hold")
            .unwrap();
        assert_eq!(rejected.status, GdprStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Active legal hold"));

        assert!(matches!(
            f.gdpr.cancel(&u, &request.id),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn listing_is_scoped() {
        let f = fixture();
        let u = make(&f.users, "u@example.com", Role::Contributor);
        let other = make(&f.users, "o@example.com", Role::Contributor);
        let admin = make(&f.users, "admin@example.com", Role::Admin);
        f.gdpr.create_request(&u, None).unwrap();
        f.gdpr.create_request(&other, None).unwrap();

        assert_eq!(f.gdpr.list(Some(&u)).unwrap().len(), 1);
        assert_eq!(f.gdpr.list(Some(&admin)).unwrap().len(), 2);
        assert_eq!(f.gdpr.list(None).unwrap().len(), 2);
    }
}
