//! Append-only, hash-chained audit log.
//!
//! Every state change in the service (case workflow, user administration,
//! GDPR requests, retention runs, break-glass access) appends one
//! [`AuditEntry`]. Entries form a tamper-evident chain: each stores the
//! SHA-256 of its own canonical content and the content hash of its
//! predecessor. See [`chain`] for the hash rules.
//!
//! # Chain integrity
//!
//! | Check | Where |
//! |-------|-------|
//! | Append reads the tail hash and inserts atomically | `BEGIN IMMEDIATE` in [`AuditLogger::append`] |
//! | Rows cannot be rewritten | `audit_logs_no_update` trigger |
//! | Rows cannot be deleted outside retention pruning | `audit_logs_no_delete` trigger + prune guard |
//! | Pruned prefix stays verifiable | `audit_chain_anchor` row |
//!
//! Callers on a user-facing path use [`AuditLogger::record`], which never
//! fails: an audit write problem is logged and the user action proceeds.

pub mod chain;
mod query;

pub use chain::{BreakKind, ChainBreak, ChainReport, GENESIS_HASH};
pub use query::AuditQuery;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::db::{self, Database};
use crate::error::{ParseEnumError, Result};
use chain::{ChainVerifier, HashedFields};

/// Actions recorded in the audit log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CaseCreated,
    CaseUpdated,
    CaseSubmitted,
    CaseApproved,
    CaseRejected,
    CasePublished,
    CaseDeleted,
    UserCreated,
    UserRoleChanged,
    ApiTokenIssued,
    GdprRequestCreated,
    GdprRequestVerified,
    GdprRequestCancelled,
    GdprRequestRejected,
    GdprDeletionStarted,
    GdprDeletionCompleted,
    GdprDeletionFailed,
    GdprDataExported,
    RetentionPolicyUpdated,
    RetentionCleanup,
    BreakGlassGranted,
    BreakGlassDenied,
    BreakGlassRevoked,
    BreakGlassAccess,
    AuditChainVerified,
}

impl AuditAction {
    pub const ALL: &'static [AuditAction] = &[
        Self::CaseCreated,
        Self::CaseUpdated,
        Self::CaseSubmitted,
        Self::CaseApproved,
        Self::CaseRejected,
        Self::CasePublished,
        Self::CaseDeleted,
        Self::UserCreated,
        Self::UserRoleChanged,
        Self::ApiTokenIssued,
        Self::GdprRequestCreated,
        Self::GdprRequestVerified,
        Self::GdprRequestCancelled,
        Self::GdprRequestRejected,
        Self::GdprDeletionStarted,
        Self::GdprDeletionCompleted,
        Self::GdprDeletionFailed,
        Self::GdprDataExported,
        Self::RetentionPolicyUpdated,
        Self::RetentionCleanup,
        Self::BreakGlassGranted,
        Self::BreakGlassDenied,
        Self::BreakGlassRevoked,
        Self::BreakGlassAccess,
        Self::AuditChainVerified,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CaseCreated => "case_created",
            Self::CaseUpdated => "case_updated",
            Self::CaseSubmitted => "case_submitted",
            Self::CaseApproved => "case_approved",
            Self::CaseRejected => "case_rejected",
            Self::CasePublished => "case_published",
            Self::CaseDeleted => "case_deleted",
            Self::UserCreated => "user_created",
            Self::UserRoleChanged => "user_role_changed",
            Self::ApiTokenIssued => "api_token_issued",
            Self::GdprRequestCreated => "gdpr_request_created",
            Self::GdprRequestVerified => "gdpr_request_verified",
            Self::GdprRequestCancelled => "gdpr_request_cancelled",
            Self::GdprRequestRejected => "gdpr_request_rejected",
            Self::GdprDeletionStarted => "gdpr_deletion_started",
            Self::GdprDeletionCompleted => "gdpr_deletion_completed",
            Self::GdprDeletionFailed => "gdpr_deletion_failed",
            Self::GdprDataExported => "gdpr_data_exported",
            Self::RetentionPolicyUpdated => "retention_policy_updated",
            Self::RetentionCleanup => "retention_cleanup",
            Self::BreakGlassGranted => "break_glass_granted",
            Self::BreakGlassDenied => "break_glass_denied",
            Self::BreakGlassRevoked => "break_glass_revoked",
            Self::BreakGlassAccess => "break_glass_access",
            Self::AuditChainVerified => "audit_chain_verified",
        }
    }
}

impl FromStr for AuditAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("audit action", s))
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who performed an action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    System,
    BreakGlass,
}

impl ActorType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::BreakGlass => "break_glass",
        }
    }
}

impl FromStr for ActorType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            "break_glass" => Ok(Self::BreakGlass),
            _ => Err(ParseEnumError::new("actor type", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub kind: ActorType,
    pub id: Option<String>,
}

impl Actor {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: ActorType::User,
            id: Some(id.into()),
        }
    }

    pub fn system() -> Self {
        Self {
            kind: ActorType::System,
            id: None,
        }
    }

    /// Break-glass actors are identified by emergency session id.
    pub fn break_glass(session_id: impl Into<String>) -> Self {
        Self {
            kind: ActorType::BreakGlass,
            id: Some(session_id.into()),
        }
    }
}

/// An action about to be recorded.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub actor: Actor,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub metadata: Option<Value>,
    pub ip_address: Option<String>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, actor: Actor, resource_type: &str) -> Self {
        Self {
            action,
            actor,
            resource_type: resource_type.to_string(),
            resource_id: None,
            before: None,
            after: None,
            metadata: None,
            ip_address: None,
        }
    }

    pub fn resource(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn before(mut self, state: Value) -> Self {
        self.before = Some(state);
        self
    }

    pub fn after(mut self, state: Value) -> Self {
        self.after = Some(state);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn ip(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }
}

/// A persisted audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the chain (monotonic, gaps only from pruning).
    pub sequence: i64,
    pub id: String,
    pub action: AuditAction,
    pub actor_type: ActorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// RFC 3339 UTC, exactly as hashed.
    pub created_at: String,
    pub previous_hash: String,
    pub content_hash: String,
}

pub(crate) const ENTRY_COLUMNS: &str = "sequence, id, action, actor_type, actor_id, resource_type, \
     resource_id, before_state, after_state, metadata, ip_address, created_at, \
     previous_hash, content_hash";

impl AuditEntry {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let action: String = row.get(2)?;
        let actor_type: String = row.get(3)?;
        Ok(Self {
            sequence: row.get(0)?,
            id: row.get(1)?,
            action: action.parse().map_err(|e| db::conversion_error(2, e))?,
            actor_type: actor_type.parse().map_err(|e| db::conversion_error(3, e))?,
            actor_id: row.get(4)?,
            resource_type: row.get(5)?,
            resource_id: row.get(6)?,
            before: json_column(row, 7)?,
            after: json_column(row, 8)?,
            metadata: json_column(row, 9)?,
            ip_address: row.get(10)?,
            created_at: row.get(11)?,
            previous_hash: row.get(12)?,
            content_hash: row.get(13)?,
        })
    }
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s).map_err(|e| db::conversion_error(idx, e)))
        .transpose()
}

fn json_text(value: Option<&Value>) -> Result<Option<String>> {
    Ok(value.map(serde_json::to_string).transpose()?)
}

/// Handle to the audit log.
#[derive(Clone)]
pub struct AuditLogger {
    db: Database,
}

impl AuditLogger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append an entry, returning it with its chain hashes.
    pub fn append(&self, event: AuditEvent) -> Result<AuditEntry> {
        self.append_at(event, db::now())
    }

    pub fn append_at(&self, event: AuditEvent, now: DateTime<Utc>) -> Result<AuditEntry> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let entry = append_with(&tx, &event, now)?;
            tx.commit()?;
            debug!(
                "Audit #{} {} on {}",
                entry.sequence, entry.action, entry.resource_type
            );
            Ok(entry)
        })
    }

    /// Best-effort append for user-facing paths: failures are logged, never
    /// returned.
    pub fn record(&self, event: AuditEvent) -> Option<AuditEntry> {
        let action = event.action;
        match self.append(event) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Failed to write audit entry for {}: {}", action, e);
                None
            }
        }
    }

    pub fn query(&self, filter: &AuditQuery) -> Result<Vec<AuditEntry>> {
        self.db.with_conn(|conn| filter.run(conn))
    }

    /// Entries where `actor_id` is the actor (GDPR access export).
    pub fn entries_for_actor(&self, actor_id: &str) -> Result<Vec<AuditEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM audit_logs WHERE actor_id = ?1 ORDER BY sequence",
                ENTRY_COLUMNS
            ))?;
            let rows = stmt.query_map(params![actor_id], AuditEntry::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn count(&self) -> Result<i64> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM audit_logs", [], |row| row.get(0))?)
        })
    }

    /// Walk the whole chain in sequence order and report every break.
    pub fn verify_chain(&self) -> Result<ChainReport> {
        self.db.with_conn(|conn| {
            let mut verifier = ChainVerifier::new(read_anchor(conn)?);
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM audit_logs ORDER BY sequence",
                ENTRY_COLUMNS
            ))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                verifier.push(&AuditEntry::from_row(row)?)?;
            }
            Ok(verifier.finish())
        })
    }

    /// Number of entries [`prune_before`](Self::prune_before) would remove.
    pub fn count_prunable(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.db.with_conn(|conn| {
            let Some(last) = last_prunable(conn, cutoff)? else {
                return Ok(0);
            };
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM audit_logs WHERE sequence <= ?1",
                params![last],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    /// Remove the oldest contiguous run of entries created before `cutoff`,
    /// anchoring the chain at the last removed entry.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(last) = last_prunable(&tx, cutoff)? else {
                return Ok(0);
            };
            let anchor: String = tx.query_row(
                "SELECT content_hash FROM audit_logs WHERE sequence = ?1",
                params![last],
                |row| row.get(0),
            )?;

            tx.execute("INSERT INTO audit_prune_guard (id) VALUES (1)", [])?;
            let removed = tx.execute(
                "DELETE FROM audit_logs WHERE sequence <= ?1",
                params![last],
            )?;
            tx.execute("DELETE FROM audit_prune_guard", [])?;
            tx.execute(
                "INSERT INTO audit_chain_anchor (id, anchor_hash, pruned_through, updated_at)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    anchor_hash = excluded.anchor_hash,
                    pruned_through = excluded.pruned_through,
                    updated_at = excluded.updated_at",
                params![anchor, last, db::ts(db::now())],
            )?;
            tx.commit()?;

            debug!("Pruned {} audit entries through #{}", removed, last);
            Ok(removed)
        })
    }

    /// Mark entries created before `cutoff` as archived. Hashed columns are
    /// untouched, so the chain is unaffected.
    pub fn archive_before(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE audit_logs SET archived_at = ?1
                 WHERE archived_at IS NULL AND created_at < ?2",
                params![db::ts(now), db::ts(cutoff)],
            )?)
        })
    }
}

/// Append inside a caller-held transaction.
pub(crate) fn append_with(
    conn: &Connection,
    event: &AuditEvent,
    now: DateTime<Utc>,
) -> Result<AuditEntry> {
    let previous_hash = tail_hash(conn)?;
    let id = uuid::Uuid::new_v4().to_string();
    let created_at = db::ts(now);

    let content_hash = HashedFields {
        id: &id,
        action: event.action.as_str(),
        actor_type: event.actor.kind.as_str(),
        actor_id: event.actor.id.as_deref(),
        resource_type: &event.resource_type,
        resource_id: event.resource_id.as_deref(),
        before: event.before.as_ref(),
        after: event.after.as_ref(),
        metadata: event.metadata.as_ref(),
        ip_address: event.ip_address.as_deref(),
        created_at: &created_at,
        previous_hash: &previous_hash,
    }
    .content_hash()?;

    conn.execute(
        "INSERT INTO audit_logs (id, action, actor_type, actor_id, resource_type, resource_id,
            before_state, after_state, metadata, ip_address, created_at, previous_hash, content_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            id,
            event.action.as_str(),
            event.actor.kind.as_str(),
            event.actor.id,
            event.resource_type,
            event.resource_id,
            json_text(event.before.as_ref())?,
            json_text(event.after.as_ref())?,
            json_text(event.metadata.as_ref())?,
            event.ip_address,
            created_at,
            previous_hash,
            content_hash,
        ],
    )?;

    Ok(AuditEntry {
        sequence: conn.last_insert_rowid(),
        id,
        action: event.action,
        actor_type: event.actor.kind,
        actor_id: event.actor.id.clone(),
        resource_type: event.resource_type.clone(),
        resource_id: event.resource_id.clone(),
        before: event.before.clone(),
        after: event.after.clone(),
        metadata: event.metadata.clone(),
        ip_address: event.ip_address.clone(),
        created_at,
        previous_hash,
        content_hash,
    })
}

/// Hash the next entry must link to.
fn tail_hash(conn: &Connection) -> Result<String> {
    let last: Option<String> = conn
        .query_row(
            "SELECT content_hash FROM audit_logs ORDER BY sequence DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match last {
        Some(hash) => Ok(hash),
        None => Ok(read_anchor(conn)?.unwrap_or_else(|| GENESIS_HASH.to_string())),
    }
}

fn read_anchor(conn: &Connection) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT anchor_hash FROM audit_chain_anchor WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?)
}

/// Highest sequence in the leading run of entries older than `cutoff`.
fn last_prunable(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Option<i64>> {
    let cutoff = db::ts(cutoff);
    Ok(conn.query_row(
        "SELECT MAX(sequence) FROM audit_logs
         WHERE created_at < ?1
           AND sequence < COALESCE(
               (SELECT MIN(sequence) FROM audit_logs WHERE created_at >= ?1),
               9223372036854775807)",
        params![cutoff],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn logger() -> (Database, AuditLogger) {
        let db = Database::open_in_memory().unwrap();
        (db.clone(), AuditLogger::new(db))
    }

    fn event(i: usize) -> AuditEvent {
        AuditEvent::new(AuditAction::CaseUpdated, Actor::user("u1"), "case_study")
            .resource(format!("case-{}", i))
            .after(json!({"title": format!("Liner rebuild {}", i)}))
    }

    #[test]
    fn first_entry_uses_genesis_hash() {
        let (_, log) = logger();
        let entry = log.append(event(0)).unwrap();
        assert_eq!(entry.previous_hash, GENESIS_HASH);
        assert_eq!(entry.sequence, 1);
    }

    #[test]
    fn chain_links_consecutive_entries() {
        let (_, log) = logger();
        let a = log.append(event(0)).unwrap();
        let b = log.append(event(1)).unwrap();
        assert_eq!(b.previous_hash, a.content_hash);

        let report = log.verify_chain().unwrap();
        assert!(report.is_intact(), "{:?}", report.breaks);
        assert_eq!(report.checked, 2);
        assert!(!report.anchored);
    }

    #[test]
    fn updates_are_rejected_by_trigger() {
        let (db, log) = logger();
        log.append(event(0)).unwrap();

        let result = db.with_conn(|conn| {
            Ok(conn.execute("UPDATE audit_logs SET action = 'case_deleted'", [])?)
        });
        assert!(result.is_err());

        let result = db.with_conn(|conn| Ok(conn.execute("DELETE FROM audit_logs", [])?));
        assert!(result.is_err());
        assert_eq!(log.count().unwrap(), 1);
    }

    #[test]
    fn tampered_content_detected() {
        let (db, log) = logger();
        for i in 0..3 {
            log.append(event(i)).unwrap();
        }

        db.with_conn(|conn| {
            conn.execute_batch("DROP TRIGGER audit_logs_no_update")?;
            conn.execute(
                "UPDATE audit_logs SET after_state = '{\"title\":\"forged\"}' WHERE sequence = 2",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let report = log.verify_chain().unwrap();
        assert_eq!(
            report.breaks,
            vec![ChainBreak {
                sequence: 2,
                kind: BreakKind::ContentMismatch
            }]
        );
    }

    #[test]
    fn removed_entry_detected_as_link_break() {
        let (db, log) = logger();
        for i in 0..3 {
            log.append(event(i)).unwrap();
        }

        db.with_conn(|conn| {
            conn.execute_batch("DROP TRIGGER audit_logs_no_delete")?;
            conn.execute("DELETE FROM audit_logs WHERE sequence = 2", [])?;
            Ok(())
        })
        .unwrap();

        let report = log.verify_chain().unwrap();
        assert_eq!(
            report.breaks,
            vec![ChainBreak {
                sequence: 3,
                kind: BreakKind::LinkMismatch
            }]
        );
    }

    #[test]
    fn prune_keeps_chain_verifiable() {
        let (_, log) = logger();
        let now = Utc::now();
        for i in 0..3 {
            log.append_at(event(i), now - Duration::days(400)).unwrap();
        }
        log.append_at(event(3), now - Duration::days(1)).unwrap();

        let cutoff = now - Duration::days(365);
        assert_eq!(log.count_prunable(cutoff).unwrap(), 3);
        assert_eq!(log.prune_before(cutoff).unwrap(), 3);
        assert_eq!(log.count().unwrap(), 1);

        let report = log.verify_chain().unwrap();
        assert!(report.is_intact(), "{:?}", report.breaks);
        assert!(report.anchored);
        assert_eq!(report.first_sequence, Some(4));

        // New entries keep extending the anchored chain
        log.append(event(4)).unwrap();
        assert!(log.verify_chain().unwrap().is_intact());
    }

    #[test]
    fn prune_everything_then_append_links_to_anchor() {
        let (_, log) = logger();
        let now = Utc::now();
        let last = log.append_at(event(0), now - Duration::days(10)).unwrap();

        assert_eq!(log.prune_before(now).unwrap(), 1);
        let next = log.append(event(1)).unwrap();
        assert_eq!(next.previous_hash, last.content_hash);
        assert!(log.verify_chain().unwrap().is_intact());
    }

    #[test]
    fn prune_stops_at_first_recent_entry() {
        let (_, log) = logger();
        let now = Utc::now();
        log.append_at(event(0), now - Duration::days(500)).unwrap();
        log.append_at(event(1), now - Duration::days(5)).unwrap();
        // Out-of-order timestamp after a recent entry stays
        log.append_at(event(2), now - Duration::days(600)).unwrap();

        assert_eq!(log.prune_before(now - Duration::days(365)).unwrap(), 1);
        assert_eq!(log.count().unwrap(), 2);
    }

    #[test]
    fn archive_does_not_break_chain() {
        let (_, log) = logger();
        let now = Utc::now();
        log.append_at(event(0), now - Duration::days(400)).unwrap();
        log.append(event(1)).unwrap();

        assert_eq!(log.archive_before(now - Duration::days(365), now).unwrap(), 1);
        assert!(log.verify_chain().unwrap().is_intact());
    }

    #[test]
    fn record_swallows_failures() {
        let (db, log) = logger();
        db.with_conn(|conn| Ok(conn.execute_batch("DROP TABLE audit_logs")?))
            .unwrap();
        assert!(log.record(event(0)).is_none());
    }

    #[test]
    fn entries_for_actor_filters() {
        let (_, log) = logger();
        log.append(event(0)).unwrap();
        log.append(AuditEvent::new(
            AuditAction::RetentionCleanup,
            Actor::system(),
            "retention",
        ))
        .unwrap();

        let mine = log.entries_for_actor("u1").unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].action, AuditAction::CaseUpdated);
    }

    #[test]
    fn actions_roundtrip_through_strings() {
        for action in AuditAction::ALL {
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), *action);
            let json = serde_json::to_string(action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
        assert!("nope".parse::<AuditAction>().is_err());
    }
}
