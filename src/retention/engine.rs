use chrono::{DateTime, Utc};
use rusqlite::{Connection, params_from_iter};
use serde::Serialize;
use tracing::{info, warn};

use super::{DataType, PolicyStore, RetentionPolicy};
use crate::audit::{Actor, AuditAction, AuditEvent, AuditLogger};
use crate::db::{self, Database};
use crate::error::Result;

/// Where a data type lives and which rows have left their workflow.
struct Target {
    table: &'static str,
    time_column: &'static str,
    /// Extra condition restricting deletion/archival to terminal rows.
    /// May reference `?2` (now).
    terminal: Option<&'static str>,
}

impl Target {
    fn for_type(data_type: DataType) -> Option<Self> {
        let t = |table, time_column, terminal| Some(Self {
            table,
            time_column,
            terminal,
        });
        match data_type {
            DataType::Session => t("api_sessions", "updated_at", Some("expires_at < ?2")),
            DataType::Notification => t("notifications", "updated_at", None),
            DataType::DraftCaseStudy => t("case_studies", "updated_at", Some("status = 'draft'")),
            DataType::EmailOutbox => t("email_outbox", "updated_at", None),
            DataType::GdprRequest => t(
                "gdpr_deletion_requests",
                "updated_at",
                Some("status IN ('completed', 'cancelled', 'rejected')"),
            ),
            DataType::BreakGlassSession => t(
                "break_glass_sessions",
                "updated_at",
                Some("(revoked_at IS NOT NULL OR expires_at < ?2)"),
            ),
            // Pruned through AuditLogger to keep the chain anchored
            DataType::AuditLog => None,
        }
    }

    fn uses_now(&self) -> bool {
        self.terminal.is_some_and(|c| c.contains("?2"))
    }

    fn condition(&self) -> String {
        match self.terminal {
            Some(extra) => format!("{} < ?1 AND {}", self.time_column, extra),
            None => format!("{} < ?1", self.time_column),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeResult {
    pub data_type: DataType,
    pub cutoff: DateTime<Utc>,
    /// Rows deleted (or that would be, on a dry run).
    pub deleted: usize,
    /// Rows newly archived (or that would be, on a dry run).
    pub archived: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetentionReport {
    pub ran_at: DateTime<Utc>,
    pub dry_run: bool,
    pub results: Vec<TypeResult>,
}

impl RetentionReport {
    pub fn total_deleted(&self) -> usize {
        self.results.iter().map(|r| r.deleted).sum()
    }

    pub fn total_archived(&self) -> usize {
        self.results.iter().map(|r| r.archived).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TypeResult> {
        self.results.iter().filter(|r| r.error.is_some())
    }
}

#[derive(Clone)]
pub struct RetentionEngine {
    db: Database,
    audit: AuditLogger,
    policies: PolicyStore,
}

impl RetentionEngine {
    pub fn new(db: Database, audit: AuditLogger) -> Self {
        Self {
            policies: PolicyStore::new(db.clone(), audit.clone()),
            db,
            audit,
        }
    }

    pub fn policies(&self) -> &PolicyStore {
        &self.policies
    }

    pub fn run(&self, dry_run: bool) -> Result<RetentionReport> {
        self.run_at(db::now(), dry_run)
    }

    /// Apply every enabled policy. Each data type commits on its own; a
    /// failure is recorded in its result and the run continues.
    pub fn run_at(&self, now: DateTime<Utc>, dry_run: bool) -> Result<RetentionReport> {
        let mut results = Vec::new();
        for policy in self.policies.list()? {
            if !policy.enabled {
                continue;
            }
            let mut result = TypeResult {
                data_type: policy.data_type,
                cutoff: policy.cutoff(now),
                deleted: 0,
                archived: 0,
                error: None,
            };
            match self.apply(&policy, now, dry_run) {
                Ok((deleted, archived)) => {
                    result.deleted = deleted;
                    result.archived = archived;
                }
                Err(e) => {
                    warn!("Retention for {} failed: {}", policy.data_type, e);
                    result.error = Some(e.to_string());
                }
            }
            results.push(result);
        }

        let report = RetentionReport {
            ran_at: now,
            dry_run,
            results,
        };
        self.audit.record(
            AuditEvent::new(AuditAction::RetentionCleanup, Actor::system(), "retention")
                .metadata(serde_json::to_value(&report)?),
        );
        info!(
            "Retention {}: {} deleted, {} archived",
            if dry_run { "dry run" } else { "run" },
            report.total_deleted(),
            report.total_archived()
        );
        Ok(report)
    }

    fn apply(&self, policy: &RetentionPolicy, now: DateTime<Utc>, dry_run: bool) -> Result<(usize, usize)> {
        let cutoff = policy.cutoff(now);
        let archive_cutoff = policy.archive_cutoff(now);

        let Some(target) = Target::for_type(policy.data_type) else {
            return self.apply_audit(cutoff, archive_cutoff, now, dry_run);
        };

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let deleted = sweep(&tx, &target, cutoff, now, dry_run)?;
            let archived = match archive_cutoff {
                Some(ac) => archive(&tx, &target, ac, now, dry_run)?,
                None => 0,
            };
            let attempts = if policy.data_type == DataType::BreakGlassSession {
                sweep_attempts(&tx, cutoff, dry_run)?
            } else {
                0
            };
            tx.commit()?;
            Ok((deleted + attempts, archived))
        })
    }

    fn apply_audit(
        &self,
        cutoff: DateTime<Utc>,
        archive_cutoff: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<(usize, usize)> {
        let deleted = if dry_run {
            self.audit.count_prunable(cutoff)?
        } else {
            self.audit.prune_before(cutoff)?
        };
        let archived = match archive_cutoff {
            Some(ac) if dry_run => self.db.with_conn(|conn| {
                count(
                    conn,
                    "SELECT COUNT(*) FROM audit_logs WHERE archived_at IS NULL AND created_at < ?1",
                    &[db::ts(ac)],
                )
            })?,
            Some(ac) => self.audit.archive_before(ac, now)?,
            None => 0,
        };
        Ok((deleted, archived))
    }
}

fn count(conn: &Connection, sql: &str, args: &[String]) -> Result<usize> {
    let n: i64 = conn.query_row(sql, params_from_iter(args), |row| row.get(0))?;
    Ok(n as usize)
}

fn sweep(
    conn: &Connection,
    target: &Target,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<usize> {
    let mut args = vec![db::ts(cutoff)];
    if target.uses_now() {
        args.push(db::ts(now));
    }
    let condition = target.condition();
    if dry_run {
        return count(
            conn,
            &format!("SELECT COUNT(*) FROM {} WHERE {}", target.table, condition),
            &args,
        );
    }
    Ok(conn.execute(
        &format!("DELETE FROM {} WHERE {}", target.table, condition),
        params_from_iter(&args),
    )?)
}

fn archive(
    conn: &Connection,
    target: &Target,
    archive_cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<usize> {
    let args = [db::ts(archive_cutoff), db::ts(now)];
    let condition = format!("archived_at IS NULL AND {}", target.condition());
    if dry_run {
        // `?2` must still be bound when the condition does not mention it
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} AND ?2 IS NOT NULL",
            target.table, condition
        );
        return count(conn, &sql, &args);
    }
    Ok(conn.execute(
        &format!(
            "UPDATE {} SET archived_at = ?2 WHERE {}",
            target.table, condition
        ),
        params_from_iter(&args),
    )?)
}

fn sweep_attempts(conn: &Connection, cutoff: DateTime<Utc>, dry_run: bool) -> Result<usize> {
    let args = [db::ts(cutoff)];
    if dry_run {
        return count(
            conn,
            "SELECT COUNT(*) FROM break_glass_attempts WHERE attempted_at < ?1",
            &args,
        );
    }
    Ok(conn.execute(
        "DELETE FROM break_glass_attempts WHERE attempted_at < ?1",
        params_from_iter(&args),
    )?)
}
