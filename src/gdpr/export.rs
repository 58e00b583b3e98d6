use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;

use super::{DeletionRequest, REQUEST_COLUMNS};
use crate::audit::{AuditEntry, ENTRY_COLUMNS};
use crate::cases::notifications::NOTIFICATION_COLUMNS;
use crate::cases::{CASE_COLUMNS, CaseStudy, Notification};
use crate::error::Result;
use crate::users::{User, get_user};

/// Everything the service holds about one user.
#[derive(Debug, Clone, Serialize)]
pub struct UserDataExport {
    pub exported_at: DateTime<Utc>,
    pub profile: User,
    pub case_studies: Vec<CaseStudy>,
    pub notifications: Vec<Notification>,
    pub audit_entries: Vec<AuditEntry>,
    pub gdpr_requests: Vec<DeletionRequest>,
}

fn rows<T>(
    conn: &Connection,
    sql: &str,
    user_id: &str,
    map: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![user_id], map)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(super) fn collect(
    conn: &Connection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<UserDataExport> {
    let profile = get_user(conn, user_id)?;

    Ok(UserDataExport {
        exported_at: now,
        profile,
        case_studies: rows(
            conn,
            &format!(
                "SELECT {} FROM case_studies WHERE contributor_id = ?1 ORDER BY created_at",
                CASE_COLUMNS
            ),
            user_id,
            CaseStudy::from_row,
        )?,
        notifications: rows(
            conn,
            &format!(
                "SELECT {} FROM notifications WHERE user_id = ?1 ORDER BY created_at",
                NOTIFICATION_COLUMNS
            ),
            user_id,
            Notification::from_row,
        )?,
        audit_entries: rows(
            conn,
            &format!(
                "SELECT {} FROM audit_logs WHERE actor_id = ?1 ORDER BY sequence",
                ENTRY_COLUMNS
            ),
            user_id,
            AuditEntry::from_row,
        )?,
        gdpr_requests: rows(
            conn,
            &format!(
                "SELECT {} FROM gdpr_deletion_requests WHERE user_id = ?1 ORDER BY requested_at",
                REQUEST_COLUMNS
            ),
            user_id,
            DeletionRequest::from_row,
        )?,
    })
}
