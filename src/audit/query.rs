use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use serde::Deserialize;

use super::{AuditAction, AuditEntry, ENTRY_COLUMNS};
use crate::db;
use crate::error::Result;

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 500;

/// Filter for [`AuditLogger::query`](super::AuditLogger::query).
/// Results are newest first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub actor_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl AuditQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub(super) fn run(&self, conn: &Connection) -> Result<Vec<AuditEntry>> {
        let mut clauses = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();

        let mut push = |clause: &str, value: SqlValue| {
            args.push(value);
            clauses.push(clause.replace('?', &format!("?{}", args.len())));
        };

        if let Some(action) = self.action {
            push("action = ?", SqlValue::Text(action.as_str().into()));
        }
        if let Some(actor) = &self.actor_id {
            push("actor_id = ?", SqlValue::Text(actor.clone()));
        }
        if let Some(kind) = &self.resource_type {
            push("resource_type = ?", SqlValue::Text(kind.clone()));
        }
        if let Some(id) = &self.resource_id {
            push("resource_id = ?", SqlValue::Text(id.clone()));
        }
        if let Some(since) = self.since {
            push("created_at >= ?", SqlValue::Text(db::ts(since)));
        }
        if let Some(until) = self.until {
            push("created_at < ?", SqlValue::Text(db::ts(until)));
        }

        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM audit_logs {} ORDER BY sequence DESC LIMIT {} OFFSET {}",
            ENTRY_COLUMNS,
            filter,
            self.effective_limit(),
            self.offset.unwrap_or(0)
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), AuditEntry::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
