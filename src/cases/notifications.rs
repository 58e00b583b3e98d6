//! In-app notifications.

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use serde::Serialize;

use crate::db::{self, Database};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub message: String,
    pub case_id: Option<String>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: row.get(2)?,
            message: row.get(3)?,
            case_id: row.get(4)?,
            read_at: db::opt_ts_column(row, 5)?,
            created_at: db::ts_column(row, 6)?,
        })
    }
}

pub(crate) const NOTIFICATION_COLUMNS: &str =
    "id, user_id, kind, message, case_id, read_at, created_at";

#[derive(Clone)]
pub struct NotificationStore {
    db: Database,
}

impl NotificationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn push(&self, user_id: &str, kind: &str, message: &str, case_id: Option<&str>) -> Result<()> {
        let now = db::ts(db::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, kind, message, case_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    user_id,
                    kind,
                    message,
                    case_id,
                    now
                ],
            )?;
            Ok(())
        })
    }

    /// Newest first.
    pub fn list(&self, user_id: &str, unread_only: bool) -> Result<Vec<Notification>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM notifications
                 WHERE user_id = ?1 AND (NOT ?2 OR read_at IS NULL)
                 ORDER BY created_at DESC",
                NOTIFICATION_COLUMNS
            ))?;
            let rows = stmt.query_map(params![user_id, unread_only], Notification::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn mark_read(&self, user_id: &str, id: &str) -> Result<()> {
        let now = db::ts(db::now());
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE notifications SET read_at = COALESCE(read_at, ?1), updated_at = ?1
                 WHERE id = ?2 AND user_id = ?3",
                params![now, id, user_id],
            )?)
        })?;
        if changed == 0 {
            return Err(Error::not_found(format!("notification {}", id)));
        }
        Ok(())
    }
}
