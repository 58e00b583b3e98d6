use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::db;
use crate::error::Result;
use crate::users::{Role, get_user};

pub const ANONYMIZED_NAME: &str = "Deleted User";

/// Counts of what an erasure removed or rewrote.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnonymizationSummary {
    pub sessions_deleted: usize,
    pub notifications_deleted: usize,
    pub cases_deleted: usize,
    pub cases_retained: usize,
    pub emails_redacted: usize,
}

pub fn anonymized_email(user_id: &str) -> String {
    format!("deleted-{}@anonymized.invalid", user_id)
}

/// Erase a user's personal data. Must run inside the caller's transaction;
/// any error leaves the caller to roll back.
pub(super) fn anonymize(
    conn: &Connection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<AnonymizationSummary> {
    let user = get_user(conn, user_id)?;
    let stamp = db::ts(now);
    let new_email = anonymized_email(user_id);

    let sessions_deleted =
        conn.execute("DELETE FROM api_sessions WHERE user_id = ?1", params![user_id])?;
    let notifications_deleted =
        conn.execute("DELETE FROM notifications WHERE user_id = ?1", params![user_id])?;
    let cases_deleted = conn.execute(
        "DELETE FROM case_studies
         WHERE contributor_id = ?1 AND status IN ('draft', 'submitted', 'rejected')",
        params![user_id],
    )?;
    let cases_retained: i64 = conn.query_row(
        "SELECT COUNT(*) FROM case_studies WHERE contributor_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;

    conn.execute(
        "UPDATE users SET name = ?1, email = ?2, role = ?3, anonymized_at = ?4, updated_at = ?4
         WHERE id = ?5",
        params![
            ANONYMIZED_NAME,
            new_email,
            Role::Viewer.as_str(),
            stamp,
            user_id
        ],
    )?;

    // Mail to the user and mail about the user (e.g. review requests naming
    // them) both lose their bodies.
    let emails_redacted = conn.execute(
        "UPDATE email_outbox
         SET recipient = CASE WHEN recipient = ?3 THEN ?1 ELSE recipient END,
             body = '', updated_at = ?2
         WHERE recipient = ?3 OR subject_user_id = ?4",
        params![new_email, stamp, user.email, user_id],
    )?;

    Ok(AnonymizationSummary {
        sessions_deleted,
        notifications_deleted,
        cases_deleted,
        cases_retained: cases_retained as usize,
        emails_redacted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::tests::{complete_case, fixture};
    use crate::cases::{CaseStatus, CaseType};
    use crate::users::tests::make;

    #[test]
    fn keeps_approved_work_and_drops_drafts() {
        let f = fixture();
        let author = make(&f.users, "author@example.com", Role::Contributor);
        let approver = make(&f.users, "approver@example.com", Role::Approver);

        let draft = f
            .cases
            .create(&author, complete_case(CaseType::Application))
            .unwrap();
        let kept = f
            .cases
            .create(&author, complete_case(CaseType::Application))
            .unwrap();
        f.cases.submit(&author, &kept.id).unwrap();
        f.cases.approve(&approver, &kept.id).unwrap();

        let summary = f
            .db
            .with_conn(|conn| {
                let tx = conn.transaction()?;
                let summary = anonymize(&tx, author.id(), db::now())?;
                tx.commit()?;
                Ok(summary)
            })
            .unwrap();

        assert_eq!(summary.cases_deleted, 1);
        assert_eq!(summary.cases_retained, 1);
        assert!(f.cases.get(&approver, &draft.id).is_err());

        let retained = f.cases.get(&approver, &kept.id).unwrap();
        assert_eq!(retained.status, CaseStatus::Approved);
        assert_eq!(retained.contributor_id, author.id());

        let user = f.users.get(author.id()).unwrap();
        assert_eq!(user.email, anonymized_email(author.id()));
        assert_eq!(user.name, ANONYMIZED_NAME);
    }
}
