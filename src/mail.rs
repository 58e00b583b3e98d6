//! Outgoing e-mail.
//!
//! Messages are rendered from a fixed set of templates and handed to a
//! [`Mailer`]. The service's mailer is [`OutboxMailer`], which queues into
//! the `email_outbox` table for an external relay to deliver.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::debug;

use crate::db::{self, Database};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub template: &'static str,
    pub subject: String,
    pub body: String,
    /// User the body is about; may differ from the recipient.
    pub subject_user_id: Option<String>,
    /// What the message belongs to, e.g. `gdpr_request:<id>`.
    pub reference: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Template<'a> {
    GdprVerification {
        request_id: &'a str,
        token: &'a str,
        expires_at: DateTime<Utc>,
    },
    CaseSubmitted {
        case_id: &'a str,
        title: &'a str,
        contributor: &'a str,
    },
    CaseApproved {
        case_id: &'a str,
        title: &'a str,
    },
    CaseRejected {
        case_id: &'a str,
        title: &'a str,
        reason: &'a str,
    },
}

impl Template<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GdprVerification { .. } => "gdpr_verification",
            Self::CaseSubmitted { .. } => "case_submitted",
            Self::CaseApproved { .. } => "case_approved",
            Self::CaseRejected { .. } => "case_rejected",
        }
    }

    /// Render to `(subject, body)`. Links are built from `base_url`.
    pub fn render(&self, base_url: &str) -> (String, String) {
        let base = base_url.trim_end_matches('/');
        match self {
            Self::GdprVerification {
                request_id,
                token,
                expires_at,
            } => (
                "Confirm your data deletion request".to_string(),
                format!(
                    "We received a request to delete your Case Study Builder account.\n\n\
                     Confirm it here: {}/gdpr/verify?request={}&token={}\n\n\
                     The link expires at {}. If you did not ask for this, ignore this message.\n",
                    base,
                    request_id,
                    token,
                    expires_at.format("%Y-%m-%d %H:%M UTC")
                ),
            ),
            Self::CaseSubmitted {
                case_id,
                title,
                contributor,
            } => (
                format!("Case study awaiting review: {}", title),
                format!(
                    "{} submitted \"{}\" for approval.\n\nReview it: {}/cases/{}\n",
                    contributor, title, base, case_id
                ),
            ),
            Self::CaseApproved { case_id, title } => (
                format!("Case study approved: {}", title),
                format!(
                    "Your case study \"{}\" was approved.\n\nView it: {}/cases/{}\n",
                    title, base, case_id
                ),
            ),
            Self::CaseRejected {
                case_id,
                title,
                reason,
            } => (
                format!("Case study needs changes: {}", title),
                format!(
                    "Your case study \"{}\" was sent back with this note:\n\n{}\n\n\
                     Edit and resubmit: {}/cases/{}\n",
                    title, reason, base, case_id
                ),
            ),
        }
    }
}

impl Email {
    pub fn compose(to: &str, template: &Template<'_>, base_url: &str) -> Self {
        let (subject, body) = template.render(base_url);
        Self {
            to: to.to_string(),
            template: template.name(),
            subject,
            body,
            subject_user_id: None,
            reference: None,
        }
    }

    pub fn about(mut self, user_id: impl Into<String>) -> Self {
        self.subject_user_id = Some(user_id.into());
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Blank the bodies of queued messages filed under `reference`. Runs on the
/// caller's connection so it can join an open transaction.
pub(crate) fn redact_reference(
    conn: &Connection,
    reference: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE email_outbox SET body = '', updated_at = ?1 WHERE reference = ?2 AND body != ''",
        params![db::ts(now), reference],
    )?)
}

#[cfg_attr(test, mockall::automock)]
pub trait Mailer: Send + Sync {
    fn send(&self, email: &Email) -> Result<()>;
}

/// Queues messages in the `email_outbox` table.
pub struct OutboxMailer {
    db: Database,
    from: String,
}

impl OutboxMailer {
    pub fn new(db: Database, from: &str) -> Self {
        Self {
            db,
            from: from.to_string(),
        }
    }

    pub fn pending(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM email_outbox WHERE sent_at IS NULL",
                [],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }
}

impl Mailer for OutboxMailer {
    fn send(&self, email: &Email) -> Result<()> {
        let now = db::ts(db::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO email_outbox
                    (id, sender, recipient, template, subject, body, subject_user_id, reference,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    self.from,
                    email.to,
                    email.template,
                    email.subject,
                    email.body,
                    email.subject_user_id,
                    email.reference,
                    now
                ],
            )?;
            Ok(())
        })?;
        debug!("Queued {} e-mail", email.template);
        Ok(())
    }
}
