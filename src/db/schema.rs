//! SQLite schema, applied through `PRAGMA user_version` migrations.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Ordered migrations. Index + 1 is the resulting `user_version`.
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        role TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        anonymized_at TEXT
    );

    CREATE TABLE api_sessions (
        token_hash TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );
    CREATE INDEX idx_api_sessions_user ON api_sessions(user_id);

    CREATE TABLE case_studies (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        case_type TEXT NOT NULL,
        status TEXT NOT NULL,
        contributor_id TEXT NOT NULL REFERENCES users(id),
        reviewer_id TEXT REFERENCES users(id),
        customer_name TEXT NOT NULL DEFAULT '',
        industry TEXT NOT NULL DEFAULT '',
        location TEXT NOT NULL DEFAULT '',
        component TEXT NOT NULL DEFAULT '',
        problem TEXT NOT NULL DEFAULT '',
        solution TEXT NOT NULL DEFAULT '',
        results TEXT NOT NULL DEFAULT '',
        tags TEXT NOT NULL DEFAULT '[]',
        wps TEXT,
        rejection_reason TEXT,
        submitted_at TEXT,
        reviewed_at TEXT,
        published_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        archived_at TEXT
    );
    CREATE INDEX idx_case_studies_contributor ON case_studies(contributor_id);
    CREATE INDEX idx_case_studies_status ON case_studies(status, updated_at);

    CREATE TABLE notifications (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        message TEXT NOT NULL,
        case_id TEXT,
        read_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        archived_at TEXT
    );
    CREATE INDEX idx_notifications_user ON notifications(user_id);

    CREATE TABLE email_outbox (
        id TEXT PRIMARY KEY,
        sender TEXT NOT NULL,
        recipient TEXT NOT NULL,
        template TEXT NOT NULL,
        subject TEXT NOT NULL,
        body TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        sent_at TEXT,
        archived_at TEXT
    );

    CREATE TABLE audit_logs (
        sequence INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        action TEXT NOT NULL,
        actor_type TEXT NOT NULL,
        actor_id TEXT,
        resource_type TEXT NOT NULL,
        resource_id TEXT,
        before_state TEXT,
        after_state TEXT,
        metadata TEXT,
        ip_address TEXT,
        created_at TEXT NOT NULL,
        previous_hash TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        archived_at TEXT
    );
    CREATE INDEX idx_audit_logs_resource ON audit_logs(resource_type, resource_id);
    CREATE INDEX idx_audit_logs_actor ON audit_logs(actor_id);
    CREATE INDEX idx_audit_logs_created ON audit_logs(created_at);

    -- Single-row table holding the hash the first remaining entry links to
    -- after retention pruning.
    CREATE TABLE audit_chain_anchor (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        anchor_hash TEXT NOT NULL,
        pruned_through INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    );

    -- Present (one row) only inside a pruning transaction.
    CREATE TABLE audit_prune_guard (
        id INTEGER PRIMARY KEY CHECK (id = 1)
    );

    CREATE TRIGGER audit_logs_no_update
    BEFORE UPDATE OF id, action, actor_type, actor_id, resource_type, resource_id,
        before_state, after_state, metadata, ip_address, created_at,
        previous_hash, content_hash ON audit_logs
    BEGIN
        SELECT RAISE(ABORT, 'audit log is append-only');
    END;

    CREATE TRIGGER audit_logs_no_delete
    BEFORE DELETE ON audit_logs
    WHEN NOT EXISTS (SELECT 1 FROM audit_prune_guard)
    BEGIN
        SELECT RAISE(ABORT, 'audit log is append-only');
    END;

    CREATE TABLE gdpr_deletion_requests (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id),
        status TEXT NOT NULL,
        reason TEXT,
        token_hash TEXT NOT NULL,
        token_expires_at TEXT NOT NULL,
        requested_at TEXT NOT NULL,
        verified_at TEXT,
        started_at TEXT,
        completed_at TEXT,
        processed_by TEXT,
        rejection_reason TEXT,
        last_error TEXT,
        summary TEXT,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX idx_gdpr_requests_user ON gdpr_deletion_requests(user_id, status);

    CREATE TABLE retention_policies (
        data_type TEXT PRIMARY KEY,
        retention_days INTEGER NOT NULL,
        archive_after_days INTEGER,
        legal_basis TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE break_glass_sessions (
        id TEXT PRIMARY KEY,
        token_hash TEXT NOT NULL UNIQUE,
        granted_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        revoked_at TEXT,
        ip_address TEXT,
        reason TEXT,
        updated_at TEXT NOT NULL,
        archived_at TEXT
    );

    CREATE TABLE break_glass_attempts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        succeeded INTEGER NOT NULL,
        ip_address TEXT,
        attempted_at TEXT NOT NULL
    );
    CREATE INDEX idx_break_glass_attempts_at ON break_glass_attempts(attempted_at);
    "#,
    // Outbox rows remember whose personal data the body carries and what
    // it belongs to, so bodies can be blanked once they are no longer needed.
    r#"
    ALTER TABLE email_outbox ADD COLUMN subject_user_id TEXT;
    ALTER TABLE email_outbox ADD COLUMN reference TEXT;
    CREATE INDEX idx_email_outbox_subject ON email_outbox(subject_user_id);
    CREATE INDEX idx_email_outbox_reference ON email_outbox(reference);
    "#,
];

/// Bring the schema up to the latest version.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let current: usize = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(current) {
        let version = idx + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!("Applied database migration {}", version);
    }

    Ok(())
}

pub fn latest_version() -> usize {
    MIGRATIONS.len()
}
