//! Users, roles and bearer API sessions.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use tracing::info;

use crate::audit::{Actor, AuditAction, AuditEvent, AuditLogger};
use crate::db::{self, Database};
use crate::error::{Error, ParseEnumError, Result};
use crate::security::{TokenHasher, generate_token};

/// Row backing every break-glass principal.
pub const BREAK_GLASS_USER_ID: &str = "break-glass";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Contributor,
    Approver,
    Admin,
    Viewer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contributor => "contributor",
            Self::Approver => "approver",
            Self::Admin => "admin",
            Self::Viewer => "viewer",
        }
    }

    /// May create and edit case studies.
    pub fn can_author(self) -> bool {
        !matches!(self, Self::Viewer)
    }

    /// May approve, reject and publish.
    pub fn can_review(self) -> bool {
        matches!(self, Self::Approver | Self::Admin)
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "contributor" => Ok(Self::Contributor),
            "approver" => Ok(Self::Approver),
            "admin" => Ok(Self::Admin),
            "viewer" => Ok(Self::Viewer),
            _ => Err(ParseEnumError::new("role", s)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymized_at: Option<DateTime<Utc>>,
}

pub(crate) const USER_COLUMNS: &str = "id, email, name, role, created_at, updated_at, anonymized_at";

impl User {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let role: String = row.get(3)?;
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            role: role.parse().map_err(|e| db::conversion_error(3, e))?,
            created_at: db::ts_column(row, 4)?,
            updated_at: db::ts_column(row, 5)?,
            anonymized_at: db::opt_ts_column(row, 6)?,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    fn snapshot(&self) -> serde_json::Value {
        json!({ "role": self.role })
    }
}

/// The caller of an operation: a user, possibly acting through a
/// break-glass session.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    pub break_glass_session: Option<String>,
}

impl Principal {
    pub fn user(user: User) -> Self {
        Self {
            user,
            break_glass_session: None,
        }
    }

    /// Actor recorded in audit entries.
    pub fn actor(&self) -> Actor {
        match &self.break_glass_session {
            Some(session) => Actor::break_glass(session),
            None => Actor::user(&self.user.id),
        }
    }

    pub fn id(&self) -> &str {
        &self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.user.is_admin() {
            Ok(())
        } else {
            Err(Error::forbidden("admin role required"))
        }
    }
}

pub(crate) fn get_user(conn: &Connection, id: &str) -> Result<User> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        params![id],
        User::from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found(format!("user {}", id)))
}

#[derive(Clone)]
pub struct UserStore {
    db: Database,
    audit: AuditLogger,
    hasher: TokenHasher,
    token_ttl: Duration,
}

impl UserStore {
    pub fn new(db: Database, audit: AuditLogger, hasher: TokenHasher, token_ttl_days: u32) -> Self {
        Self {
            db,
            audit,
            hasher,
            token_ttl: Duration::days(i64::from(token_ttl_days.max(1))),
        }
    }

    /// Create a user. `by` is `None` for operator (CLI) creation.
    pub fn create(&self, by: Option<&Principal>, email: &str, name: &str, role: Role) -> Result<User> {
        if let Some(p) = by {
            p.require_admin()?;
        }
        let email = email.trim().to_ascii_lowercase();
        let name = name.trim();
        if email.len() < 3 || !email.contains('@') {
            return Err(Error::validation(format!("invalid email '{}'", email)));
        }
        if name.is_empty() {
            return Err(Error::validation("name is required"));
        }

        let now = db::now();
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email,
            name: name.to_string(),
            role,
            created_at: now,
            updated_at: now,
            anonymized_at: None,
        };

        self.db.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
                params![user.email],
                |row| row.get(0),
            )?;
            if exists {
                return Err(Error::Conflict(format!("user {} already exists", user.email)));
            }
            conn.execute(
                "INSERT INTO users (id, email, name, role, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![user.id, user.email, user.name, role.as_str(), db::ts(now)],
            )?;
            Ok(())
        })?;

        let actor = by.map(Principal::actor).unwrap_or_else(Actor::system);
        self.audit.record(
            AuditEvent::new(AuditAction::UserCreated, actor, "user")
                .resource(&user.id)
                .after(user.snapshot()),
        );
        info!("Created user {} ({})", user.id, role);
        Ok(user)
    }

    pub fn get(&self, id: &str) -> Result<User> {
        self.db.with_conn(|conn| get_user(conn, id))
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.trim().to_ascii_lowercase();
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
                    params![email],
                    User::from_row,
                )
                .optional()?)
        })
    }

    /// All users except the break-glass row. `by` is `None` for the CLI.
    pub fn list(&self, by: Option<&Principal>) -> Result<Vec<User>> {
        if let Some(p) = by {
            p.require_admin()?;
        }
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users WHERE id != ?1 ORDER BY created_at",
                USER_COLUMNS
            ))?;
            let rows = stmt.query_map(params![BREAK_GLASS_USER_ID], User::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Active users holding a reviewing role.
    pub fn reviewers(&self) -> Result<Vec<User>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users
                 WHERE role IN ('approver', 'admin') AND anonymized_at IS NULL AND id != ?1",
                USER_COLUMNS
            ))?;
            let rows = stmt.query_map(params![BREAK_GLASS_USER_ID], User::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn change_role(&self, by: Option<&Principal>, id: &str, role: Role) -> Result<User> {
        if let Some(p) = by {
            p.require_admin()?;
        }
        let before = self.get(id)?;
        if before.anonymized_at.is_some() || before.id == BREAK_GLASS_USER_ID {
            return Err(Error::forbidden("this account cannot be modified"));
        }
        if before.role == role {
            return Ok(before);
        }

        let now = db::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET role = ?1, updated_at = ?2 WHERE id = ?3",
                params![role.as_str(), db::ts(now), id],
            )?;
            Ok(())
        })?;
        let after = User {
            role,
            updated_at: now,
            ..before.clone()
        };

        self.audit.record(
            AuditEvent::new(
                AuditAction::UserRoleChanged,
                by.map(Principal::actor).unwrap_or_else(Actor::system),
                "user",
            )
                .resource(id)
                .before(before.snapshot())
                .after(after.snapshot()),
        );
        Ok(after)
    }

    /// Issue a bearer token for `user_id`. The token is returned once; only
    /// its HMAC is stored.
    pub fn issue_token(&self, user_id: &str) -> Result<String> {
        let user = self.get(user_id)?;
        if user.anonymized_at.is_some() {
            return Err(Error::forbidden("user has been anonymized"));
        }

        let token = generate_token();
        let now = db::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO api_sessions (token_hash, user_id, created_at, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?3, ?4)",
                params![
                    self.hasher.hash(&token),
                    user.id,
                    db::ts(now),
                    db::ts(now + self.token_ttl)
                ],
            )?;
            Ok(())
        })?;

        self.audit.record(
            AuditEvent::new(AuditAction::ApiTokenIssued, Actor::system(), "user").resource(&user.id),
        );
        Ok(token)
    }

    /// Resolve a bearer token to its user.
    pub fn resolve_token(&self, token: &str) -> Result<User> {
        let hash = self.hasher.hash(token);
        let now = db::ts(db::now());
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM users u JOIN api_sessions s ON s.user_id = u.id
                     WHERE s.token_hash = ?1 AND s.expires_at > ?2 AND u.anonymized_at IS NULL",
                    prefixed("u", USER_COLUMNS)
                ),
                params![hash, now],
                User::from_row,
            )
            .optional()?
            .ok_or(Error::Unauthorized)
        })
    }

    /// The admin row break-glass sessions act as, created on first use.
    pub fn break_glass_user(&self) -> Result<User> {
        let now = db::ts(db::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO users (id, email, name, role, created_at, updated_at)
                 VALUES (?1, 'break-glass@casebuilder.invalid', 'Break-glass Administrator', 'admin', ?2, ?2)",
                params![BREAK_GLASS_USER_ID, now],
            )?;
            get_user(conn, BREAK_GLASS_USER_ID)
        })
    }
}

fn prefixed(alias: &str, columns: &str) -> String {
    columns
        .split(", ")
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn store(db: &Database) -> UserStore {
        UserStore::new(
            db.clone(),
            AuditLogger::new(db.clone()),
            TokenHasher::new("user-store-test-secret-0123456789abcdef").unwrap(),
            30,
        )
    }

    pub(crate) fn make(users: &UserStore, email: &str, role: Role) -> Principal {
        Principal::user(users.create(None, email, "Test User", role).unwrap())
    }

    #[test]
    fn create_normalizes_and_rejects_duplicates() {
        let db = Database::open_in_memory().unwrap();
        let users = store(&db);

        let u = users
            .create(None, "  Weld.Lead@Example.com ", "Lead", Role::Contributor)
            .unwrap();
        assert_eq!(u.email, "weld.lead@example.com");
        assert!(matches!(
            users.create(None, "weld.lead@example.com", "Again", Role::Viewer),
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            users.create(None, "nope", "X", Role::Viewer),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn only_admins_manage_users() {
        let db = Database::open_in_memory().unwrap();
        let users = store(&db);
        let admin = make(&users, "admin@example.com", Role::Admin);
        let contributor = make(&users, "c@example.com", Role::Contributor);

        assert!(users.list(Some(&contributor)).is_err());
        assert!(
            users
                .change_role(Some(&contributor), contributor.id(), Role::Admin)
                .is_err()
        );

        let updated = users
            .change_role(Some(&admin), contributor.id(), Role::Approver)
            .unwrap();
        assert_eq!(updated.role, Role::Approver);
        assert_eq!(users.list(Some(&admin)).unwrap().len(), 2);

        let entries = AuditLogger::new(db)
            .query(&crate::audit::AuditQuery {
                action: Some(AuditAction::UserRoleChanged),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].before.as_ref().unwrap()["role"], json!("contributor"));
    }

    #[test]
    fn tokens_resolve_to_their_user() {
        let db = Database::open_in_memory().unwrap();
        let users = store(&db);
        let p = make(&users, "c@example.com", Role::Contributor);

        let token = users.issue_token(p.id()).unwrap();
        assert_eq!(users.resolve_token(&token).unwrap().id, p.id());
        assert!(matches!(
            users.resolve_token("forged"),
            Err(Error::Unauthorized)
        ));
    }

    #[test]
    fn expired_tokens_rejected() {
        let db = Database::open_in_memory().unwrap();
        let users = store(&db);
        let p = make(&users, "c@example.com", Role::Contributor);
        let token = users.issue_token(p.id()).unwrap();

        db.with_conn(|conn| {
            conn.execute(
                "UPDATE api_sessions SET expires_at = ?1",
                params![db::ts(db::now() - Duration::minutes(1))],
            )?;
            Ok(())
        })
        .unwrap();
        assert!(users.resolve_token(&token).is_err());
    }

    #[test]
    fn break_glass_user_is_idempotent_admin() {
        let db = Database::open_in_memory().unwrap();
        let users = store(&db);
        let a = users.break_glass_user().unwrap();
        let b = users.break_glass_user().unwrap();
        assert_eq!(a, b);
        assert!(a.is_admin());

        let p = Principal {
            user: a,
            break_glass_session: Some("s1".into()),
        };
        assert_eq!(p.actor(), Actor::break_glass("s1"));
    }

    #[test]
    fn role_parsing() {
        assert_eq!("Approver".parse::<Role>().unwrap(), Role::Approver);
        assert!("owner".parse::<Role>().is_err());
        assert!(Role::Admin.can_review());
        assert!(!Role::Viewer.can_author());
    }
}
