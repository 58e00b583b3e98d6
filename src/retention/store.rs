use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Deserialize;
use tracing::info;

use super::{DataType, LegalBasis, RetentionPolicy};
use crate::audit::{Actor, AuditAction, AuditEvent, AuditLogger};
use crate::db::{self, Database};
use crate::error::Result;
use crate::users::Principal;

/// Replacement values for a policy. Absent fields keep their value;
/// `archive_after_days: null` clears archiving.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyUpdate {
    pub retention_days: Option<u32>,
    #[serde(default, deserialize_with = "double_option")]
    pub archive_after_days: Option<Option<u32>>,
    pub legal_basis: Option<LegalBasis>,
    pub enabled: Option<bool>,
}

/// Distinguish an explicit `null` from an absent field.
fn double_option<'de, D>(de: D) -> std::result::Result<Option<Option<u32>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<u32>::deserialize(de).map(Some)
}

fn policy_from_row(row: &Row<'_>) -> rusqlite::Result<RetentionPolicy> {
    let data_type: String = row.get(0)?;
    let legal_basis: String = row.get(3)?;
    Ok(RetentionPolicy {
        data_type: data_type.parse().map_err(|e| db::conversion_error(0, e))?,
        retention_days: row.get(1)?,
        archive_after_days: row.get(2)?,
        legal_basis: legal_basis.parse().map_err(|e| db::conversion_error(3, e))?,
        enabled: row.get(4)?,
        updated_at: Some(db::ts_column(row, 5)?),
    })
}

const POLICY_COLUMNS: &str =
    "data_type, retention_days, archive_after_days, legal_basis, enabled, updated_at";

fn upsert(conn: &Connection, policy: &RetentionPolicy, stamp: &str, replace: bool) -> Result<()> {
    let verb = if replace { "INSERT OR REPLACE" } else { "INSERT OR IGNORE" };
    conn.execute(
        &format!(
            "{} INTO retention_policies ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            verb, POLICY_COLUMNS
        ),
        params![
            policy.data_type.as_str(),
            policy.retention_days,
            policy.archive_after_days,
            policy.legal_basis.as_str(),
            policy.enabled,
            stamp
        ],
    )?;
    Ok(())
}

/// Policies persisted in `retention_policies`, seeded with defaults.
#[derive(Clone)]
pub struct PolicyStore {
    db: Database,
    audit: AuditLogger,
}

impl PolicyStore {
    pub fn new(db: Database, audit: AuditLogger) -> Self {
        Self { db, audit }
    }

    /// Insert defaults for data types that have no stored policy.
    pub fn seed_defaults(&self) -> Result<()> {
        let stamp = db::ts(db::now());
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            for policy in RetentionPolicy::defaults() {
                upsert(&tx, &policy, &stamp, false)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Every data type's policy. Types without a stored row report their
    /// default; reads never write.
    pub fn list(&self) -> Result<Vec<RetentionPolicy>> {
        let stored = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM retention_policies", POLICY_COLUMNS))?;
            let rows = stmt.query_map([], policy_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;
        Ok(DataType::ALL
            .iter()
            .map(|t| {
                stored
                    .iter()
                    .find(|p| p.data_type == *t)
                    .cloned()
                    .unwrap_or_else(|| RetentionPolicy::default_for(*t))
            })
            .collect())
    }

    pub fn get(&self, data_type: DataType) -> Result<RetentionPolicy> {
        let stored = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {} FROM retention_policies WHERE data_type = ?1",
                        POLICY_COLUMNS
                    ),
                    params![data_type.as_str()],
                    policy_from_row,
                )
                .optional()?)
        })?;
        Ok(stored.unwrap_or_else(|| RetentionPolicy::default_for(data_type)))
    }

    /// Apply `change`. `by` is `None` for operator (CLI) changes.
    pub fn update(
        &self,
        by: Option<&Principal>,
        data_type: DataType,
        change: PolicyUpdate,
    ) -> Result<RetentionPolicy> {
        if let Some(p) = by {
            p.require_admin()?;
        }
        let before = self.get(data_type)?;

        let now = db::now();
        let after = RetentionPolicy {
            data_type,
            retention_days: change.retention_days.unwrap_or(before.retention_days),
            archive_after_days: change
                .archive_after_days
                .unwrap_or(before.archive_after_days),
            legal_basis: change.legal_basis.unwrap_or(before.legal_basis),
            enabled: change.enabled.unwrap_or(before.enabled),
            updated_at: Some(now),
        };
        after.validate()?;

        self.db
            .with_conn(|conn| upsert(conn, &after, &db::ts(now), true))?;
        self.audit.record(
            AuditEvent::new(
                AuditAction::RetentionPolicyUpdated,
                by.map(Principal::actor).unwrap_or_else(Actor::system),
                "retention_policy",
            )
                .resource(data_type.as_str())
                .before(serde_json::to_value(&before)?)
                .after(serde_json::to_value(&after)?),
        );
        info!(
            "Retention policy {} set to {} days (archive: {:?})",
            data_type, after.retention_days, after.archive_after_days
        );
        Ok(after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::users::Role;
    use crate::users::tests::{make, store};

    fn setup() -> (PolicyStore, Principal, Principal) {
        let db = Database::open_in_memory().unwrap();
        let users = store(&db);
        let admin = make(&users, "admin@example.com", Role::Admin);
        let approver = make(&users, "a@example.com", Role::Approver);
        (
            PolicyStore::new(db.clone(), AuditLogger::new(db)),
            admin,
            approver,
        )
    }

    fn stored_rows(policies: &PolicyStore) -> i64 {
        policies
            .db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM retention_policies", [], |r| r.get(0))?)
            })
            .unwrap()
    }

    #[test]
    fn reads_fall_back_to_defaults_without_writing() {
        let (policies, _, _) = setup();
        let list = policies.list().unwrap();
        let types: Vec<DataType> = list.iter().map(|p| p.data_type).collect();
        assert_eq!(types, DataType::ALL);
        assert_eq!(list[0].retention_days, 30);
        assert_eq!(policies.get(DataType::AuditLog).unwrap().retention_days, 2555);
        assert_eq!(stored_rows(&policies), 0);

        policies.seed_defaults().unwrap();
        assert_eq!(stored_rows(&policies), DataType::ALL.len() as i64);
    }

    #[test]
    fn update_validates_and_persists() {
        let (policies, admin, approver) = setup();
        let change = PolicyUpdate {
            retention_days: Some(60),
            ..Default::default()
        };

        assert!(matches!(
            policies.update(Some(&approver), DataType::Notification, change.clone()),
            Err(Error::Forbidden(_))
        ));

        let updated = policies
            .update(Some(&admin), DataType::Notification, change)
            .unwrap();
        assert_eq!(updated.retention_days, 60);
        assert_eq!(updated.archive_after_days, Some(30));
        assert_eq!(
            policies.get(DataType::Notification).unwrap().retention_days,
            60
        );

        let too_short = PolicyUpdate {
            retention_days: Some(100),
            ..Default::default()
        };
        assert!(policies.update(None, DataType::AuditLog, too_short).is_err());
    }

    #[test]
    fn explicit_null_clears_archive() {
        let change: PolicyUpdate = serde_json::from_str(r#"{"archive_after_days": null}"#).unwrap();
        assert_eq!(change.archive_after_days, Some(None));
        let absent: PolicyUpdate = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.archive_after_days, None);
    }
}
