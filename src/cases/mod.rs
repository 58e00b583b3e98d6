//! Case studies and their approval workflow.
//!
//! ```text
//!   create ──► Draft ──submit──► Submitted ──approve──► Approved ──publish──► Published
//!                ▲                   │
//!                │                reject
//!                │                   ▼
//!                └──── (edit) ◄── Rejected ──submit──► Submitted
//! ```
//!
//! | Operation | Who | From |
//! |-----------|-----|------|
//! | create | contributor, approver, admin | n/a |
//! | update | owner / admin | Draft, Rejected / any but Published |
//! | submit | owner | Draft, Rejected |
//! | approve, reject | approver, admin (not own case unless admin) | Submitted |
//! | publish | approver, admin | Approved |
//! | delete | owner / admin | Draft / any |

mod library;
pub mod notifications;

pub use library::{LibraryPage, LibraryQuery};
pub use notifications::{Notification, NotificationStore};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::{AuditAction, AuditEvent, AuditLogger};
use crate::db::{self, Database};
use crate::error::{Error, ParseEnumError, Result};
use crate::mail::{Email, Mailer, Template};
use crate::users::{Principal, UserStore, get_user};

const MAX_TITLE_LEN: usize = 200;
const MAX_TAGS: usize = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    Application,
    Tech,
    Star,
}

impl CaseType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Tech => "tech",
            Self::Star => "star",
        }
    }

    pub fn requires_wps(self) -> bool {
        matches!(self, Self::Tech | Self::Star)
    }
}

impl FromStr for CaseType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "application" => Ok(Self::Application),
            "tech" => Ok(Self::Tech),
            "star" => Ok(Self::Star),
            _ => Err(ParseEnumError::new("case type", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    Published,
}

impl CaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Published => "published",
        }
    }

    /// States the owner may still edit and submit from.
    fn is_editable(self) -> bool {
        matches!(self, Self::Draft | Self::Rejected)
    }
}

impl FromStr for CaseStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "submitted" => Ok(Self::Submitted),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "published" => Ok(Self::Published),
            _ => Err(ParseEnumError::new("case status", s)),
        }
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Welding Procedure Specification attached to Tech and Star cases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wps {
    pub base_metal: String,
    pub filler_metal: String,
    pub process: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shielding_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preheat_temp_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpass_temp_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_weld_heat_treatment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Wps {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("base_metal", &self.base_metal),
            ("filler_metal", &self.filler_metal),
            ("process", &self.process),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(format!("wps.{} is required", field)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CaseStudy {
    pub id: String,
    pub title: String,
    pub case_type: CaseType,
    pub status: CaseStatus,
    pub contributor_id: String,
    pub reviewer_id: Option<String>,
    pub customer_name: String,
    pub industry: String,
    pub location: String,
    pub component: String,
    pub problem: String,
    pub solution: String,
    pub results: String,
    pub tags: Vec<String>,
    pub wps: Option<Wps>,
    pub rejection_reason: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

pub(crate) const CASE_COLUMNS: &str = "id, title, case_type, status, contributor_id, reviewer_id, \
     customer_name, industry, location, component, problem, solution, results, tags, wps, \
     rejection_reason, submitted_at, reviewed_at, published_at, created_at, updated_at, archived_at";

impl CaseStudy {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let case_type: String = row.get(2)?;
        let status: String = row.get(3)?;
        let tags: String = row.get(13)?;
        let wps: Option<String> = row.get(14)?;
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            case_type: case_type.parse().map_err(|e| db::conversion_error(2, e))?,
            status: status.parse().map_err(|e| db::conversion_error(3, e))?,
            contributor_id: row.get(4)?,
            reviewer_id: row.get(5)?,
            customer_name: row.get(6)?,
            industry: row.get(7)?,
            location: row.get(8)?,
            component: row.get(9)?,
            problem: row.get(10)?,
            solution: row.get(11)?,
            results: row.get(12)?,
            tags: serde_json::from_str(&tags).map_err(|e| db::conversion_error(13, e))?,
            wps: wps
                .map(|w| serde_json::from_str(&w).map_err(|e| db::conversion_error(14, e)))
                .transpose()?,
            rejection_reason: row.get(15)?,
            submitted_at: db::opt_ts_column(row, 16)?,
            reviewed_at: db::opt_ts_column(row, 17)?,
            published_at: db::opt_ts_column(row, 18)?,
            created_at: db::ts_column(row, 19)?,
            updated_at: db::ts_column(row, 20)?,
            archived_at: db::opt_ts_column(row, 21)?,
        })
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn is_owned_by(&self, p: &Principal) -> bool {
        self.contributor_id == p.id()
    }

    fn visible_to(&self, p: &Principal) -> bool {
        self.status == CaseStatus::Published || self.is_owned_by(p) || p.role().can_review()
    }
}

/// Fields supplied when creating a case.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewCase {
    pub title: String,
    pub case_type: Option<CaseType>,
    pub customer_name: String,
    pub industry: String,
    pub location: String,
    pub component: String,
    pub problem: String,
    pub solution: String,
    pub results: String,
    pub tags: Vec<String>,
    pub wps: Option<Wps>,
}

/// Partial update; absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CaseUpdate {
    pub title: Option<String>,
    pub case_type: Option<CaseType>,
    pub customer_name: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub component: Option<String>,
    pub problem: Option<String>,
    pub solution: Option<String>,
    pub results: Option<String>,
    pub tags: Option<Vec<String>>,
    pub wps: Option<Wps>,
}

impl CaseUpdate {
    fn apply(self, case: &mut CaseStudy) {
        fn set(slot: &mut String, value: Option<String>) {
            if let Some(v) = value {
                *slot = v.trim().to_string();
            }
        }
        set(&mut case.title, self.title);
        set(&mut case.customer_name, self.customer_name);
        set(&mut case.industry, self.industry);
        set(&mut case.location, self.location);
        set(&mut case.component, self.component);
        set(&mut case.problem, self.problem);
        set(&mut case.solution, self.solution);
        set(&mut case.results, self.results);
        if let Some(t) = self.case_type {
            case.case_type = t;
        }
        if let Some(tags) = self.tags {
            case.tags = normalize_tags(tags);
        }
        if self.wps.is_some() {
            case.wps = self.wps;
        }
    }
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

fn validate_fields(case: &CaseStudy) -> Result<()> {
    if case.title.trim().is_empty() {
        return Err(Error::validation("title is required"));
    }
    if case.title.chars().count() > MAX_TITLE_LEN {
        return Err(Error::validation(format!(
            "title is longer than {} characters",
            MAX_TITLE_LEN
        )));
    }
    if case.tags.len() > MAX_TAGS {
        return Err(Error::validation(format!("at most {} tags", MAX_TAGS)));
    }
    if let Some(wps) = &case.wps {
        wps.validate()?;
    }
    Ok(())
}

/// Checks that must pass before a case leaves Draft/Rejected.
fn validate_for_submission(case: &CaseStudy) -> Result<()> {
    for (field, value) in [
        ("title", &case.title),
        ("customer_name", &case.customer_name),
        ("problem", &case.problem),
        ("solution", &case.solution),
    ] {
        if value.trim().is_empty() {
            return Err(Error::validation(format!("{} is required to submit", field)));
        }
    }
    if case.case_type.requires_wps() && case.wps.is_none() {
        return Err(Error::validation(format!(
            "{} case studies require a WPS",
            case.case_type.as_str()
        )));
    }
    Ok(())
}

fn load(conn: &Connection, id: &str) -> Result<CaseStudy> {
    conn.query_row(
        &format!("SELECT {} FROM case_studies WHERE id = ?1", CASE_COLUMNS),
        params![id],
        CaseStudy::from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found(format!("case study {}", id)))
}

/// Hidden cases report NotFound rather than Forbidden.
fn load_visible(conn: &Connection, p: &Principal, id: &str) -> Result<CaseStudy> {
    let case = load(conn, id)?;
    if !case.visible_to(p) {
        return Err(Error::not_found(format!("case study {}", id)));
    }
    Ok(case)
}

fn check_reviewable(p: &Principal, case: &CaseStudy, action: &str) -> Result<()> {
    if case.status != CaseStatus::Submitted {
        return Err(Error::transition(action, case.status));
    }
    if case.is_owned_by(p) && !p.user.is_admin() {
        return Err(Error::forbidden("approvers cannot review their own case study"));
    }
    Ok(())
}

fn insert(conn: &Connection, case: &CaseStudy) -> Result<()> {
    let wps = case.wps.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO case_studies (id, title, case_type, status, contributor_id, reviewer_id,
            customer_name, industry, location, component, problem, solution, results, tags, wps,
            rejection_reason, submitted_at, reviewed_at, published_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
            ?18, ?19, ?20, ?21)",
        params![
            case.id,
            case.title,
            case.case_type.as_str(),
            case.status.as_str(),
            case.contributor_id,
            case.reviewer_id,
            case.customer_name,
            case.industry,
            case.location,
            case.component,
            case.problem,
            case.solution,
            case.results,
            serde_json::to_string(&case.tags)?,
            wps,
            case.rejection_reason,
            case.submitted_at.map(db::ts),
            case.reviewed_at.map(db::ts),
            case.published_at.map(db::ts),
            db::ts(case.created_at),
            db::ts(case.updated_at),
        ],
    )?;
    Ok(())
}

/// Overwrites the row only if it still matches `before` (same status and
/// `updated_at`). A row that changed or vanished in between is a conflict;
/// nothing is re-inserted.
fn update(conn: &Connection, before: &CaseStudy, after: &CaseStudy) -> Result<()> {
    let wps = after.wps.as_ref().map(serde_json::to_string).transpose()?;
    let changed = conn.execute(
        "UPDATE case_studies SET
            title = ?3, case_type = ?4, status = ?5, reviewer_id = ?6, customer_name = ?7,
            industry = ?8, location = ?9, component = ?10, problem = ?11, solution = ?12,
            results = ?13, tags = ?14, wps = ?15, rejection_reason = ?16, submitted_at = ?17,
            reviewed_at = ?18, published_at = ?19, updated_at = ?20
         WHERE id = ?1 AND status = ?2 AND updated_at = ?21",
        params![
            after.id,
            before.status.as_str(),
            after.title,
            after.case_type.as_str(),
            after.status.as_str(),
            after.reviewer_id,
            after.customer_name,
            after.industry,
            after.location,
            after.component,
            after.problem,
            after.solution,
            after.results,
            serde_json::to_string(&after.tags)?,
            wps,
            after.rejection_reason,
            after.submitted_at.map(db::ts),
            after.reviewed_at.map(db::ts),
            after.published_at.map(db::ts),
            db::ts(after.updated_at),
            db::ts(before.updated_at),
        ],
    )?;
    if changed == 0 {
        return Err(Error::conflict(format!(
            "case study {} was changed or removed concurrently",
            after.id
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CaseStore {
    db: Database,
    audit: AuditLogger,
    users: UserStore,
    notifications: NotificationStore,
    mailer: Arc<dyn Mailer>,
    base_url: String,
}

impl CaseStore {
    pub fn new(
        db: Database,
        audit: AuditLogger,
        users: UserStore,
        mailer: Arc<dyn Mailer>,
        base_url: &str,
    ) -> Self {
        Self {
            notifications: NotificationStore::new(db.clone()),
            db,
            audit,
            users,
            mailer,
            base_url: base_url.to_string(),
        }
    }

    pub fn create(&self, p: &Principal, input: NewCase) -> Result<CaseStudy> {
        if !p.role().can_author() {
            return Err(Error::forbidden("viewers cannot create case studies"));
        }
        let now = db::now();
        let case = CaseStudy {
            id: uuid::Uuid::new_v4().to_string(),
            title: input.title.trim().to_string(),
            case_type: input.case_type.unwrap_or(CaseType::Application),
            status: CaseStatus::Draft,
            contributor_id: p.id().to_string(),
            reviewer_id: None,
            customer_name: input.customer_name.trim().to_string(),
            industry: input.industry.trim().to_string(),
            location: input.location.trim().to_string(),
            component: input.component.trim().to_string(),
            problem: input.problem.trim().to_string(),
            solution: input.solution.trim().to_string(),
            results: input.results.trim().to_string(),
            tags: normalize_tags(input.tags),
            wps: input.wps,
            rejection_reason: None,
            submitted_at: None,
            reviewed_at: None,
            published_at: None,
            created_at: now,
            updated_at: now,
            archived_at: None,
        };
        validate_fields(&case)?;

        self.db.with_conn(|conn| insert(conn, &case))?;
        self.audit.record(
            AuditEvent::new(AuditAction::CaseCreated, p.actor(), "case_study")
                .resource(&case.id)
                .after(case.snapshot()?),
        );
        info!("Case study {} created by {}", case.id, p.id());
        Ok(case)
    }

    pub fn get(&self, p: &Principal, id: &str) -> Result<CaseStudy> {
        self.db.with_conn(|conn| load_visible(conn, p, id))
    }

    /// Own cases for authors; every case for reviewers.
    pub fn list(&self, p: &Principal, status: Option<CaseStatus>) -> Result<Vec<CaseStudy>> {
        let all = p.role().can_review();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM case_studies
                 WHERE (?1 OR contributor_id = ?2) AND (?3 IS NULL OR status = ?3)
                 ORDER BY updated_at DESC",
                CASE_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![all, p.id(), status.map(CaseStatus::as_str)],
                CaseStudy::from_row,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn update(&self, p: &Principal, id: &str, patch: CaseUpdate) -> Result<CaseStudy> {
        self.mutate(p, id, AuditAction::CaseUpdated, |before| {
            let owner = before.is_owned_by(p);
            if !owner && !p.user.is_admin() {
                return Err(Error::forbidden("only the owner or an admin can edit"));
            }
            let allowed = if p.user.is_admin() {
                before.status != CaseStatus::Published
            } else {
                before.status.is_editable()
            };
            if !allowed {
                return Err(Error::transition("edit", before.status));
            }

            let mut case = before.clone();
            patch.apply(&mut case);
            case.updated_at = db::now();
            validate_fields(&case)?;
            Ok(case)
        })
    }

    pub fn submit(&self, p: &Principal, id: &str) -> Result<CaseStudy> {
        let case = self.mutate(p, id, AuditAction::CaseSubmitted, |before| {
            if !before.is_owned_by(p) {
                return Err(Error::forbidden("only the owner can submit"));
            }
            if !before.status.is_editable() {
                return Err(Error::transition("submit", before.status));
            }
            validate_for_submission(before)?;

            let now = db::now();
            let mut case = before.clone();
            case.status = CaseStatus::Submitted;
            case.submitted_at = Some(now);
            case.rejection_reason = None;
            case.reviewer_id = None;
            case.reviewed_at = None;
            case.updated_at = now;
            Ok(case)
        })?;

        for reviewer in self.users.reviewers()? {
            if reviewer.id == case.contributor_id {
                continue;
            }
            self.notify(
                &reviewer.id,
                &reviewer.email,
                "case_submitted",
                &format!("\"{}\" is awaiting review", case.title),
                &case,
                Template::CaseSubmitted {
                    case_id: &case.id,
                    title: &case.title,
                    contributor: &p.user.name,
                },
            );
        }
        Ok(case)
    }

    pub fn approve(&self, p: &Principal, id: &str) -> Result<CaseStudy> {
        if !p.role().can_review() {
            return Err(Error::forbidden("only approvers can approve"));
        }
        let case = self.mutate(p, id, AuditAction::CaseApproved, |before| {
            check_reviewable(p, before, "approve")?;
            let now = db::now();
            let mut case = before.clone();
            case.status = CaseStatus::Approved;
            case.reviewer_id = Some(p.id().to_string());
            case.reviewed_at = Some(now);
            case.updated_at = now;
            Ok(case)
        })?;

        self.notify_owner(
            &case,
            "case_approved",
            &format!("\"{}\" was approved", case.title),
            Template::CaseApproved {
                case_id: &case.id,
                title: &case.title,
            },
        );
        Ok(case)
    }

    pub fn reject(&self, p: &Principal, id: &str, reason: &str) -> Result<CaseStudy> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::validation("a rejection reason is required"));
        }
        if !p.role().can_review() {
            return Err(Error::forbidden("only approvers can reject"));
        }
        let case = self.mutate(p, id, AuditAction::CaseRejected, |before| {
            check_reviewable(p, before, "reject")?;
            let now = db::now();
            let mut case = before.clone();
            case.status = CaseStatus::Rejected;
            case.reviewer_id = Some(p.id().to_string());
            case.reviewed_at = Some(now);
            case.rejection_reason = Some(reason.to_string());
            case.updated_at = now;
            Ok(case)
        })?;

        self.notify_owner(
            &case,
            "case_rejected",
            &format!("\"{}\" needs changes", case.title),
            Template::CaseRejected {
                case_id: &case.id,
                title: &case.title,
                reason,
            },
        );
        Ok(case)
    }

    pub fn publish(&self, p: &Principal, id: &str) -> Result<CaseStudy> {
        if !p.role().can_review() {
            return Err(Error::forbidden("only approvers can publish"));
        }
        self.mutate(p, id, AuditAction::CasePublished, |before| {
            if before.status != CaseStatus::Approved {
                return Err(Error::transition("publish", before.status));
            }
            let now = db::now();
            let mut case = before.clone();
            case.status = CaseStatus::Published;
            case.published_at = Some(now);
            case.updated_at = now;
            Ok(case)
        })
    }

    pub fn delete(&self, p: &Principal, id: &str) -> Result<()> {
        let case = self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let case = load_visible(&tx, p, id)?;
            if !p.user.is_admin() {
                if !case.is_owned_by(p) {
                    return Err(Error::forbidden("only the owner or an admin can delete"));
                }
                if case.status != CaseStatus::Draft {
                    return Err(Error::transition("delete", case.status));
                }
            }
            tx.execute("DELETE FROM case_studies WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(case)
        })?;
        self.audit.record(
            AuditEvent::new(AuditAction::CaseDeleted, p.actor(), "case_study")
                .resource(id)
                .before(case.snapshot()?),
        );
        info!("Case study {} deleted by {}", id, p.id());
        Ok(())
    }

    pub fn library(&self, query: &LibraryQuery) -> Result<LibraryPage> {
        self.db.with_conn(|conn| query.run(conn))
    }

    pub fn notifications(&self) -> &NotificationStore {
        &self.notifications
    }

    /// Load, check and write one case under a single write lock so two
    /// reviewers cannot both move it out of the same state.
    fn mutate(
        &self,
        p: &Principal,
        id: &str,
        action: AuditAction,
        change: impl FnOnce(&CaseStudy) -> Result<CaseStudy>,
    ) -> Result<CaseStudy> {
        let (before, after) = self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let before = load_visible(&tx, p, id)?;
            let after = change(&before)?;
            update(&tx, &before, &after)?;
            tx.commit()?;
            Ok((before, after))
        })?;
        self.audit.record(
            AuditEvent::new(action, p.actor(), "case_study")
                .resource(&after.id)
                .before(before.snapshot()?)
                .after(after.snapshot()?),
        );
        Ok(after)
    }

    fn notify_owner(&self, case: &CaseStudy, kind: &str, message: &str, template: Template<'_>) {
        let owner = match self.db.with_conn(|conn| get_user(conn, &case.contributor_id)) {
            Ok(owner) if owner.anonymized_at.is_none() => owner,
            Ok(_) => return,
            Err(e) => {
                warn!("Cannot notify owner of {}: {}", case.id, e);
                return;
            }
        };
        self.notify(&owner.id, &owner.email, kind, message, case, template);
    }

    /// In-app notification plus e-mail. Failures are logged, not returned.
    fn notify(
        &self,
        user_id: &str,
        email: &str,
        kind: &str,
        message: &str,
        case: &CaseStudy,
        template: Template<'_>,
    ) {
        if let Err(e) = self.notifications.push(user_id, kind, message, Some(&case.id)) {
            warn!("Failed to store {} notification: {}", kind, e);
        }
        if let Err(e) = self
            .mailer
            .send(&Email::compose(email, &template, &self.base_url).about(&case.contributor_id))
        {
            warn!("Failed to send {} e-mail: {}", kind, e);
        }
    }
}
