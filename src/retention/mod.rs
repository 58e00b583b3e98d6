//! Data retention: per-type policies, cleanup runs and the scheduler.
//!
//! Each [`DataType`] has one [`RetentionPolicy`]. A run deletes eligible
//! rows older than `now - retention_days` and marks rows older than
//! `now - archive_after_days` as archived. Rows that are still part of a
//! live workflow (open GDPR requests, active sessions, submitted cases) are
//! never eligible.

mod engine;
mod runner;
mod store;

pub use engine::{RetentionEngine, RetentionReport, TypeResult};
pub use runner::RetentionRunner;
pub use store::{PolicyStore, PolicyUpdate};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, ParseEnumError, Result};

/// Audit entries must be kept at least this long.
pub const MIN_AUDIT_RETENTION_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Session,
    Notification,
    DraftCaseStudy,
    EmailOutbox,
    GdprRequest,
    BreakGlassSession,
    AuditLog,
}

impl DataType {
    pub const ALL: &'static [DataType] = &[
        Self::Session,
        Self::Notification,
        Self::DraftCaseStudy,
        Self::EmailOutbox,
        Self::GdprRequest,
        Self::BreakGlassSession,
        Self::AuditLog,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Notification => "notification",
            Self::DraftCaseStudy => "draft_case_study",
            Self::EmailOutbox => "email_outbox",
            Self::GdprRequest => "gdpr_request",
            Self::BreakGlassSession => "break_glass_session",
            Self::AuditLog => "audit_log",
        }
    }

    /// Whether the backing table has an `archived_at` column.
    pub fn supports_archive(self) -> bool {
        !matches!(self, Self::Session | Self::GdprRequest)
    }
}

impl FromStr for DataType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("data type", s))
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GDPR Art. 6 basis for keeping the data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LegalBasis {
    Consent,
    Contract,
    LegalObligation,
    LegitimateInterest,
}

impl LegalBasis {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Consent => "consent",
            Self::Contract => "contract",
            Self::LegalObligation => "legal_obligation",
            Self::LegitimateInterest => "legitimate_interest",
        }
    }
}

impl FromStr for LegalBasis {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "consent" => Ok(Self::Consent),
            "contract" => Ok(Self::Contract),
            "legal_obligation" => Ok(Self::LegalObligation),
            "legitimate_interest" => Ok(Self::LegitimateInterest),
            _ => Err(ParseEnumError::new("legal basis", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetentionPolicy {
    pub data_type: DataType,
    pub retention_days: u32,
    pub archive_after_days: Option<u32>,
    pub legal_basis: LegalBasis,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RetentionPolicy {
    pub fn default_for(data_type: DataType) -> Self {
        use DataType::*;
        use LegalBasis::*;
        let (retention_days, archive_after_days, legal_basis) = match data_type {
            Session => (30, None, Contract),
            Notification => (90, Some(30), LegitimateInterest),
            DraftCaseStudy => (365, Some(180), LegitimateInterest),
            EmailOutbox => (30, Some(7), LegitimateInterest),
            GdprRequest => (1095, None, LegalObligation),
            BreakGlassSession => (365, Some(90), LegalObligation),
            AuditLog => (2555, Some(365), LegalObligation),
        };
        Self {
            data_type,
            retention_days,
            archive_after_days,
            legal_basis,
            enabled: true,
            updated_at: None,
        }
    }

    pub fn defaults() -> Vec<Self> {
        DataType::ALL.iter().map(|t| Self::default_for(*t)).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention_days < 1 {
            return Err(Error::validation("retention_days must be at least 1"));
        }
        if self.data_type == DataType::AuditLog && self.retention_days < MIN_AUDIT_RETENTION_DAYS {
            return Err(Error::validation(format!(
                "audit_log retention must be at least {} days",
                MIN_AUDIT_RETENTION_DAYS
            )));
        }
        if let Some(archive) = self.archive_after_days {
            if !self.data_type.supports_archive() {
                return Err(Error::validation(format!(
                    "{} does not support archiving",
                    self.data_type
                )));
            }
            if archive >= self.retention_days {
                return Err(Error::validation(
                    "archive_after_days must be less than retention_days",
                ));
            }
        }
        Ok(())
    }

    /// Rows last updated before this instant are deleted.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.retention_days))
    }

    /// Rows last updated before this instant are archived.
    pub fn archive_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.archive_after_days
            .map(|days| now - Duration::days(i64::from(days)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_are_valid() {
        for policy in RetentionPolicy::defaults() {
            policy.validate().unwrap();
        }
        assert_eq!(RetentionPolicy::defaults().len(), DataType::ALL.len());
    }

    #[test]
    fn cutoff_arithmetic() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let policy = RetentionPolicy::default_for(DataType::Notification);
        assert_eq!(
            policy.cutoff(now),
            Utc.with_ymd_and_hms(2025, 12, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(
            policy.archive_cutoff(now),
            Some(Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap())
        );
        assert_eq!(
            RetentionPolicy::default_for(DataType::Session).archive_cutoff(now),
            None
        );
    }

    #[test]
    fn validation_rules() {
        let mut p = RetentionPolicy::default_for(DataType::Notification);
        p.retention_days = 0;
        assert!(p.validate().is_err());

        p.retention_days = 30;
        p.archive_after_days = Some(30);
        assert!(p.validate().is_err());

        let mut audit = RetentionPolicy::default_for(DataType::AuditLog);
        audit.retention_days = 364;
        audit.archive_after_days = None;
        assert!(audit.validate().is_err());

        let mut session = RetentionPolicy::default_for(DataType::Session);
        session.archive_after_days = Some(1);
        assert!(session.validate().is_err());
    }

    #[test]
    fn data_type_names() {
        for t in DataType::ALL {
            assert_eq!(t.as_str().parse::<DataType>().unwrap(), *t);
        }
        assert!("cases".parse::<DataType>().is_err());
    }
}
