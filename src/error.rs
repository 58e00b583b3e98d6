//! Service error type shared by the stores and the HTTP layer.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("cannot {action} while {state}")]
    InvalidTransition { action: String, state: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("token expired")]
    TokenExpired,

    #[error("too many failed attempts, locked until {until}")]
    LockedOut { until: String },

    #[error("{0} is disabled")]
    Disabled(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn forbidden(why: impl Into<String>) -> Self {
        Self::Forbidden(why.into())
    }

    pub fn validation(why: impl Into<String>) -> Self {
        Self::Validation(why.into())
    }

    pub fn conflict(why: impl Into<String>) -> Self {
        Self::Conflict(why.into())
    }

    pub fn transition(action: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Self::InvalidTransition {
            action: action.into(),
            state: state.to_string(),
        }
    }

    /// A panic while holding the connection poisoned its lock.
    pub fn poisoned<T>(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("lock poisoned: {}", e))
    }
}

/// A stored enum column held a value this build does not know.
#[derive(Debug, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl From<ParseEnumError> for Error {
    fn from(e: ParseEnumError) -> Self {
        Self::Validation(e.to_string())
    }
}
