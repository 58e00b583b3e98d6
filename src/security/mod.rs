//! Credentials and emergency access.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                    security (this module)                     │
//! ├──────────────────┬──────────────────┬─────────────────────────┤
//! │  secrets.rs      │  tokens.rs       │  break_glass.rs         │
//! │  Startup env     │  Random tokens,  │  Key check, lockout,    │
//! │  validation,     │  HMAC at rest,   │  time-boxed sessions,   │
//! │  masking         │  SHA-256 helper  │  audit trail            │
//! └──────────────────┴──────────────────┴─────────────────────────┘
//! ```
//!
//! Secrets never appear in logs: [`SecretReport`] only carries masked
//! values, and bearer/verification tokens are persisted as HMACs keyed
//! with the session secret.

mod break_glass;
mod secrets;
mod tokens;

pub use break_glass::{BreakGlass, BreakGlassSession, Grant, MAX_SESSION_MINUTES};
pub use secrets::{
    BREAK_GLASS_KEY_VAR, CredentialGroup, GROUPS, PUBLIC_URL_VAR, PresentSecret, Requirement,
    Rule, SECRETS, SESSION_SECRET_VAR, SecretIssue, SecretReport, SecretRequirements, SecretSpec,
    Severity, mask, validate_config, validate_config_with, validate_secrets,
};
pub use tokens::{TokenHasher, generate_token, sha256_hex};
