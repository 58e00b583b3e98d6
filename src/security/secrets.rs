//! Startup validation of environment-provided credentials.
//!
//! Every credential the service or its integrations read from the
//! environment is listed in [`SECRETS`] with a shape rule. Credentials that
//! only work together (OAuth client id + secret, SMTP, NetSuite TBA) form
//! [`GROUPS`] that must be configured all-or-none. Values are never logged;
//! reports carry masked previews only.

use regex::Regex;
use serde::Serialize;
use std::env::VarError;

use crate::config::{Config, env_reference, resolved};

/// Shape a present value must satisfy.
#[derive(Debug, Clone, Copy)]
pub enum Rule {
    NonEmpty,
    MinLength(usize),
    Url,
    Email,
    Port,
    Prefix(&'static str),
    Pattern(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
    /// Required when break-glass access is enabled
    BreakGlass,
}

#[derive(Debug, Clone, Copy)]
pub struct SecretSpec {
    pub name: &'static str,
    pub rule: Rule,
    pub requirement: Requirement,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct CredentialGroup {
    pub name: &'static str,
    pub members: &'static [&'static str],
}

pub const SESSION_SECRET_VAR: &str = "CASEBUILDER_SESSION_SECRET";
pub const PUBLIC_URL_VAR: &str = "CASEBUILDER_PUBLIC_URL";
pub const BREAK_GLASS_KEY_VAR: &str = "CASEBUILDER_BREAK_GLASS_KEY";

pub const SECRETS: &[SecretSpec] = &[
    SecretSpec {
        name: SESSION_SECRET_VAR,
        rule: Rule::MinLength(32),
        requirement: Requirement::Required,
        description: "HMAC key for API and verification tokens",
    },
    SecretSpec {
        name: PUBLIC_URL_VAR,
        rule: Rule::Url,
        requirement: Requirement::Required,
        description: "Externally reachable base URL",
    },
    SecretSpec {
        name: BREAK_GLASS_KEY_VAR,
        rule: Rule::MinLength(32),
        requirement: Requirement::BreakGlass,
        description: "Emergency admin access key",
    },
    SecretSpec {
        name: "GOOGLE_CLIENT_ID",
        rule: Rule::Pattern(r"^[0-9]+-[a-z0-9]+\.apps\.googleusercontent\.com$"),
        requirement: Requirement::Optional,
        description: "Google OAuth client id",
    },
    SecretSpec {
        name: "GOOGLE_CLIENT_SECRET",
        rule: Rule::MinLength(16),
        requirement: Requirement::Optional,
        description: "Google OAuth client secret",
    },
    SecretSpec {
        name: "SMTP_HOST",
        rule: Rule::Pattern(r"^[A-Za-z0-9.-]+$"),
        requirement: Requirement::Optional,
        description: "Outbound mail relay host",
    },
    SecretSpec {
        name: "SMTP_PORT",
        rule: Rule::Port,
        requirement: Requirement::Optional,
        description: "Outbound mail relay port",
    },
    SecretSpec {
        name: "SMTP_USER",
        rule: Rule::NonEmpty,
        requirement: Requirement::Optional,
        description: "Outbound mail relay user",
    },
    SecretSpec {
        name: "SMTP_PASSWORD",
        rule: Rule::MinLength(8),
        requirement: Requirement::Optional,
        description: "Outbound mail relay password",
    },
    SecretSpec {
        name: "EMAIL_FROM",
        rule: Rule::Email,
        requirement: Requirement::Optional,
        description: "Sender address for notification e-mail",
    },
    SecretSpec {
        name: "ANTHROPIC_API_KEY",
        rule: Rule::Prefix("sk-ant-"),
        requirement: Requirement::Optional,
        description: "AI assistance for case drafting",
    },
    SecretSpec {
        name: "INSIGHTLY_API_KEY",
        rule: Rule::MinLength(20),
        requirement: Requirement::Optional,
        description: "Insightly CRM API key",
    },
    SecretSpec {
        name: "INSIGHTLY_API_URL",
        rule: Rule::Url,
        requirement: Requirement::Optional,
        description: "Insightly pod API base URL",
    },
    SecretSpec {
        name: "NETSUITE_ACCOUNT_ID",
        rule: Rule::Pattern(r"^[0-9A-Za-z_-]+$"),
        requirement: Requirement::Optional,
        description: "NetSuite account id",
    },
    SecretSpec {
        name: "NETSUITE_CONSUMER_KEY",
        rule: Rule::MinLength(32),
        requirement: Requirement::Optional,
        description: "NetSuite TBA consumer key",
    },
    SecretSpec {
        name: "NETSUITE_CONSUMER_SECRET",
        rule: Rule::MinLength(32),
        requirement: Requirement::Optional,
        description: "NetSuite TBA consumer secret",
    },
    SecretSpec {
        name: "NETSUITE_TOKEN_ID",
        rule: Rule::MinLength(32),
        requirement: Requirement::Optional,
        description: "NetSuite TBA token id",
    },
    SecretSpec {
        name: "NETSUITE_TOKEN_SECRET",
        rule: Rule::MinLength(32),
        requirement: Requirement::Optional,
        description: "NetSuite TBA token secret",
    },
];

pub const GROUPS: &[CredentialGroup] = &[
    CredentialGroup {
        name: "google_oauth",
        members: &["GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_SECRET"],
    },
    CredentialGroup {
        name: "smtp",
        members: &[
            "SMTP_HOST",
            "SMTP_PORT",
            "SMTP_USER",
            "SMTP_PASSWORD",
            "EMAIL_FROM",
        ],
    },
    CredentialGroup {
        name: "insightly",
        members: &["INSIGHTLY_API_KEY", "INSIGHTLY_API_URL"],
    },
    CredentialGroup {
        name: "netsuite",
        members: &[
            "NETSUITE_ACCOUNT_ID",
            "NETSUITE_CONSUMER_KEY",
            "NETSUITE_CONSUMER_SECRET",
            "NETSUITE_TOKEN_ID",
            "NETSUITE_TOKEN_SECRET",
        ],
    },
];

/// Values that show up in copied example configs.
const PLACEHOLDERS: &[&str] = &["changeme", "change-me", "secret", "password", "example"];

#[derive(Debug, Clone, Copy, Default)]
pub struct SecretRequirements {
    pub break_glass_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecretIssue {
    pub name: String,
    pub severity: Severity,
    pub problem: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresentSecret {
    pub name: String,
    pub masked: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SecretReport {
    pub issues: Vec<SecretIssue>,
    pub present: Vec<PresentSecret>,
}

impl SecretReport {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &SecretIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &SecretIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    fn push(&mut self, name: &str, severity: Severity, problem: impl Into<String>) {
        self.issues.push(SecretIssue {
            name: name.to_string(),
            severity,
            problem: problem.into(),
        });
    }
}

/// Validate the effective configuration. The session secret, public URL and
/// break-glass key are read from `config` (after `${VAR}` expansion); other
/// credentials from the process environment.
pub fn validate_config(config: &Config) -> SecretReport {
    validate_config_with(config, |key| std::env::var(key))
}

pub fn validate_config_with<F>(config: &Config, env_fn: F) -> SecretReport
where
    F: Fn(&str) -> std::result::Result<String, VarError>,
{
    let configured = [
        (
            SESSION_SECRET_VAR,
            "security.session_secret",
            config.security.session_secret.as_str(),
        ),
        (PUBLIC_URL_VAR, "server.public_url", config.server.public_url.as_str()),
        (BREAK_GLASS_KEY_VAR, "break_glass.key", config.break_glass.key.as_str()),
    ];

    let mut report = validate_secrets(
        |key| match configured.iter().find(|(name, _, _)| *name == key) {
            Some((_, _, value)) => resolved(value)
                .map(str::to_string)
                .ok_or(VarError::NotPresent),
            None => env_fn(key),
        },
        &SecretRequirements {
            break_glass_enabled: config.break_glass.enabled,
        },
    );

    for (name, field, value) in configured {
        if let Some(var) = env_reference(value) {
            for issue in report.issues.iter_mut().filter(|i| i.name == name) {
                issue.problem = format!("{} references unset environment variable {}", field, var);
            }
        }
    }
    report
}

/// Validate credentials read through `env_fn` (injectable for tests).
pub fn validate_secrets<F>(env_fn: F, requirements: &SecretRequirements) -> SecretReport
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    let mut report = SecretReport::default();
    let lookup = |name: &str| env_fn(name).ok().filter(|v| !v.trim().is_empty());

    for spec in SECRETS {
        let required = match spec.requirement {
            Requirement::Required => true,
            Requirement::BreakGlass => requirements.break_glass_enabled,
            Requirement::Optional => false,
        };

        match lookup(spec.name) {
            Some(value) => {
                if let Err(problem) = check_rule(spec.rule, &value) {
                    report.push(spec.name, Severity::Error, problem);
                } else if PLACEHOLDERS.contains(&value.trim().to_ascii_lowercase().as_str()) {
                    report.push(spec.name, Severity::Warning, "looks like a placeholder value");
                }
                report.present.push(PresentSecret {
                    name: spec.name.to_string(),
                    masked: mask(&value),
                });
            }
            None if required => {
                report.push(
                    spec.name,
                    Severity::Error,
                    format!("missing ({})", spec.description),
                );
            }
            None => {}
        }
    }

    for group in GROUPS {
        let missing: Vec<&str> = group
            .members
            .iter()
            .copied()
            .filter(|m| lookup(m).is_none())
            .collect();
        if !missing.is_empty() && missing.len() < group.members.len() {
            report.push(
                group.name,
                Severity::Error,
                format!("partially configured, missing {}", missing.join(", ")),
            );
        }
    }

    if let (Some(session), Some(key)) = (lookup(SESSION_SECRET_VAR), lookup(BREAK_GLASS_KEY_VAR))
        && session == key
    {
        report.push(
            BREAK_GLASS_KEY_VAR,
            Severity::Error,
            format!("must differ from {}", SESSION_SECRET_VAR),
        );
    }

    report
}

fn check_rule(rule: Rule, value: &str) -> Result<(), String> {
    match rule {
        Rule::NonEmpty => Ok(()),
        Rule::MinLength(n) => {
            let len = value.chars().count();
            if len < n {
                Err(format!("too short ({} chars, need at least {})", len, n))
            } else {
                Ok(())
            }
        }
        Rule::Url => {
            let ok = (value.starts_with("https://") || value.starts_with("http://"))
                && value.split("://").nth(1).is_some_and(|rest| {
                    let host = rest.split('/').next().unwrap_or_default();
                    !host.is_empty() && !host.contains(' ')
                });
            if ok {
                Ok(())
            } else {
                Err("not an http(s) URL".to_string())
            }
        }
        Rule::Email => {
            let ok = value.split_once('@').is_some_and(|(local, domain)| {
                !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
            }) && !value.contains(char::is_whitespace);
            if ok {
                Ok(())
            } else {
                Err("not an e-mail address".to_string())
            }
        }
        Rule::Port => match value.parse::<u16>() {
            Ok(p) if p > 0 => Ok(()),
            _ => Err("not a TCP port number".to_string()),
        },
        Rule::Prefix(prefix) => {
            if value.starts_with(prefix) {
                Ok(())
            } else {
                Err(format!("expected prefix '{}'", prefix))
            }
        }
        Rule::Pattern(pattern) => {
            let re = Regex::new(pattern).map_err(|e| format!("bad rule pattern: {}", e))?;
            if re.is_match(value) {
                Ok(())
            } else {
                Err("unexpected format".to_string())
            }
        }
    }
}

/// Masked preview: last four characters for long values, nothing otherwise.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < 12 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}
