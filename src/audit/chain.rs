//! Hash-chain computation and verification.
//!
//! Each entry's `content_hash` is the SHA-256 of the canonical JSON of its
//! fields, `previous_hash` included, so altering any entry changes its own
//! hash and breaks the link from its successor.
//!
//! The first entry links to [`GENESIS_HASH`] (64 zeros). After retention
//! pruning, the first remaining entry links to the recorded anchor instead.

use serde::Serialize;
use serde_json::Value;

use super::AuditEntry;
use crate::error::Result;
use crate::security::sha256_hex;

/// The hash used for the first entry in the chain (no predecessor).
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Field set covered by the content hash. Field order is fixed by the
/// struct; `serde_json::Value` objects serialize with sorted keys.
#[derive(Serialize)]
pub(crate) struct HashedFields<'a> {
    pub id: &'a str,
    pub action: &'a str,
    pub actor_type: &'a str,
    pub actor_id: Option<&'a str>,
    pub resource_type: &'a str,
    pub resource_id: Option<&'a str>,
    pub before: Option<&'a Value>,
    pub after: Option<&'a Value>,
    pub metadata: Option<&'a Value>,
    pub ip_address: Option<&'a str>,
    pub created_at: &'a str,
    pub previous_hash: &'a str,
}

impl HashedFields<'_> {
    pub fn content_hash(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        Ok(sha256_hex(&canonical))
    }
}

impl<'a> From<&'a AuditEntry> for HashedFields<'a> {
    fn from(entry: &'a AuditEntry) -> Self {
        Self {
            id: &entry.id,
            action: entry.action.as_str(),
            actor_type: entry.actor_type.as_str(),
            actor_id: entry.actor_id.as_deref(),
            resource_type: &entry.resource_type,
            resource_id: entry.resource_id.as_deref(),
            before: entry.before.as_ref(),
            after: entry.after.as_ref(),
            metadata: entry.metadata.as_ref(),
            ip_address: entry.ip_address.as_deref(),
            created_at: &entry.created_at,
            previous_hash: &entry.previous_hash,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// Stored content hash does not match the entry's fields.
    ContentMismatch,
    /// `previous_hash` does not match the prior entry (or anchor).
    LinkMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainBreak {
    pub sequence: i64,
    pub kind: BreakKind,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainReport {
    pub checked: usize,
    pub first_sequence: Option<i64>,
    pub last_sequence: Option<i64>,
    /// True when the chain starts from a pruning anchor rather than genesis.
    pub anchored: bool,
    pub breaks: Vec<ChainBreak>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.breaks.is_empty()
    }
}

/// Incremental verifier fed entries in sequence order.
pub(crate) struct ChainVerifier {
    expected_previous: String,
    report: ChainReport,
}

impl ChainVerifier {
    pub fn new(anchor: Option<String>) -> Self {
        let anchored = anchor.is_some();
        Self {
            expected_previous: anchor.unwrap_or_else(|| GENESIS_HASH.to_string()),
            report: ChainReport {
                anchored,
                ..ChainReport::default()
            },
        }
    }

    pub fn push(&mut self, entry: &AuditEntry) -> Result<()> {
        let recomputed = HashedFields::from(entry).content_hash()?;
        if recomputed != entry.content_hash {
            self.report.breaks.push(ChainBreak {
                sequence: entry.sequence,
                kind: BreakKind::ContentMismatch,
            });
        }
        if entry.previous_hash != self.expected_previous {
            self.report.breaks.push(ChainBreak {
                sequence: entry.sequence,
                kind: BreakKind::LinkMismatch,
            });
        }

        // Link the next entry to what is stored, so one altered entry is
        // reported once rather than cascading.
        self.expected_previous = entry.content_hash.clone();
        self.report.checked += 1;
        self.report.first_sequence.get_or_insert(entry.sequence);
        self.report.last_sequence = Some(entry.sequence);
        Ok(())
    }

    pub fn finish(self) -> ChainReport {
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields<'a>(before: Option<&'a Value>, previous: &'a str) -> HashedFields<'a> {
        HashedFields {
            id: "3f1c",
            action: "case_created",
            actor_type: "user",
            actor_id: Some("u1"),
            resource_type: "case_study",
            resource_id: Some("c1"),
            before,
            after: None,
            metadata: None,
            ip_address: None,
            created_at: "2026-01-01T00:00:00.000000Z",
            previous_hash: previous,
        }
    }

    #[test]
    fn hash_is_deterministic() {
        let a = fields(None, GENESIS_HASH).content_hash().unwrap();
        let b = fields(None, GENESIS_HASH).content_hash().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_covers_previous_hash_and_state() {
        let base = fields(None, GENESIS_HASH).content_hash().unwrap();
        let relinked = fields(None, &base).content_hash().unwrap();
        assert_ne!(base, relinked);

        let state = json!({"title": "Crusher liner"});
        let with_state = fields(Some(&state), GENESIS_HASH).content_hash().unwrap();
        assert_ne!(base, with_state);
    }

    #[test]
    fn object_key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(
            fields(Some(&a), GENESIS_HASH).content_hash().unwrap(),
            fields(Some(&b), GENESIS_HASH).content_hash().unwrap()
        );
    }
}
