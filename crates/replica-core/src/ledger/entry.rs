//! Ledger entry data model.
//!
//! A `RunLedgerEntry` is the durable record of one attempted operation on one
//! tenant. Entries are append-only; `seq` is assigned by the ledger inside
//! the write transaction that stores the entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::reconcile::Operation;
use crate::types::{ObjectKey, ObjectKind, OpAction, Outcome};

// ---------------------------------------------------------------------------
// LedgerOperation
// ---------------------------------------------------------------------------

/// The operation an entry describes, without the full payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOperation {
    pub action: OpAction,
    pub kind: ObjectKind,
    pub logical_key: String,
    /// Template object version (0 for decommission entries).
    pub version: u32,
    pub content_hash: String,
    /// Remote id after the operation, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl LedgerOperation {
    pub fn from_operation(op: &Operation) -> Self {
        Self {
            action: op.action,
            kind: op.object.kind,
            logical_key: op.object.logical_key.clone(),
            version: op.object.version,
            content_hash: op.content_hash.clone(),
            remote_id: op.target.as_ref().map(|t| t.remote_id.clone()),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind, self.logical_key.clone())
    }
}

// ---------------------------------------------------------------------------
// RunLedgerEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLedgerEntry {
    pub run_id: Uuid,
    /// Global append sequence; 0 until recorded.
    #[serde(default)]
    pub seq: u64,
    pub tenant_id: String,
    pub operation: LedgerOperation,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Remote calls made, including the successful one.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_delays_ms: Vec<u64>,
    pub timestamp: DateTime<Utc>,
}

impl RunLedgerEntry {
    pub fn new(
        run_id: Uuid,
        tenant_id: impl Into<String>,
        operation: LedgerOperation,
        outcome: Outcome,
    ) -> Self {
        Self {
            run_id,
            seq: 0,
            tenant_id: tenant_id.into(),
            operation,
            outcome,
            error_detail: None,
            attempts: 0,
            retry_delays_ms: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32, delays: &[Duration]) -> Self {
        self.attempts = attempts;
        self.retry_delays_ms = delays.iter().map(|d| d.as_millis() as u64).collect();
        self
    }

    /// Whether this entry (re)writes the tenant's record for its object.
    ///
    /// Skips count too: in authoritative mode a skip may confirm an object
    /// adopted from live state, which must be remembered for later runs.
    pub fn updates_record(&self) -> bool {
        let writes = match self.operation.action {
            OpAction::Create | OpAction::Update => self.outcome == Outcome::Applied,
            OpAction::Skip => self.outcome == Outcome::Skipped,
            OpAction::Decommission => false,
        };
        writes && self.operation.remote_id.is_some()
    }
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// Per-run aggregate over a tenant's entries, for audit listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(action: OpAction, remote_id: Option<&str>) -> LedgerOperation {
        LedgerOperation {
            action,
            kind: ObjectKind::Group,
            logical_key: "all-mac".into(),
            version: 1,
            content_hash: "sha256:aa".into(),
            remote_id: remote_id.map(String::from),
        }
    }

    #[test]
    fn updates_record_for_applied_writes_and_confirmed_skips() {
        let run = Uuid::new_v4();
        let applied = RunLedgerEntry::new(run, "acme", op(OpAction::Create, Some("1")), Outcome::Applied);
        assert!(applied.updates_record());

        let skipped = RunLedgerEntry::new(run, "acme", op(OpAction::Skip, Some("1")), Outcome::Skipped);
        assert!(skipped.updates_record());

        let decommissioned =
            RunLedgerEntry::new(run, "acme", op(OpAction::Decommission, Some("1")), Outcome::Applied);
        assert!(!decommissioned.updates_record());

        let failed = RunLedgerEntry::new(run, "acme", op(OpAction::Update, Some("1")), Outcome::Failed);
        assert!(!failed.updates_record());

        let no_id = RunLedgerEntry::new(run, "acme", op(OpAction::Create, None), Outcome::Applied);
        assert!(!no_id.updates_record());
    }

    #[test]
    fn with_attempts_records_delays_in_ms() {
        let e = RunLedgerEntry::new(Uuid::new_v4(), "acme", op(OpAction::Create, None), Outcome::Applied)
            .with_attempts(
                4,
                &[
                    Duration::from_millis(500),
                    Duration::from_secs(1),
                    Duration::from_secs(2),
                ],
            );
        assert_eq!(e.attempts, 4);
        assert_eq!(e.retry_delays_ms, vec![500, 1000, 2000]);
    }

    #[test]
    fn entry_json_roundtrip_omits_empty_fields() {
        let e = RunLedgerEntry::new(Uuid::new_v4(), "acme", op(OpAction::Skip, None), Outcome::Skipped);
        let json = serde_json::to_string(&e).unwrap();
        assert!(!json.contains("error_detail"));
        assert!(!json.contains("retry_delays_ms"));
        let parsed: RunLedgerEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, e);
    }
}
