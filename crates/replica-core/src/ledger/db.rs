//! Durable run ledger backed by redb.
//!
//! # Table design
//!
//! `ENTRIES` uses a composite key:
//! ```text
//! [ tenant_id bytes | 0x00 | timestamp_ms: u64 BE (8 bytes) | seq: u64 BE (8 bytes) ]
//! ```
//!
//! Tenant ids are slugs and never contain `0x00`, so the separator keeps
//! `acme` from matching `acme-prod`. Within a tenant, byte order equals
//! timestamp order, and `history(tenant, since)` is a single range scan.
//!
//! `RECORDS` holds the current `RemoteObjectRecord` per
//! `tenant 0x00 kind 0x00 logical_key`. It is written in the same transaction
//! as the entry that justifies it, so records never disagree with the entries.
//!
//! `META` holds the global append sequence.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::error::{ReplicaError, Result};
use crate::paths;
use crate::record::{RecordSet, RemoteObjectRecord};
use crate::types::{ObjectKey, OpAction, Outcome};

use super::entry::{LedgerOperation, RunLedgerEntry, RunSummary};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Value: JSON-encoded RunLedgerEntry
const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");
/// Value: JSON-encoded RemoteObjectRecord
const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const SEQ_KEY: &str = "seq";

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn tenant_prefix(tenant: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(tenant.len() + 1);
    key.extend_from_slice(tenant.as_bytes());
    key.push(0);
    key
}

fn entry_key(tenant: &str, ts: DateTime<Utc>, seq: u64) -> Vec<u8> {
    let mut key = tenant_prefix(tenant);
    let ms = ts.timestamp_millis().max(0) as u64;
    key.extend_from_slice(&ms.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Upper bound covering every entry of `tenant`.
fn tenant_upper_bound(tenant: &str) -> Vec<u8> {
    let mut key = tenant_prefix(tenant);
    key.extend_from_slice(&[0xff; 16]);
    key
}

fn record_key(tenant: &str, key: &ObjectKey) -> Vec<u8> {
    let mut out = tenant_prefix(tenant);
    out.extend_from_slice(key.kind.as_str().as_bytes());
    out.push(0);
    out.extend_from_slice(key.logical_key.as_bytes());
    out
}

fn db_err(e: impl std::fmt::Display) -> ReplicaError {
    ReplicaError::Ledger(e.to_string())
}

// ---------------------------------------------------------------------------
// RunLedger
// ---------------------------------------------------------------------------

/// Append-only store of run entries plus the current per-tenant records.
///
/// `RunLedger` is `Send + Sync`; share one instance behind an `Arc` across
/// tenant workers. redb serializes write transactions, so concurrent appends
/// never lose updates.
pub struct RunLedger {
    db: Database,
}

impl RunLedger {
    /// Open or create the ledger at `path`, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(ENTRIES).map_err(db_err)?;
        wt.open_table(RECORDS).map_err(db_err)?;
        wt.open_table(META).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    /// Append `entry`, assigning its sequence number. Applied creates and
    /// updates, and skips, also upsert the tenant's record in the same
    /// transaction.
    pub fn record(&self, entry: RunLedgerEntry) -> Result<RunLedgerEntry> {
        paths::validate_tenant_id(&entry.tenant_id)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        let stored = {
            let mut entries = wt.open_table(ENTRIES).map_err(db_err)?;
            let mut records = wt.open_table(RECORDS).map_err(db_err)?;
            let mut meta = wt.open_table(META).map_err(db_err)?;
            let stored = append(&mut entries, &mut meta, entry)?;

            if stored.updates_record() {
                let op = &stored.operation;
                let record = RemoteObjectRecord {
                    kind: op.kind,
                    logical_key: op.logical_key.clone(),
                    remote_id: op.remote_id.clone().unwrap_or_default(),
                    content_hash: op.content_hash.clone(),
                    last_synced_at: stored.timestamp,
                };
                let value = serde_json::to_vec(&record)?;
                records
                    .insert(
                        record_key(&stored.tenant_id, &op.key()).as_slice(),
                        value.as_slice(),
                    )
                    .map_err(db_err)?;
            }
            stored
        };
        wt.commit().map_err(db_err)?;
        Ok(stored)
    }

    /// Entries of `tenant` at or after `since`, in append order.
    pub fn history(&self, tenant: &str, since: Option<DateTime<Utc>>) -> Result<Vec<RunLedgerEntry>> {
        let lower = match since {
            Some(ts) => entry_key(tenant, ts, 0),
            None => tenant_prefix(tenant),
        };
        let upper = tenant_upper_bound(tenant);

        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(ENTRIES).map_err(db_err)?;
        let mut out = Vec::new();
        for item in table
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(db_err)?
        {
            let (_, v) = item.map_err(db_err)?;
            out.push(serde_json::from_slice::<RunLedgerEntry>(v.value())?);
        }
        out.sort_by_key(|e| e.seq);
        Ok(out)
    }

    /// The record last applied for `key` on `tenant`.
    pub fn last_applied(&self, tenant: &str, key: &ObjectKey) -> Result<Option<RemoteObjectRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(RECORDS).map_err(db_err)?;
        let value = table
            .get(record_key(tenant, key).as_slice())
            .map_err(db_err)?;
        match value {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// All current records of `tenant`.
    pub fn records(&self, tenant: &str) -> Result<RecordSet> {
        let prefix = tenant_prefix(tenant);
        let mut upper = prefix.clone();
        upper.push(0xff);

        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(RECORDS).map_err(db_err)?;
        let mut set = RecordSet::new();
        for item in table
            .range(prefix.as_slice()..upper.as_slice())
            .map_err(db_err)?
        {
            let (_, v) = item.map_err(db_err)?;
            set.insert(serde_json::from_slice::<RemoteObjectRecord>(v.value())?);
        }
        Ok(set)
    }

    /// Stop tracking `key` on `tenant`. The only operation that removes a
    /// record; it appends a decommission entry in the same transaction.
    /// The remote object itself is left in place.
    pub fn decommission(&self, tenant: &str, key: &ObjectKey, run_id: Uuid) -> Result<RunLedgerEntry> {
        paths::validate_tenant_id(tenant)?;
        let rkey = record_key(tenant, key);
        let wt = self.db.begin_write().map_err(db_err)?;
        let stored = {
            let mut entries = wt.open_table(ENTRIES).map_err(db_err)?;
            let mut records = wt.open_table(RECORDS).map_err(db_err)?;
            let mut meta = wt.open_table(META).map_err(db_err)?;

            let removed: RemoteObjectRecord = {
                let old = records.remove(rkey.as_slice()).map_err(db_err)?;
                match old {
                    Some(v) => serde_json::from_slice(v.value())?,
                    None => {
                        return Err(ReplicaError::RecordNotFound {
                            tenant: tenant.to_string(),
                            key: key.to_string(),
                        })
                    }
                }
            };

            let entry = RunLedgerEntry::new(
                run_id,
                tenant,
                LedgerOperation {
                    action: OpAction::Decommission,
                    kind: removed.kind,
                    logical_key: removed.logical_key.clone(),
                    version: 0,
                    content_hash: removed.content_hash.clone(),
                    remote_id: Some(removed.remote_id.clone()),
                },
                Outcome::Applied,
            );
            append(&mut entries, &mut meta, entry)?
        };
        wt.commit().map_err(db_err)?;
        Ok(stored)
    }

    /// Remove entries older than `before` across all tenants. Records are
    /// untouched. Returns the number of entries removed.
    ///
    /// Meant to run offline, between runs.
    pub fn compact(&self, before: DateTime<Utc>) -> Result<usize> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let removed = {
            let mut table = wt.open_table(ENTRIES).map_err(db_err)?;
            let mut stale: Vec<Vec<u8>> = Vec::new();
            for item in table.iter().map_err(db_err)? {
                let (k, v) = item.map_err(db_err)?;
                let entry: RunLedgerEntry = serde_json::from_slice(v.value())?;
                if entry.timestamp < before {
                    stale.push(k.value().to_vec());
                }
            }
            for key in &stale {
                table.remove(key.as_slice()).map_err(db_err)?;
            }
            stale.len()
        };
        wt.commit().map_err(db_err)?;
        Ok(removed)
    }

    /// Runs that touched `tenant`, oldest first.
    pub fn runs(&self, tenant: &str) -> Result<Vec<RunSummary>> {
        let mut out: Vec<RunSummary> = Vec::new();
        for entry in self.history(tenant, None)? {
            let idx = match out.iter().position(|r| r.run_id == entry.run_id) {
                Some(i) => i,
                None => {
                    out.push(RunSummary {
                        run_id: entry.run_id,
                        started_at: entry.timestamp,
                        applied: 0,
                        skipped: 0,
                        failed: 0,
                    });
                    out.len() - 1
                }
            };
            let summary = &mut out[idx];
            summary.started_at = summary.started_at.min(entry.timestamp);
            match entry.outcome {
                Outcome::Applied => summary.applied += 1,
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Failed => summary.failed += 1,
            }
        }
        out.sort_by_key(|r| r.started_at);
        Ok(out)
    }
}

fn append(
    entries: &mut redb::Table<'_, &'static [u8], &'static [u8]>,
    meta: &mut redb::Table<'_, &'static str, u64>,
    mut entry: RunLedgerEntry,
) -> Result<RunLedgerEntry> {
    let next = {
        let current = meta.get(SEQ_KEY).map_err(db_err)?;
        current.map(|v| v.value()).unwrap_or(0) + 1
    };
    meta.insert(SEQ_KEY, next).map_err(db_err)?;
    entry.seq = next;

    let key = entry_key(&entry.tenant_id, entry.timestamp, next);
    let value = serde_json::to_vec(&entry)?;
    entries
        .insert(key.as_slice(), value.as_slice())
        .map_err(db_err)?;
    Ok(entry)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectKind;
    use chrono::Duration as CDur;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, RunLedger) {
        let dir = TempDir::new().unwrap();
        let ledger = RunLedger::open(&dir.path().join("ledger.db")).unwrap();
        (dir, ledger)
    }

    fn op(action: OpAction, kind: ObjectKind, key: &str, hash: &str, remote_id: Option<&str>) -> LedgerOperation {
        LedgerOperation {
            action,
            kind,
            logical_key: key.into(),
            version: 1,
            content_hash: hash.into(),
            remote_id: remote_id.map(String::from),
        }
    }

    fn applied_create(run: Uuid, tenant: &str, key: &str, id: &str) -> RunLedgerEntry {
        RunLedgerEntry::new(
            run,
            tenant,
            op(OpAction::Create, ObjectKind::Group, key, "sha256:aa", Some(id)),
            Outcome::Applied,
        )
    }

    #[test]
    fn record_assigns_increasing_seq() {
        let (_dir, ledger) = open_tmp();
        let run = Uuid::new_v4();
        let a = ledger.record(applied_create(run, "acme", "a", "1")).unwrap();
        let b = ledger.record(applied_create(run, "acme", "b", "2")).unwrap();
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
    }

    #[test]
    fn applied_create_becomes_record() {
        let (_dir, ledger) = open_tmp();
        ledger
            .record(applied_create(Uuid::new_v4(), "acme", "all-mac", "42"))
            .unwrap();
        let rec = ledger
            .last_applied("acme", &ObjectKey::new(ObjectKind::Group, "all-mac"))
            .unwrap()
            .unwrap();
        assert_eq!(rec.remote_id, "42");
        assert_eq!(rec.content_hash, "sha256:aa");
        assert!(ledger
            .last_applied("other", &ObjectKey::new(ObjectKind::Group, "all-mac"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn failed_entries_do_not_touch_records() {
        let (_dir, ledger) = open_tmp();
        let run = Uuid::new_v4();
        ledger.record(applied_create(run, "acme", "all-mac", "42")).unwrap();
        ledger
            .record(
                RunLedgerEntry::new(
                    run,
                    "acme",
                    op(OpAction::Update, ObjectKind::Group, "all-mac", "sha256:bb", Some("42")),
                    Outcome::Failed,
                )
                .with_error("HTTP 400: invalid criteria"),
            )
            .unwrap();
        let rec = ledger
            .last_applied("acme", &ObjectKey::new(ObjectKind::Group, "all-mac"))
            .unwrap()
            .unwrap();
        assert_eq!(rec.content_hash, "sha256:aa");
        assert_eq!(ledger.history("acme", None).unwrap().len(), 2);
    }

    #[test]
    fn skipped_entry_records_adopted_object() {
        let (_dir, ledger) = open_tmp();
        let key = ObjectKey::new(ObjectKind::Group, "all-mac");
        assert!(ledger.last_applied("acme", &key).unwrap().is_none());
        ledger
            .record(RunLedgerEntry::new(
                Uuid::new_v4(),
                "acme",
                op(OpAction::Skip, ObjectKind::Group, "all-mac", "sha256:aa", Some("9")),
                Outcome::Skipped,
            ))
            .unwrap();
        let rec = ledger.last_applied("acme", &key).unwrap().unwrap();
        assert_eq!(rec.remote_id, "9");
    }

    #[test]
    fn applied_update_replaces_record() {
        let (_dir, ledger) = open_tmp();
        let run = Uuid::new_v4();
        ledger.record(applied_create(run, "acme", "all-mac", "42")).unwrap();
        ledger
            .record(RunLedgerEntry::new(
                run,
                "acme",
                op(OpAction::Update, ObjectKind::Group, "all-mac", "sha256:bb", Some("42")),
                Outcome::Applied,
            ))
            .unwrap();
        let records = ledger.records("acme").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records.iter().next().unwrap().content_hash, "sha256:bb");
    }

    #[test]
    fn records_are_scoped_per_tenant_prefix() {
        let (_dir, ledger) = open_tmp();
        let run = Uuid::new_v4();
        ledger.record(applied_create(run, "acme", "a", "1")).unwrap();
        ledger.record(applied_create(run, "acme-prod", "b", "2")).unwrap();
        assert_eq!(ledger.records("acme").unwrap().len(), 1);
        assert_eq!(ledger.records("acme-prod").unwrap().len(), 1);
        assert_eq!(ledger.history("acme", None).unwrap().len(), 1);
    }

    #[test]
    fn history_since_filters_older_entries() {
        let (_dir, ledger) = open_tmp();
        let run = Uuid::new_v4();
        let mut old = applied_create(run, "acme", "a", "1");
        old.timestamp = Utc::now() - CDur::days(3);
        ledger.record(old).unwrap();
        ledger.record(applied_create(run, "acme", "b", "2")).unwrap();

        let recent = ledger
            .history("acme", Some(Utc::now() - CDur::days(1)))
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].operation.logical_key, "b");
        assert_eq!(ledger.history("acme", None).unwrap().len(), 2);
    }

    #[test]
    fn decommission_removes_record_and_appends_entry() {
        let (_dir, ledger) = open_tmp();
        ledger
            .record(applied_create(Uuid::new_v4(), "acme", "old-wifi", "9"))
            .unwrap();
        let key = ObjectKey::new(ObjectKind::Group, "old-wifi");
        let entry = ledger.decommission("acme", &key, Uuid::new_v4()).unwrap();
        assert_eq!(entry.operation.action, OpAction::Decommission);
        assert_eq!(entry.operation.remote_id.as_deref(), Some("9"));
        assert!(ledger.last_applied("acme", &key).unwrap().is_none());
        assert_eq!(ledger.history("acme", None).unwrap().len(), 2);

        let err = ledger.decommission("acme", &key, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ReplicaError::RecordNotFound { .. }));
    }

    #[test]
    fn compact_drops_old_entries_keeps_records() {
        let (_dir, ledger) = open_tmp();
        let run = Uuid::new_v4();
        let mut old = applied_create(run, "acme", "a", "1");
        old.timestamp = Utc::now() - CDur::days(90);
        ledger.record(old).unwrap();
        ledger.record(applied_create(run, "acme", "b", "2")).unwrap();

        let removed = ledger.compact(Utc::now() - CDur::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(ledger.history("acme", None).unwrap().len(), 1);
        assert_eq!(ledger.records("acme").unwrap().len(), 2);
    }

    #[test]
    fn runs_summarize_outcomes() {
        let (_dir, ledger) = open_tmp();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        ledger.record(applied_create(first, "acme", "a", "1")).unwrap();
        ledger
            .record(RunLedgerEntry::new(
                second,
                "acme",
                op(OpAction::Skip, ObjectKind::Group, "a", "sha256:aa", Some("1")),
                Outcome::Skipped,
            ))
            .unwrap();
        ledger
            .record(
                RunLedgerEntry::new(
                    second,
                    "acme",
                    op(OpAction::Create, ObjectKind::Policy, "p", "sha256:cc", None),
                    Outcome::Failed,
                )
                .with_error("HTTP 422"),
            )
            .unwrap();

        let runs = ledger.runs("acme").unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, first);
        assert_eq!((runs[1].skipped, runs[1].failed), (1, 1));
    }

    #[test]
    fn invalid_tenant_id_is_rejected() {
        let (_dir, ledger) = open_tmp();
        let err = ledger
            .record(applied_create(Uuid::new_v4(), "Bad Tenant", "a", "1"))
            .unwrap_err();
        assert!(matches!(err, ReplicaError::InvalidTenantId(_)));
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        let (_dir, ledger) = open_tmp();
        let ledger = Arc::new(ledger);
        let run = Uuid::new_v4();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    let tenant = format!("tenant-{t}");
                    for i in 0..10 {
                        ledger
                            .record(applied_create(run, &tenant, &format!("g{i}"), &i.to_string()))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut seqs = Vec::new();
        for t in 0..4 {
            let history = ledger.history(&format!("tenant-{t}"), None).unwrap();
            assert_eq!(history.len(), 10);
            seqs.extend(history.iter().map(|e| e.seq));
        }
        seqs.sort();
        seqs.dedup();
        assert_eq!(seqs.len(), 40);
    }

    #[test]
    fn ledger_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/ledger.db");
        {
            let ledger = RunLedger::open(&path).unwrap();
            ledger
                .record(applied_create(Uuid::new_v4(), "acme", "a", "1"))
                .unwrap();
        }
        let ledger = RunLedger::open(&path).unwrap();
        assert_eq!(ledger.records("acme").unwrap().len(), 1);
        let next = ledger
            .record(applied_create(Uuid::new_v4(), "acme", "b", "2"))
            .unwrap();
        assert_eq!(next.seq, 2);
    }
}
