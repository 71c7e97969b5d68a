use crate::types::{ObjectKey, ObjectKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// RemoteObject
// ---------------------------------------------------------------------------

/// An object as currently present on a tenant.
///
/// `hash` is computed over the payload with volatile server fields removed,
/// so it is comparable with `RemoteObjectRecord::content_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub remote_id: String,
    pub payload: Value,
    pub hash: String,
}

// ---------------------------------------------------------------------------
// RemoteObjectRecord
// ---------------------------------------------------------------------------

/// What the tool last applied for one object on one tenant.
///
/// `content_hash` is the hash of the payload last successfully applied.
/// Remote ids are tenant-local and never compared across tenants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObjectRecord {
    pub kind: ObjectKind,
    pub logical_key: String,
    pub remote_id: String,
    pub content_hash: String,
    pub last_synced_at: DateTime<Utc>,
}

impl RemoteObjectRecord {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind, self.logical_key.clone())
    }
}

// ---------------------------------------------------------------------------
// RecordSet
// ---------------------------------------------------------------------------

/// The current records of one tenant, at most one per object key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    records: BTreeMap<ObjectKey, RemoteObjectRecord>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for its key. Returns the replaced record.
    pub fn insert(&mut self, record: RemoteObjectRecord) -> Option<RemoteObjectRecord> {
        self.records.insert(record.key(), record)
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&RemoteObjectRecord> {
        self.records.get(key)
    }

    pub fn remove(&mut self, key: &ObjectKey) -> Option<RemoteObjectRecord> {
        self.records.remove(key)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.records.contains_key(key)
    }

    /// Records in (kind rank, logical key) order.
    pub fn iter(&self) -> impl Iterator<Item = &RemoteObjectRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record whose remote id matches within `kind`.
    pub fn find_by_remote_id(&self, kind: ObjectKind, remote_id: &str) -> Option<&RemoteObjectRecord> {
        self.records
            .values()
            .find(|r| r.kind == kind && r.remote_id == remote_id)
    }
}

impl FromIterator<RemoteObjectRecord> for RecordSet {
    fn from_iter<I: IntoIterator<Item = RemoteObjectRecord>>(iter: I) -> Self {
        let mut set = RecordSet::new();
        for r in iter {
            set.insert(r);
        }
        set
    }
}
