//! Diff/reconciler: compute the operations that converge a tenant to a
//! template set.
//!
//! For every template object the tenant's record for the same object key is
//! consulted:
//!
//! ```text
//! no record                  → CREATE
//! record, same content hash  → SKIP   (already converged)
//! record, different hash     → UPDATE
//! record, no template        → orphan (reported, never deleted)
//! ```
//!
//! Operations are ordered by kind rank, then logical key. The order is total,
//! so `plan()` over identical inputs serializes to identical bytes.

use crate::error::{ReplicaError, Result};
use crate::hash;
use crate::record::{RecordSet, RemoteObject, RemoteObjectRecord};
use crate::template::TemplateObject;
use crate::types::{ObjectKey, ObjectKind, OpAction};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Operation / Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub action: OpAction,
    pub object: TemplateObject,
    /// Hash of `object.payload`; becomes the record's hash once applied.
    pub content_hash: String,
    /// Existing record for UPDATE and SKIP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RemoteObjectRecord>,
    pub reason: String,
}

impl Operation {
    pub fn key(&self) -> ObjectKey {
        self.object.key()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCounts {
    pub create: usize,
    pub update: usize,
    pub skip: usize,
    pub orphan: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub tenant_id: String,
    pub operations: Vec<Operation>,
    /// Tracked objects with no template in this run. Informational only.
    pub orphans: Vec<RemoteObjectRecord>,
}

impl Plan {
    pub fn counts(&self) -> PlanCounts {
        let mut c = PlanCounts {
            orphan: self.orphans.len(),
            ..Default::default()
        };
        for op in &self.operations {
            match op.action {
                OpAction::Create => c.create += 1,
                OpAction::Update => c.update += 1,
                OpAction::Skip => c.skip += 1,
                OpAction::Decommission => {}
            }
        }
        c
    }

    /// True when every operation is a SKIP.
    pub fn is_converged(&self) -> bool {
        self.operations.iter().all(|op| op.action == OpAction::Skip)
    }

    /// Canonical JSON rendering, stable across runs for identical inputs.
    pub fn to_canonical_json(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        Ok(hash::canonical_json(&value))
    }

    /// Content hash of the canonical rendering; equal fingerprints mean equal
    /// plans, which makes dry-run output diffable.
    pub fn fingerprint(&self) -> Result<String> {
        Ok(hash::digest_bytes(self.to_canonical_json()?.as_bytes()))
    }
}

// ---------------------------------------------------------------------------
// plan
// ---------------------------------------------------------------------------

/// Compute the plan for one tenant.
///
/// Fails if two templates share an object key; a plan must never hold two
/// operations for the same object.
pub fn plan(tenant_id: &str, templates: &[TemplateObject], records: &RecordSet) -> Result<Plan> {
    let mut by_key: BTreeMap<ObjectKey, &TemplateObject> = BTreeMap::new();
    for t in templates {
        if by_key.insert(t.key(), t).is_some() {
            return Err(ReplicaError::DuplicateKey {
                kind: t.kind.to_string(),
                key: t.logical_key.clone(),
            });
        }
    }

    // BTreeMap iteration gives (kind rank, logical key) order.
    let operations = by_key
        .values()
        .map(|t| diff_one(t, records))
        .collect();

    let orphans = records
        .iter()
        .filter(|r| !by_key.contains_key(&r.key()))
        .cloned()
        .collect();

    Ok(Plan {
        tenant_id: tenant_id.to_string(),
        operations,
        orphans,
    })
}

fn diff_one(template: &TemplateObject, records: &RecordSet) -> Operation {
    let content_hash = template.content_hash();
    match records.get(&template.key()) {
        None => Operation {
            action: OpAction::Create,
            object: template.clone(),
            content_hash,
            target: None,
            reason: "not present on tenant".into(),
        },
        Some(record) if record.content_hash == content_hash => Operation {
            action: OpAction::Skip,
            object: template.clone(),
            content_hash,
            target: Some(record.clone()),
            reason: "already converged".into(),
        },
        Some(record) => Operation {
            action: OpAction::Update,
            object: template.clone(),
            content_hash,
            target: Some(record.clone()),
            reason: format!("content changed ({})", short_hash(&record.content_hash)),
        },
    }
}

fn short_hash(h: &str) -> &str {
    let body = h.strip_prefix(hash::HASH_PREFIX).unwrap_or(h);
    &body[..body.len().min(12)]
}

// ---------------------------------------------------------------------------
// observe (authoritative mode)
// ---------------------------------------------------------------------------

/// Live objects fetched from a tenant, per kind. Only kinds present in the
/// map were fetched; records of other kinds are taken as-is.
pub type LiveState = BTreeMap<ObjectKind, Vec<RemoteObject>>;

/// Rebuild a tenant's records from live state instead of trusting the ledger.
///
/// - A tracked object still present remotely takes the live hash, so an
///   out-of-band edit shows up as UPDATE.
/// - A tracked object missing remotely is dropped, so it is re-created.
/// - An untracked live object is adopted for a template when its `key_field`
///   value equals the template's value for that field (or, if the template
///   lacks the field, its logical key). Each live object is adopted at most
///   once and never when it is already tracked under another key.
pub fn observe(
    records: &RecordSet,
    live: &LiveState,
    templates: &[TemplateObject],
    key_field: Option<&str>,
) -> RecordSet {
    let mut out = RecordSet::new();
    for record in records.iter() {
        match live.get(&record.kind) {
            None => {
                out.insert(record.clone());
            }
            Some(objects) => {
                if let Some(obj) = objects.iter().find(|o| o.remote_id == record.remote_id) {
                    let mut refreshed = record.clone();
                    refreshed.content_hash = obj.hash.clone();
                    out.insert(refreshed);
                }
            }
        }
    }

    let Some(field) = key_field else {
        return out;
    };

    let mut claimed: BTreeSet<(ObjectKind, String)> = out
        .iter()
        .map(|r| (r.kind, r.remote_id.clone()))
        .collect();

    for template in templates {
        if out.contains(&template.key()) {
            continue;
        }
        let Some(objects) = live.get(&template.kind) else {
            continue;
        };
        let wanted = template
            .payload
            .get(field)
            .and_then(|v| v.as_str())
            .unwrap_or(&template.logical_key);
        let candidate = objects.iter().find(|o| {
            !claimed.contains(&(template.kind, o.remote_id.clone()))
                && o.payload.get(field).and_then(|v| v.as_str()) == Some(wanted)
        });
        if let Some(obj) = candidate {
            claimed.insert((template.kind, obj.remote_id.clone()));
            out.insert(RemoteObjectRecord {
                kind: template.kind,
                logical_key: template.logical_key.clone(),
                remote_id: obj.remote_id.clone(),
                content_hash: obj.hash.clone(),
                last_synced_at: Utc::now(),
            });
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
