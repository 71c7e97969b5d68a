use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use replica_core::error::ReplicaError;
use replica_core::hash;
use replica_core::ledger::RunLedger;
use replica_core::reconcile::{self, LiveState};
use replica_core::record::RecordSet;
use replica_core::template::TemplateObject;
use replica_core::types::ObjectKind;
use replica_remote::RemoteClient;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

// ---------------------------------------------------------------------------
// StateSource
// ---------------------------------------------------------------------------

/// Where a tenant's current state comes from before planning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateSource {
    /// Records in the run ledger. No remote reads.
    #[default]
    Ledger,
    /// Ledger records refreshed against a live listing, so out-of-band
    /// edits and deletions are seen and untracked objects can be adopted.
    Authoritative,
}

impl StateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            StateSource::Ledger => "ledger",
            StateSource::Authoritative => "authoritative",
        }
    }
}

impl fmt::Display for StateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateSource {
    type Err = ReplicaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ledger" => Ok(StateSource::Ledger),
            "authoritative" => Ok(StateSource::Authoritative),
            other => Err(ReplicaError::Template(format!(
                "unknown state source '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Reading state
// ---------------------------------------------------------------------------

/// The tenant's records as stored in the ledger.
pub async fn ledger_records(ledger: &Arc<RunLedger>, tenant: &str) -> Result<RecordSet> {
    let ledger = ledger.clone();
    let tenant = tenant.to_string();
    Ok(tokio::task::spawn_blocking(move || ledger.records(&tenant)).await??)
}

/// Live listing of every kind in `kinds`.
pub async fn live_state(
    client: &RemoteClient,
    tenant: &str,
    kinds: impl IntoIterator<Item = ObjectKind>,
) -> Result<LiveState> {
    let mut live = LiveState::new();
    for kind in kinds {
        let listed = client.list(tenant, kind).await?;
        debug!(
            tenant = %tenant,
            kind = %kind,
            count = listed.value.len(),
            attempts = listed.attempts,
            "observed live objects"
        );
        live.insert(kind, listed.value);
    }
    Ok(live)
}

/// The records to plan against, per `source`.
pub async fn current_records(
    client: &RemoteClient,
    ledger: &Arc<RunLedger>,
    tenant: &str,
    templates: &[TemplateObject],
    source: StateSource,
) -> Result<RecordSet> {
    let records = ledger_records(ledger, tenant).await?;
    if source == StateSource::Ledger {
        return Ok(records);
    }
    let kinds: BTreeSet<ObjectKind> = templates
        .iter()
        .map(|t| t.kind)
        .chain(records.iter().map(|r| r.kind))
        .collect();
    let live = live_state(client, tenant, kinds).await?;
    Ok(reconcile::observe(
        &records,
        &live,
        templates,
        client.settings().key_field.as_deref(),
    ))
}

// ---------------------------------------------------------------------------
// Golden-tenant export
// ---------------------------------------------------------------------------

/// Turn a tenant's live state into template objects, for seeding a bundle
/// from a reference tenant.
///
/// Logical keys come from the `key_field` value, normalised to the logical
/// key alphabet; objects without one fall back to `<kind>-<remote_id>`.
/// Collisions within a kind get the remote id appended. Volatile fields are
/// dropped from the payload.
pub async fn export_tenant(client: &RemoteClient, tenant: &str) -> Result<Vec<TemplateObject>> {
    let settings = client.settings().clone();
    let live = live_state(client, tenant, ObjectKind::all().iter().copied()).await?;
    let mut out = Vec::new();
    for (kind, objects) in live {
        let mut taken = BTreeSet::new();
        for obj in objects {
            let named = settings
                .key_field
                .as_deref()
                .and_then(|f| obj.payload.get(f))
                .and_then(|v| v.as_str())
                .map(slugify)
                .filter(|s| !s.is_empty());
            let mut key = named.unwrap_or_else(|| slugify(&format!("{kind}-{}", obj.remote_id)));
            if !taken.insert(key.clone()) {
                key = slugify(&format!("{key}-{}", obj.remote_id));
                taken.insert(key.clone());
            }
            let payload = hash::strip_fields(&obj.payload, &settings.volatile_fields);
            out.push(TemplateObject::new(kind, key, payload, 1));
        }
    }
    Ok(out)
}

/// Lowercase, map anything outside `[a-z0-9-_.]` to `-`, trim separators,
/// cap at 128 characters.
fn slugify(s: &str) -> String {
    let mapped: String = s
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let mut collapsed = String::with_capacity(mapped.len());
    for c in mapped.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed
        .trim_matches(|c: char| matches!(c, '-' | '_' | '.'))
        .chars()
        .take(128)
        .collect()
}
