use crate::cmd::run::open_ledger;
use crate::output::{print_json, print_table, short_hash};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use replica_core::config::Config;
use replica_core::ledger::RunLedgerEntry;
use replica_core::types::{ObjectKey, ObjectKind};
use std::path::Path;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum LedgerSubcommand {
    /// Show ledger entries for a tenant, oldest first
    History {
        tenant: String,
        /// Only entries at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },

    /// Show the objects the ledger tracks on a tenant
    Records { tenant: String },

    /// Summarize the runs that touched a tenant
    Runs { tenant: String },

    /// Stop tracking an object; the remote object is left in place
    Decommission {
        tenant: String,
        /// Object kind, e.g. group, policy, idp_binding
        kind: ObjectKind,
        /// Logical key of the object
        key: String,
    },

    /// Drop entries older than a timestamp; tracked records are kept
    Compact {
        /// RFC 3339 timestamp
        #[arg(long)]
        before: DateTime<Utc>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: LedgerSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let ledger = open_ledger(root, &config)?;

    match subcmd {
        LedgerSubcommand::History { tenant, since } => {
            let entries = ledger.history(&tenant, since)?;
            if json {
                return print_json(&entries);
            }
            print_history(&tenant, &entries);
            Ok(())
        }
        LedgerSubcommand::Records { tenant } => {
            let records: Vec<_> = ledger.records(&tenant)?.iter().cloned().collect();
            if json {
                return print_json(&records);
            }
            if records.is_empty() {
                println!("No objects tracked on '{tenant}'.");
                return Ok(());
            }
            let rows = records
                .iter()
                .map(|r| {
                    vec![
                        r.kind.to_string(),
                        r.logical_key.clone(),
                        r.remote_id.clone(),
                        short_hash(&r.content_hash).to_string(),
                        r.last_synced_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    ]
                })
                .collect();
            print_table(&["KIND", "KEY", "REMOTE ID", "HASH", "SYNCED"], rows);
            Ok(())
        }
        LedgerSubcommand::Runs { tenant } => {
            let runs = ledger.runs(&tenant)?;
            if json {
                return print_json(&runs);
            }
            if runs.is_empty() {
                println!("No runs recorded for '{tenant}'.");
                return Ok(());
            }
            let rows = runs
                .iter()
                .map(|r| {
                    vec![
                        r.run_id.to_string(),
                        r.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        r.applied.to_string(),
                        r.skipped.to_string(),
                        r.failed.to_string(),
                    ]
                })
                .collect();
            print_table(&["RUN", "STARTED", "APPLIED", "SKIPPED", "FAILED"], rows);
            Ok(())
        }
        LedgerSubcommand::Decommission { tenant, kind, key } => {
            let object = ObjectKey::new(kind, key);
            let entry = ledger
                .decommission(&tenant, &object, Uuid::new_v4())
                .with_context(|| format!("failed to decommission {object} on '{tenant}'"))?;
            if json {
                return print_json(&entry);
            }
            println!(
                "Stopped tracking {object} on '{tenant}' (remote id {}).",
                entry.operation.remote_id.as_deref().unwrap_or("-")
            );
            Ok(())
        }
        LedgerSubcommand::Compact { before } => {
            let removed = ledger.compact(before)?;
            if json {
                return print_json(&serde_json::json!({ "removed": removed }));
            }
            println!("Removed {removed} ledger entries older than {before}.");
            Ok(())
        }
    }
}

fn print_history(tenant: &str, entries: &[RunLedgerEntry]) {
    if entries.is_empty() {
        println!("No ledger entries for '{tenant}'.");
        return;
    }
    let rows = entries
        .iter()
        .map(|e| {
            vec![
                e.seq.to_string(),
                e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                e.operation.action.to_string(),
                e.operation.key().to_string(),
                e.outcome.to_string(),
                e.attempts.to_string(),
                e.error_detail.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(
        &["SEQ", "TIME", "ACTION", "OBJECT", "OUTCOME", "ATTEMPTS", "ERROR"],
        rows,
    );
}
