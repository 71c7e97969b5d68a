//! Run ledger: the durable, append-only record of what each run attempted,
//! applied and skipped per tenant.
//!
//! Provides `RunLedgerEntry`, `LedgerOperation`, `RunSummary` and `RunLedger`.
//! The reconciler reads current state from `RunLedger::records`; the
//! orchestrator appends one entry per operation.

pub mod db;
pub mod entry;

pub use db::RunLedger;
pub use entry::{LedgerOperation, RunLedgerEntry, RunSummary};
