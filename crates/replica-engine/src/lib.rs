//! `replica-engine`: converge many tenants to one template bundle.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator::run(RunRequest)
//!     │  one task per tenant, Semaphore caps tenants in flight
//!     ▼
//! observe::current_records   ← ledger records, optionally refreshed live
//!     ▼
//! reconcile::plan            ← CREATE / UPDATE / SKIP, orphans reported
//!     ▼
//! apply::apply               ← Pending → Applying → Applied | Failed
//!     │                        one ledger entry per operation
//!     ▼
//! RunReport                  ← per-tenant counts, failures, exit code
//! ```

pub mod apply;
pub mod error;
pub mod observe;
pub mod orchestrator;
pub mod report;

#[cfg(test)]
pub(crate) mod fake;

pub use apply::{apply, ApplyContext, ApplyOutcome, OpState};
pub use error::{EngineError, Result};
pub use observe::{export_tenant, StateSource};
pub use orchestrator::{Orchestrator, RunRequest};
pub use report::{FailureDetail, RunMode, RunReport, RunTotals, TenantReport};
