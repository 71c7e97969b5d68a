use std::fmt;

use chrono::{DateTime, Utc};
use replica_core::ledger::RunLedgerEntry;
use replica_core::reconcile::{Plan, PlanCounts};
use replica_core::types::{ObjectKind, OpAction, Outcome};
use serde::Serialize;
use uuid::Uuid;

use crate::apply::ApplyOutcome;
use crate::observe::StateSource;

// ---------------------------------------------------------------------------
// RunMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Compute plans only.
    Plan,
    /// Compute and execute plans.
    Apply,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Plan => "plan",
            RunMode::Apply => "apply",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TenantReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FailureDetail {
    pub kind: ObjectKind,
    pub logical_key: String,
    pub action: OpAction,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TenantReport {
    pub tenant_id: String,
    /// Counts from planning, before anything was applied.
    pub planned: PlanCounts,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub orphans: usize,
    /// Operations never dispatched because the run was cancelled.
    pub not_started: usize,
    pub cancelled: bool,
    /// Planning or ledger failure that stopped this tenant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// The computed plan, kept in plan mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
}

impl TenantReport {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    pub fn errored(tenant_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(tenant_id)
        }
    }

    pub(crate) fn set_plan(&mut self, plan: &Plan) {
        self.planned = plan.counts();
        self.orphans = plan.orphans.len();
        self.fingerprint = plan.fingerprint().ok();
    }

    pub(crate) fn absorb(&mut self, outcome: ApplyOutcome) {
        for entry in &outcome.entries {
            self.count(entry);
        }
        self.cancelled |= outcome.cancelled;
        self.not_started += outcome.not_started;
    }

    fn count(&mut self, entry: &RunLedgerEntry) {
        match entry.outcome {
            Outcome::Applied => self.applied += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => {
                self.failed += 1;
                self.failures.push(FailureDetail {
                    kind: entry.operation.kind,
                    logical_key: entry.operation.logical_key.clone(),
                    action: entry.operation.action,
                    attempts: entry.attempts,
                    error: entry.error_detail.clone().unwrap_or_default(),
                });
            }
        }
    }

    /// Nothing failed, nothing left undone.
    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.failed == 0 && !self.cancelled
    }
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub source: StateSource,
    pub bundle: String,
    pub digest: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    /// In the order tenants were requested.
    pub tenants: Vec<TenantReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub tenants: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub orphans: usize,
    pub errored: usize,
}

impl RunReport {
    pub fn totals(&self) -> RunTotals {
        let mut t = RunTotals {
            tenants: self.tenants.len(),
            ..Default::default()
        };
        for r in &self.tenants {
            t.applied += r.applied;
            t.skipped += r.skipped;
            t.failed += r.failed;
            t.orphans += r.orphans;
            if r.error.is_some() {
                t.errored += 1;
            }
        }
        t
    }

    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.tenants.iter().all(TenantReport::is_clean)
    }

    /// 0 when every tenant planned and every operation was applied or
    /// skipped; 2 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            0
        } else {
            2
        }
    }
}
