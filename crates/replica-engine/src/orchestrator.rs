use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use replica_core::ledger::RunLedger;
use replica_core::{paths, reconcile};
use replica_core::template::LoadedBundle;
use replica_remote::RemoteClient;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::apply::{self, ApplyContext};
use crate::observe::{self, StateSource};
use crate::report::{RunMode, RunReport, TenantReport};

/// What one run should do.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub bundle: Arc<LoadedBundle>,
    pub tenants: Vec<String>,
    pub mode: RunMode,
    pub source: StateSource,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives plans across tenants with at most `max_tenants` in flight.
///
/// Each tenant runs in its own task and its operations run strictly in plan
/// order. A failure in one tenant never touches another. The ledger and the
/// client's token cache are the only shared state.
///
/// Cancellation belongs to the orchestrator, not to a single run: once the
/// token is cancelled, later runs on the same instance dispatch nothing.
pub struct Orchestrator {
    client: Arc<RemoteClient>,
    ledger: Arc<RunLedger>,
    max_tenants: usize,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(client: Arc<RemoteClient>, ledger: Arc<RunLedger>, max_tenants: usize) -> Self {
        Self {
            client,
            ledger,
            max_tenants: max_tenants.clamp(1, Semaphore::MAX_PERMITS),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops dispatch of further operations when cancelled.
    /// In-flight operations finish and are recorded.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, request: RunRequest) -> RunReport {
        let run_id = Uuid::new_v4();
        // One worker per tenant; a repeated id would plan twice against the
        // same records and create every object twice.
        let mut seen = HashSet::new();
        let tenant_ids: Vec<String> = request
            .tenants
            .iter()
            .filter(|t| seen.insert((*t).clone()))
            .cloned()
            .collect();
        let started_at = Utc::now();
        info!(
            run_id = %run_id,
            mode = %request.mode,
            source = %request.source,
            bundle = %request.bundle.reference(),
            tenants = tenant_ids.len(),
            "run started"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_tenants));
        let ctx = ApplyContext {
            run_id,
            client: self.client.clone(),
            ledger: self.ledger.clone(),
            cancel: self.cancel.clone(),
        };
        let mut handles = Vec::new();

        for tenant in &tenant_ids {
            let sem = semaphore.clone();
            let ctx = ctx.clone();
            let bundle = request.bundle.clone();
            let tenant = tenant.clone();
            let (mode, source) = (request.mode, request.source);
            let handle = tokio::spawn(async move {
                let _permit = match sem.acquire().await {
                    Ok(p) => p,
                    Err(_) => return TenantReport::errored(tenant, "worker pool closed"),
                };
                run_tenant(&ctx, &bundle, &tenant, mode, source).await
            });
            handles.push(handle);
        }

        let mut tenants = Vec::new();
        for (handle, tenant) in handles.into_iter().zip(&tenant_ids) {
            match handle.await {
                Ok(r) => tenants.push(r),
                Err(e) => tenants.push(TenantReport::errored(
                    tenant.clone(),
                    format!("task join error: {e}"),
                )),
            }
        }

        let report = RunReport {
            run_id,
            mode: request.mode,
            source: request.source,
            bundle: request.bundle.reference().to_string(),
            digest: request.bundle.digest.clone(),
            started_at,
            finished_at: Utc::now(),
            cancelled: self.cancel.is_cancelled(),
            tenants,
        };
        let totals = report.totals();
        info!(
            run_id = %run_id,
            applied = totals.applied,
            skipped = totals.skipped,
            failed = totals.failed,
            errored = totals.errored,
            "run finished"
        );
        report
    }
}

async fn run_tenant(
    ctx: &ApplyContext,
    bundle: &LoadedBundle,
    tenant: &str,
    mode: RunMode,
    source: StateSource,
) -> TenantReport {
    let mut report = TenantReport::new(tenant);
    if ctx.cancel.is_cancelled() {
        report.cancelled = true;
        return report;
    }
    // The ledger refuses entries for invalid ids, so a remote write made
    // under one could never be recorded.
    if let Err(e) = paths::validate_tenant_id(tenant) {
        warn!(tenant = %tenant, error = %e, "refusing tenant");
        report.error = Some(e.to_string());
        return report;
    }

    let records =
        match observe::current_records(&ctx.client, &ctx.ledger, tenant, &bundle.objects, source)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "could not read tenant state");
                report.error = Some(e.to_string());
                return report;
            }
        };

    let plan = match reconcile::plan(tenant, &bundle.objects, &records) {
        Ok(p) => p,
        Err(e) => {
            warn!(tenant = %tenant, error = %e, "planning failed");
            report.error = Some(e.to_string());
            return report;
        }
    };
    report.set_plan(&plan);
    for orphan in &plan.orphans {
        info!(tenant = %tenant, object = %orphan.key(), "orphan: tracked but not in bundle");
    }

    if mode == RunMode::Plan {
        report.plan = Some(plan);
        return report;
    }

    match apply::apply(&plan, ctx).await {
        Ok(outcome) => report.absorb(outcome),
        Err(e) => {
            warn!(tenant = %tenant, error = %e, "apply aborted");
            report.error = Some(e.to_string());
        }
    }
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
