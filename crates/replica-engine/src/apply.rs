use std::fmt;
use std::sync::Arc;

use replica_core::ledger::{LedgerOperation, RunLedger, RunLedgerEntry};
use replica_core::reconcile::{Operation, Plan};
use replica_core::types::{OpAction, Outcome};
use replica_remote::{CallFailure, RemoteClient, RemoteError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;

// ---------------------------------------------------------------------------
// OpState
// ---------------------------------------------------------------------------

/// Lifecycle of one operation within a run.
///
/// ```text
/// Pending → Applying → Applied
///                    → Failed
/// Pending → Skipped          (SKIP operations, no remote call)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    Pending,
    Applying,
    Applied,
    Failed,
    Skipped,
}

impl OpState {
    pub fn as_str(self) -> &'static str {
        match self {
            OpState::Pending => "pending",
            OpState::Applying => "applying",
            OpState::Applied => "applied",
            OpState::Failed => "failed",
            OpState::Skipped => "skipped",
        }
    }

    pub fn can_transition_to(self, next: OpState) -> bool {
        matches!(
            (self, next),
            (OpState::Pending, OpState::Applying)
                | (OpState::Pending, OpState::Skipped)
                | (OpState::Applying, OpState::Applied)
                | (OpState::Applying, OpState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OpState::Applied | OpState::Failed | OpState::Skipped)
    }

    fn outcome(self) -> Option<Outcome> {
        match self {
            OpState::Applied => Some(Outcome::Applied),
            OpState::Failed => Some(Outcome::Failed),
            OpState::Skipped => Some(Outcome::Skipped),
            OpState::Pending | OpState::Applying => None,
        }
    }
}

impl fmt::Display for OpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operation being driven through [`OpState`].
struct Tracked<'a> {
    op: &'a Operation,
    state: OpState,
}

impl<'a> Tracked<'a> {
    fn new(op: &'a Operation) -> Self {
        Self {
            op,
            state: OpState::Pending,
        }
    }

    fn advance(&mut self, tenant: &str, next: OpState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(
            tenant = %tenant,
            object = %self.op.key(),
            from = %self.state,
            to = %next,
            "operation state"
        );
        self.state = next;
    }
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Shared handles for applying plans within one run.
#[derive(Clone)]
pub struct ApplyContext {
    pub run_id: Uuid,
    pub client: Arc<RemoteClient>,
    pub ledger: Arc<RunLedger>,
    pub cancel: CancellationToken,
}

/// Entries recorded while applying one tenant's plan.
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    pub entries: Vec<RunLedgerEntry>,
    /// Set when cancellation stopped dispatch before the plan finished.
    pub cancelled: bool,
    /// Operations never dispatched because of cancellation.
    pub not_started: usize,
}

/// Execute `plan` in order, one operation at a time, recording an entry per
/// operation.
///
/// Remote failures mark the operation Failed and the next operation runs;
/// only a ledger write failure aborts the tenant. Cancellation is checked
/// before each dispatch, never mid-call.
pub async fn apply(plan: &Plan, ctx: &ApplyContext) -> Result<ApplyOutcome> {
    let tenant = plan.tenant_id.as_str();
    let mut outcome = ApplyOutcome::default();

    for (idx, op) in plan.operations.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            outcome.cancelled = true;
            outcome.not_started = plan.operations.len() - idx;
            warn!(
                tenant = %tenant,
                remaining = outcome.not_started,
                "run cancelled, stopping dispatch"
            );
            break;
        }

        let mut tracked = Tracked::new(op);
        let entry = execute(&mut tracked, ctx, tenant).await;
        let stored = record(&ctx.ledger, entry).await?;
        outcome.entries.push(stored);
    }

    Ok(outcome)
}

async fn execute(tracked: &mut Tracked<'_>, ctx: &ApplyContext, tenant: &str) -> RunLedgerEntry {
    let op = tracked.op;
    let mut ledger_op = LedgerOperation::from_operation(op);

    if op.action == OpAction::Skip {
        tracked.advance(tenant, OpState::Skipped);
        return finish(tracked, ctx, tenant, ledger_op, None, 0, &[]);
    }

    tracked.advance(tenant, OpState::Applying);
    let kind = op.object.kind;
    let payload = &op.object.payload;

    let result: std::result::Result<(Option<String>, u32, Vec<_>), CallFailure> = match op.action {
        OpAction::Create => ctx
            .client
            .create(tenant, kind, payload)
            .await
            .map(|r| (Some(r.value), r.attempts, r.delays)),
        OpAction::Update => match op.target.as_ref() {
            Some(target) => ctx
                .client
                .update(tenant, kind, &target.remote_id, payload)
                .await
                .map(|r| (None, r.attempts, r.delays)),
            None => Err(CallFailure {
                error: RemoteError::permanent(None, "update has no tracked remote object"),
                attempts: 0,
                delays: Vec::new(),
            }),
        },
        OpAction::Skip | OpAction::Decommission => Err(CallFailure {
            error: RemoteError::permanent(
                None,
                format!("{} is not an apply action", op.action),
            ),
            attempts: 0,
            delays: Vec::new(),
        }),
    };

    match result {
        Ok((created_id, attempts, delays)) => {
            if let Some(id) = created_id {
                ledger_op.remote_id = Some(id);
            }
            tracked.advance(tenant, OpState::Applied);
            finish(tracked, ctx, tenant, ledger_op, None, attempts, &delays)
        }
        Err(failure) => {
            tracked.advance(tenant, OpState::Failed);
            let detail = failure.error.to_string();
            finish(
                tracked,
                ctx,
                tenant,
                ledger_op,
                Some(detail),
                failure.attempts,
                &failure.delays,
            )
        }
    }
}

fn finish(
    tracked: &Tracked<'_>,
    ctx: &ApplyContext,
    tenant: &str,
    operation: LedgerOperation,
    error: Option<String>,
    attempts: u32,
    delays: &[std::time::Duration],
) -> RunLedgerEntry {
    // Only terminal states reach here.
    let outcome = tracked.state.outcome().unwrap_or(Outcome::Failed);
    match outcome {
        Outcome::Failed => warn!(
            tenant = %tenant,
            object = %tracked.op.key(),
            action = %tracked.op.action,
            attempts,
            error = error.as_deref().unwrap_or(""),
            "operation failed"
        ),
        _ => info!(
            tenant = %tenant,
            object = %tracked.op.key(),
            action = %tracked.op.action,
            outcome = %outcome,
            attempts,
            "operation finished"
        ),
    }
    let mut entry =
        RunLedgerEntry::new(ctx.run_id, tenant, operation, outcome).with_attempts(attempts, delays);
    if let Some(e) = error {
        entry = entry.with_error(e);
    }
    entry
}

async fn record(ledger: &Arc<RunLedger>, entry: RunLedgerEntry) -> Result<RunLedgerEntry> {
    let ledger = ledger.clone();
    Ok(tokio::task::spawn_blocking(move || ledger.record(entry)).await??)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
