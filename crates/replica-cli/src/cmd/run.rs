use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use replica_core::config::{Config, TenantTarget};
use replica_core::ledger::RunLedger;
use replica_core::template::{BundleRef, TemplateStore};
use replica_engine::{Orchestrator, RunMode, RunRequest, StateSource};
use replica_remote::{HttpTransport, RemoteClient, TenantEndpoint};
use tracing::warn;

use crate::output::print_run_report;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Bundle reference: NAME, NAME@VERSION or NAME@VERSION#sha256:DIGEST
    #[arg(long)]
    pub bundle: String,

    /// Target tenant (repeatable; default: every configured tenant)
    #[arg(long = "tenant", value_name = "ID")]
    pub tenants: Vec<String>,

    /// Refresh state from the live tenant instead of trusting the ledger
    #[arg(long)]
    pub authoritative: bool,
}

/// Exit status of a run that completed but did not fully converge.
///
/// Carried through the `anyhow` chain so `main` can exit with the run's
/// code instead of the generic 1.
#[derive(Debug)]
pub struct RunIncomplete {
    pub code: i32,
    pub mode: RunMode,
}

impl fmt::Display for RunIncomplete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            RunMode::Plan => write!(f, "one or more tenants could not be planned"),
            RunMode::Apply => write!(f, "one or more operations did not apply"),
        }
    }
}

impl std::error::Error for RunIncomplete {}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

/// Endpoints for `targets`, with credentials resolved from the environment
/// or credential files.
pub fn resolve_endpoints(root: &Path, targets: &[TenantTarget]) -> anyhow::Result<Vec<TenantEndpoint>> {
    targets
        .iter()
        .map(|t| {
            let creds = t.resolve_credentials(root, |name| std::env::var(name).ok())?;
            Ok::<_, anyhow::Error>(TenantEndpoint::new(&t.tenant_id, &t.base_url, creds))
        })
        .collect()
}

pub fn build_client(config: &Config, endpoints: Vec<TenantEndpoint>) -> anyhow::Result<Arc<RemoteClient>> {
    let transport = HttpTransport::new(&config.remote).context("failed to build HTTP client")?;
    Ok(Arc::new(RemoteClient::new(
        Arc::new(transport),
        endpoints,
        config.retry.clone(),
        config.remote.clone(),
    )))
}

pub fn open_ledger(root: &Path, config: &Config) -> anyhow::Result<Arc<RunLedger>> {
    let path = config.ledger_path(root);
    let ledger = RunLedger::open(&path)
        .with_context(|| format!("failed to open ledger at {}", path.display()))?;
    Ok(Arc::new(ledger))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(
    root: &Path,
    args: RunArgs,
    mode: RunMode,
    max_tenants: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;

    let store = TemplateStore::new(config.library_path(root));
    let reference: BundleRef = args.bundle.parse()?;
    let bundle = store
        .load(&reference)
        .with_context(|| format!("failed to load bundle {reference}"))?;

    let targets = config.select_tenants(&args.tenants)?;
    if targets.is_empty() {
        anyhow::bail!("no tenants configured; add them to .replica/config.yaml");
    }

    let source = if args.authoritative {
        StateSource::Authoritative
    } else {
        StateSource::Ledger
    };
    // A ledger-only plan never talks to a tenant, so it needs no credentials.
    let endpoints = if mode == RunMode::Apply || source == StateSource::Authoritative {
        resolve_endpoints(root, &targets)?
    } else {
        Vec::new()
    };

    let client = build_client(&config, endpoints)?;
    let ledger = open_ledger(root, &config)?;
    let orchestrator = Orchestrator::new(
        client,
        ledger,
        max_tenants.unwrap_or(config.concurrency.max_tenants),
    );
    let request = RunRequest {
        bundle: Arc::new(bundle),
        tenants: targets.into_iter().map(|t| t.tenant_id).collect(),
        mode,
        source,
    };

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let cancel = orchestrator.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; finishing in-flight operations");
                cancel.cancel();
            }
        });
        orchestrator.run(request).await
    });

    print_run_report(&report, json)?;

    match report.exit_code() {
        0 => Ok(()),
        code => Err(RunIncomplete { code, mode }.into()),
    }
}
