mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    bundle::BundleSubcommand, config::ConfigSubcommand, ledger::LedgerSubcommand,
    run::{RunArgs, RunIncomplete}, tenant::TenantSubcommand,
};
use replica_engine::RunMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "replica",
    about = "Replicate versioned configuration bundles onto many tenants",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .replica/)
    #[arg(long, global = true, env = "REPLICA_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize replica in the current directory
    Init,

    /// Show what an apply would change on each tenant, without writing
    Plan {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Converge tenants onto a bundle
    Apply {
        #[command(flatten)]
        args: RunArgs,

        /// Tenants processed concurrently (default: from config)
        #[arg(long)]
        max_tenants: Option<usize>,
    },

    /// Inspect, validate and export template bundles
    Bundle {
        #[command(subcommand)]
        subcommand: BundleSubcommand,
    },

    /// Query and maintain the run ledger
    Ledger {
        #[command(subcommand)]
        subcommand: LedgerSubcommand,
    },

    /// Manage configured tenants
    Tenant {
        #[command(subcommand)]
        subcommand: TenantSubcommand,
    },

    /// Show and validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Apply { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Plan { args } => cmd::run::run(&root, args, RunMode::Plan, None, cli.json),
        Commands::Apply { args, max_tenants } => {
            cmd::run::run(&root, args, RunMode::Apply, max_tenants, cli.json)
        }
        Commands::Bundle { subcommand } => cmd::bundle::run(&root, subcommand, cli.json),
        Commands::Ledger { subcommand } => cmd::ledger::run(&root, subcommand, cli.json),
        Commands::Tenant { subcommand } => cmd::tenant::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        let code = e.downcast_ref::<RunIncomplete>().map_or(1, |r| r.code);
        std::process::exit(code);
    }
}
