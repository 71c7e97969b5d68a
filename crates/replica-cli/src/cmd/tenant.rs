use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use replica_core::config::Config;
use std::path::Path;

#[derive(Subcommand)]
pub enum TenantSubcommand {
    /// List configured tenants
    List,
}

pub fn run(root: &Path, subcmd: TenantSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    match subcmd {
        TenantSubcommand::List => {
            if json {
                return print_json(&config.tenants);
            }
            if config.tenants.is_empty() {
                println!("No tenants configured.");
                return Ok(());
            }
            let rows = config
                .tenants
                .iter()
                .map(|t| {
                    vec![
                        t.tenant_id.clone(),
                        t.base_url.clone(),
                        t.credential_ref.clone(),
                    ]
                })
                .collect();
            print_table(&["TENANT", "BASE URL", "CREDENTIALS"], rows);
            Ok(())
        }
    }
}
