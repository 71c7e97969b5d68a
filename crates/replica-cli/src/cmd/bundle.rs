use crate::cmd::run::{build_client, resolve_endpoints};
use crate::output::{print_json, print_table, short_hash};
use anyhow::Context;
use clap::Subcommand;
use replica_core::config::Config;
use replica_core::template::{sort_objects, BundleManifest, BundleRef, TemplateStore};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum BundleSubcommand {
    /// List bundles and their versions
    List,

    /// Show a bundle's manifest, digest and objects
    Show {
        /// NAME, NAME@VERSION or NAME@VERSION#sha256:DIGEST
        reference: String,
    },

    /// Load a bundle and report any template errors
    Validate {
        reference: String,
    },

    /// Snapshot a tenant's live configuration into a new bundle version
    Export {
        /// Tenant to read from
        #[arg(long)]
        tenant: String,
        /// Bundle name
        #[arg(long)]
        name: String,
        /// Bundle version
        #[arg(long)]
        version: String,
        #[arg(long)]
        description: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: BundleSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let store = TemplateStore::new(config.library_path(root));
    match subcmd {
        BundleSubcommand::List => list(&store, json),
        BundleSubcommand::Show { reference } => show(&store, &reference, json),
        BundleSubcommand::Validate { reference } => validate(&store, &reference, json),
        BundleSubcommand::Export {
            tenant,
            name,
            version,
            description,
        } => export(root, &config, &store, &tenant, name, version, description, json),
    }
}

// ---------------------------------------------------------------------------
// list / show / validate
// ---------------------------------------------------------------------------

fn list(store: &TemplateStore, json: bool) -> anyhow::Result<()> {
    let bundles = store.list()?;
    if json {
        return print_json(&bundles);
    }
    if bundles.is_empty() {
        println!("No bundles in {}.", store.library().display());
        return Ok(());
    }
    let rows = bundles
        .iter()
        .map(|b| {
            vec![
                b.name.clone(),
                b.versions.last().cloned().unwrap_or_default(),
                b.versions.join(", "),
            ]
        })
        .collect();
    print_table(&["BUNDLE", "LATEST", "VERSIONS"], rows);
    Ok(())
}

fn show(store: &TemplateStore, reference: &str, json: bool) -> anyhow::Result<()> {
    let reference: BundleRef = reference.parse()?;
    let bundle = store
        .load(&reference)
        .with_context(|| format!("failed to load bundle {reference}"))?;

    if json {
        return print_json(&serde_json::json!({
            "manifest": bundle.manifest,
            "digest": bundle.digest,
            "reference": bundle.reference().to_string(),
            "objects": bundle.objects,
        }));
    }

    println!("{}", bundle.reference());
    if let Some(d) = &bundle.manifest.description {
        println!("  {d}");
    }
    if let Some(t) = &bundle.manifest.source_tenant {
        println!("  exported from: {t}");
    }
    println!();
    let rows = bundle
        .objects
        .iter()
        .map(|o| {
            vec![
                o.kind.to_string(),
                o.logical_key.clone(),
                o.version.to_string(),
                short_hash(&o.content_hash()).to_string(),
            ]
        })
        .collect();
    print_table(&["KIND", "KEY", "VERSION", "HASH"], rows);
    Ok(())
}

fn validate(store: &TemplateStore, reference: &str, json: bool) -> anyhow::Result<()> {
    let reference: BundleRef = reference.parse()?;
    let bundle = store
        .load(&reference)
        .with_context(|| format!("bundle {reference} is invalid"))?;
    let counts: Vec<(String, usize)> = bundle
        .count_by_kind()
        .into_iter()
        .map(|(k, n)| (k.to_string(), n))
        .collect();

    if json {
        return print_json(&serde_json::json!({
            "valid": true,
            "reference": bundle.reference().to_string(),
            "objects": bundle.objects.len(),
            "by_kind": counts.into_iter().collect::<std::collections::BTreeMap<_, _>>(),
        }));
    }
    println!(
        "{} is valid: {} object(s)",
        bundle.reference(),
        bundle.objects.len()
    );
    for (kind, n) in counts {
        println!("  {kind}: {n}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// export
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn export(
    root: &Path,
    config: &Config,
    store: &TemplateStore,
    tenant: &str,
    name: String,
    version: String,
    description: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let target = config.tenant(tenant)?.clone();
    let endpoints = resolve_endpoints(root, std::slice::from_ref(&target))?;
    let client = build_client(config, endpoints)?;

    let rt = tokio::runtime::Runtime::new()?;
    let mut objects = rt
        .block_on(replica_engine::export_tenant(&client, tenant))
        .with_context(|| format!("failed to read live state of '{tenant}'"))?;
    sort_objects(&mut objects);

    let mut manifest = BundleManifest::new(name, version);
    manifest.description = description;
    manifest.source_tenant = Some(tenant.to_string());
    let dir = store.write_bundle(&manifest, &objects)?;

    let written = store.load(&BundleRef {
        name: manifest.name.clone(),
        version: Some(manifest.version.clone()),
        digest: None,
    })?;

    if json {
        return print_json(&serde_json::json!({
            "reference": written.reference().to_string(),
            "path": dir,
            "objects": objects.len(),
        }));
    }
    println!(
        "Exported {} object(s) from '{tenant}' to {}",
        objects.len(),
        dir.display()
    );
    println!("Pin with: {}", written.reference());
    Ok(())
}
