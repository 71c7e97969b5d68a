use anyhow::Context;
use replica_core::{config::Config, io, paths};
use std::path::Path;

const LIBRARY_README: &str = "\
# Template library

One directory per bundle, one sub-directory per version:

    <bundle>/<version>/bundle.yaml
    <bundle>/<version>/groups/<key>.yaml
    <bundle>/<version>/policies/<key>.yaml
    ...

Each object document holds `key`, `version` and `payload`.
Published versions are immutable: add a new version instead of editing.
";

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing replica in: {}", root.display());

    let state_dir = paths::replica_dir(root);
    io::ensure_dir(&state_dir)
        .with_context(|| format!("failed to create {}", state_dir.display()))?;

    let config_path = paths::config_path(root);
    let config = if config_path.exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
        Config::load(root).context("failed to load existing config")?
    } else {
        let cfg = Config::default();
        cfg.save(root).context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
        cfg
    };

    let library = config.library_path(root);
    io::ensure_dir(&library)
        .with_context(|| format!("failed to create {}", library.display()))?;
    if io::write_if_missing(&library.join("README.md"), LIBRARY_README.as_bytes())? {
        println!("  created: {}/README.md", config.library.display());
    } else {
        println!("  exists:  {}/README.md", config.library.display());
    }

    println!("\nNext: add tenants to {} and a bundle under {}/", paths::CONFIG_FILE, config.library.display());
    Ok(())
}
